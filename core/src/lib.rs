//! Sweep acquisition and calibration core for low-cost vector network
//! analyzers.
//!
//! Plans split a span into device-sized segments, the acquisition engine
//! reads and validates each segment, calibration removes systematic error
//! and the codecs persist the assembled per-frequency result.

pub mod acquisition;
pub mod calibration;
pub mod dataset;
pub mod markers;
pub mod prelude;
pub mod rf;
pub mod sweep;
pub mod telemetry;
pub mod touchstone;

pub use acquisition::{AcquisitionEngine, EngineState, Instrument, SweepWorker};
pub use calibration::{Calibration, CalibrationStandard};
pub use dataset::{Dataset, SweepResult};
pub use prelude::{SharedSweepConfig, SweepConfig, SweepError};
