//! Sweep acquisition: the device seam, the run state machine and the
//! worker that drives it off the caller's thread.

pub mod clock;
pub mod engine;
pub mod events;
pub mod instrument;
pub mod monitor;
pub mod peak;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, SystemClock};
pub use engine::{AcquisitionEngine, EngineSettings, RetryPolicy, RunSnapshot};
pub use events::{ChannelObserver, NullObserver, SweepEvent, SweepObserver};
pub use instrument::{parse_channel, Channel, ChannelFault, Instrument};
pub use monitor::{EngineState, SweepMonitor};
pub use peak::{find_peak, PeakWindows, TrackingRow};
pub use worker::SweepWorker;
