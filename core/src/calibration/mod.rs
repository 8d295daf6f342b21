use std::sync::{Arc, RwLock};

pub mod apply;
pub mod file;
pub mod model;
pub mod standards;

pub use apply::{Corrections, Smoothing};
pub use model::{
    correct_delay, Calibration, CorrectionModel, ErrorTerms, StandardReadings, TwoPortTerms,
};
pub use standards::{CalKit, CalibrationStandard, LoadModel, OpenModel, ShortModel, ThroughModel};

/// Calibration shared between the configuration surface and the acquisition
/// worker.
pub type SharedCalibration = Arc<RwLock<Calibration>>;
