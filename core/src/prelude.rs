use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::sweep::{SweepPlan, SweepProperties};

/// Plan and run-mode settings edited by the configuration surface.
///
/// The acquisition worker copies this once per run and never reads it again
/// until the next run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub plan: SweepPlan,
    pub properties: SweepProperties,
}

pub type SharedSweepConfig = Arc<Mutex<SweepConfig>>;

impl SweepConfig {
    pub fn new(plan: SweepPlan, properties: SweepProperties) -> Self {
        Self { plan, properties }
    }

    pub fn shared(self) -> SharedSweepConfig {
        Arc::new(Mutex::new(self))
    }
}

/// Failures reported by an `Instrument` implementation.
#[derive(thiserror::Error, Debug)]
pub enum InstrumentError {
    #[error("device not connected")]
    Disconnected,
    #[error("device i/o failure: {0}")]
    Io(String),
    #[error("unsupported setting: {0}")]
    Unsupported(String),
}

pub type InstrumentResult<T> = Result<T, InstrumentError>;

/// Errors raised while computing or applying error correction.
#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("corrections have not been calculated")]
    NotCalibrated,
    #[error("incomplete calibration: {0}")]
    Incomplete(String),
    #[error("singular calibration at {frequency} Hz")]
    Singular { frequency: u64 },
    #[error("no calibration data at {0} Hz")]
    UncalibratedFrequency(u64),
    #[error("unknown calibration standard '{0}'")]
    UnknownStandard(String),
    #[error("calibration file i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("calibration file format: {0}")]
    Format(String),
}

pub type CalibrationResult<T> = Result<T, CalibrationError>;

/// Errors raised by sweep planning and acquisition.
#[derive(thiserror::Error, Debug)]
pub enum SweepError {
    #[error("invalid sweep plan: {0}")]
    InvalidPlan(String),
    #[error("invalid frequency '{0}'")]
    InvalidFrequency(String),
    #[error("no instrument connected")]
    NotConnected,
    #[error("step size {0:.3} Hz is below 1 Hz")]
    StepTooSmall(f64),
    #[error("acquisition failed: {0}")]
    AcquisitionFailed(String),
    #[error("failed reading {channel} {attempts} times: data outside expected valid ranges or in an unexpected format")]
    DataOutOfRange { channel: String, attempts: usize },
    #[error(transparent)]
    Instrument(#[from] InstrumentError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error("codec failure: {0}")]
    Codec(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

pub type AcquisitionResult<T> = Result<T, SweepError>;
