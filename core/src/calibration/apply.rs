use log::{debug, warn};
use ndarray::Array1;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::calibration::model::{correct_delay, Calibration};
use crate::prelude::CalibrationError;
use crate::rf::{attenuation_corrected, Datapoint, StatsHelper};

/// Savitzky-Golay parameters for the raw transmission trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Smoothing {
    /// Odd number of samples per fit.
    pub window: usize,
    pub order: usize,
}

impl Default for Smoothing {
    fn default() -> Self {
        Self { window: 11, order: 2 }
    }
}

/// Post-calibration adjustments applied to every assembled segment.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Corrections {
    /// Port extension in seconds; reflection readings see it twice.
    pub offset_delay: f64,
    /// Inline attenuator on the transmission path, compensated on S21.
    pub s21_attenuation_db: f64,
    /// Smooths each raw S21 segment before calibration. Off when `None`.
    pub s21_smoothing: Option<Smoothing>,
}

impl Corrections {
    /// Corrected `(s11, s21)` for a pair of raw channel sequences.
    ///
    /// Without calculated corrections the raw data passes through. A
    /// frequency the calibration never saw is left uncorrected. Smoothing,
    /// when enabled, only touches the transmission trace and is skipped for
    /// segments shorter than its window.
    pub fn apply(
        &self,
        calibration: &Calibration,
        raw_s11: &[Datapoint],
        raw_s21: &[Datapoint],
    ) -> (Vec<Datapoint>, Vec<Datapoint>) {
        let mut s11 = raw_s11.to_vec();
        let mut s21 = match self.s21_smoothing {
            Some(smoothing) => smoothed(raw_s21, smoothing),
            None => raw_s21.to_vec(),
        };

        if calibration.is_calculated() {
            let mut missed = 0usize;
            if calibration.is_valid_1port() {
                for dp in s11.iter_mut() {
                    match calibration.correct11(dp) {
                        Ok(corrected) => *dp = corrected,
                        Err(CalibrationError::UncalibratedFrequency(_)) => missed += 1,
                        Err(err) => warn!("S11 correction skipped: {}", err),
                    }
                }
            }
            if calibration.is_valid_2port() {
                for (dp, dp11) in s21.iter_mut().zip(raw_s11) {
                    match calibration.correct21(dp, dp11) {
                        Ok(corrected) => *dp = corrected,
                        Err(CalibrationError::UncalibratedFrequency(_)) => missed += 1,
                        Err(err) => warn!("S21 correction skipped: {}", err),
                    }
                }
            }
            if missed > 0 {
                warn!(
                    "{} readings fall outside the calibrated frequencies and were left raw",
                    missed
                );
            }
        }

        if self.offset_delay != 0.0 {
            for dp in s11.iter_mut() {
                *dp = correct_delay(dp, self.offset_delay, true);
            }
            for dp in s21.iter_mut() {
                *dp = correct_delay(dp, self.offset_delay, false);
            }
        }
        let s21 = attenuation_corrected(&s21, self.s21_attenuation_db);
        (s11, s21)
    }
}

fn smoothed(raw: &[Datapoint], smoothing: Smoothing) -> Vec<Datapoint> {
    let values: Array1<Complex64> = raw.iter().map(Datapoint::z).collect();
    match StatsHelper::savitzky_golay(values.view(), smoothing.window, smoothing.order) {
        Some(filtered) => {
            debug!(
                "Smoothed {} S21 points (window {}, order {})",
                raw.len(),
                smoothing.window,
                smoothing.order
            );
            raw.iter()
                .zip(filtered.iter())
                .map(|(dp, &z)| Datapoint::from_complex(dp.frequency, z))
                .collect()
        }
        None => raw.to_vec(),
    }
}
