use serde::{Deserialize, Serialize};

use crate::rf::Datapoint;

/// Half-widths of the phase window used when locating resonance, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakWindows {
    pub single_deg: f64,
    pub continuous_deg: f64,
}

impl Default for PeakWindows {
    fn default() -> Self {
        Self {
            single_deg: 2.0,
            continuous_deg: 0.1,
        }
    }
}

/// One tracked resonance sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingRow {
    pub gain_db: f64,
    pub phase_deg: f64,
    pub frequency: u64,
    /// Seconds since the run started.
    pub elapsed: f64,
}

impl TrackingRow {
    pub fn from_datapoint(dp: &Datapoint, elapsed: f64) -> Self {
        Self {
            gain_db: dp.gain_db(),
            phase_deg: dp.phase_deg(),
            frequency: dp.frequency,
            elapsed,
        }
    }
}

/// Index of the highest-gain sample whose phase lies strictly inside
/// `±half_window_deg`. Earlier samples win ties.
pub fn find_peak(data: &[Datapoint], half_window_deg: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, dp) in data.iter().enumerate() {
        let phase = dp.phase_deg();
        if phase <= -half_window_deg || phase >= half_window_deg {
            continue;
        }
        let gain = dp.gain_db();
        if best.map_or(true, |(_, best_gain)| gain > best_gain) {
            best = Some((index, gain));
        }
    }
    best.map(|(index, _)| index)
}
