use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    #[default]
    Single,
    Continuous,
    Average,
}

/// What the engine reports after each full pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Locate the highest-gain transmission sample inside the phase window.
    #[default]
    FindPeak,
    /// Re-sample the index located by the last peak search.
    TrackIndex,
}

/// Repetitions per segment and how many outliers to drop per point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Averaging {
    pub count: usize,
    pub truncate: usize,
}

impl Default for Averaging {
    fn default() -> Self {
        Self {
            count: 3,
            truncate: 0,
        }
    }
}

impl Averaging {
    /// Validated averaging settings; illegal combinations reset to the default.
    pub fn new(count: usize, truncate: usize) -> Self {
        if count == 0 || truncate >= count {
            warn!(
                "Illegal averaging values ({}, {}), using default",
                count, truncate
            );
            return Self::default();
        }
        Self { count, truncate }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepProperties {
    pub name: String,
    pub mode: SweepMode,
    pub averages: Averaging,
    pub logarithmic: bool,
    /// Passes to run in continuous/average mode; zero runs until stopped.
    pub repeat_count: usize,
    pub analysis_mode: AnalysisMode,
}

impl Default for SweepProperties {
    fn default() -> Self {
        Self {
            name: String::new(),
            mode: SweepMode::Single,
            averages: Averaging::default(),
            logarithmic: false,
            repeat_count: 0,
            analysis_mode: AnalysisMode::FindPeak,
        }
    }
}

impl SweepProperties {
    /// Repetitions per segment for this run.
    pub fn effective_averages(&self) -> usize {
        match self.mode {
            SweepMode::Average => self.averages.count.max(1),
            _ => 1,
        }
    }

    pub fn is_repeating(&self) -> bool {
        self.mode != SweepMode::Single
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_averaging_resets_to_default() {
        assert_eq!(Averaging::new(0, 0), Averaging::default());
        assert_eq!(Averaging::new(3, 3), Averaging::default());
        assert_eq!(Averaging::new(5, 2), Averaging { count: 5, truncate: 2 });
    }

    #[test]
    fn only_average_mode_repeats_reads() {
        let mut props = SweepProperties {
            averages: Averaging::new(4, 1),
            ..Default::default()
        };
        assert_eq!(props.effective_averages(), 1);
        props.mode = SweepMode::Average;
        assert_eq!(props.effective_averages(), 4);
        assert!(props.is_repeating());
    }

    #[test]
    fn properties_parse_from_partial_json() {
        let props: SweepProperties =
            serde_json::from_str(r#"{"mode":"continuous","repeat_count":5}"#).unwrap();
        assert_eq!(props.mode, SweepMode::Continuous);
        assert_eq!(props.repeat_count, 5);
        assert_eq!(props.analysis_mode, AnalysisMode::FindPeak);
    }
}
