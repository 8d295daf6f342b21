use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calibration::{Calibration, Corrections};
use crate::rf::Datapoint;

/// Corrected and raw channels of one acquisition, with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub s11: Vec<Datapoint>,
    pub s21: Vec<Datapoint>,
    pub raw_s11: Vec<Datapoint>,
    pub raw_s21: Vec<Datapoint>,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

pub type SharedSweepResult = Arc<RwLock<SweepResult>>;

impl Default for SweepResult {
    fn default() -> Self {
        Self::new("")
    }
}

impl SweepResult {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            s11: Vec::new(),
            s21: Vec::new(),
            raw_s11: Vec::new(),
            raw_s21: Vec::new(),
            source: source.into(),
            timestamp: Utc::now(),
        }
    }

    /// Zero-valued placeholders for every frequency of a planned sweep.
    pub fn with_frequencies(frequencies: impl IntoIterator<Item = u64>, source: impl Into<String>) -> Self {
        let empty: Vec<Datapoint> = frequencies.into_iter().map(Datapoint::empty).collect();
        Self {
            s11: empty.clone(),
            s21: empty.clone(),
            raw_s11: empty.clone(),
            raw_s21: empty,
            ..Self::new(source)
        }
    }

    pub fn from_channels(s11: Vec<Datapoint>, s21: Vec<Datapoint>, source: impl Into<String>) -> Self {
        Self {
            raw_s11: s11.clone(),
            raw_s21: s21.clone(),
            s11,
            s21,
            ..Self::new(source)
        }
    }

    pub fn len(&self) -> usize {
        self.s11.len()
    }

    pub fn is_empty(&self) -> bool {
        self.s11.is_empty()
    }

    pub fn frequencies(&self) -> impl Iterator<Item = u64> + '_ {
        self.s11.iter().map(|dp| dp.frequency)
    }

    /// Writes one segment's readings starting at `offset`, growing the
    /// channels when the segment runs past their end.
    pub fn place_segment(
        &mut self,
        offset: usize,
        raw_s11: &[Datapoint],
        raw_s21: &[Datapoint],
        s11: &[Datapoint],
        s21: &[Datapoint],
    ) {
        for (channel, values) in [
            (&mut self.raw_s11, raw_s11),
            (&mut self.raw_s21, raw_s21),
            (&mut self.s11, s11),
            (&mut self.s21, s21),
        ] {
            for (i, dp) in values.iter().enumerate() {
                match channel.get_mut(offset + i) {
                    Some(slot) => *slot = *dp,
                    None => channel.push(*dp),
                }
            }
        }
        self.timestamp = Utc::now();
    }

    /// Recomputes the corrected channels from the stored raw readings.
    pub fn recorrect(&mut self, calibration: &Calibration, corrections: &Corrections) {
        let (s11, s21) = corrections.apply(calibration, &self.raw_s11, &self.raw_s21);
        self.s11 = s11;
        self.s21 = s21;
    }
}

/// Live result plus an optional frozen reference for comparison.
#[derive(Debug, Default)]
pub struct Dataset {
    live: SharedSweepResult,
    reference: Option<SweepResult>,
}

impl Dataset {
    pub fn new(live: SharedSweepResult) -> Self {
        Self {
            live,
            reference: None,
        }
    }

    pub fn live(&self) -> SharedSweepResult {
        Arc::clone(&self.live)
    }

    /// Independent copy of the live result.
    pub fn snapshot(&self) -> SweepResult {
        match self.live.read() {
            Ok(result) => result.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Freezes the current live result as the reference.
    pub fn set_reference(&mut self) {
        self.reference = Some(self.snapshot());
    }

    pub fn set_reference_from(&mut self, result: SweepResult) {
        self.reference = Some(result);
    }

    pub fn reset_reference(&mut self) {
        self.reference = None;
    }

    pub fn reference(&self) -> Option<&SweepResult> {
        self.reference.as_ref()
    }

    pub fn title(&self) -> String {
        let live = self.snapshot();
        let mut title = format!("{} ({} points)", display_source(&live.source), live.len());
        if let Some(reference) = &self.reference {
            title.push_str(&format!(
                " vs {} ({} points)",
                display_source(&reference.source),
                reference.len()
            ));
        }
        title
    }
}

fn display_source(source: &str) -> &str {
    if source.is_empty() {
        "sweep"
    } else {
        source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationStandard;

    #[test]
    fn placeholders_cover_plan_and_segments_overwrite() {
        let mut result = SweepResult::with_frequencies([10, 20, 30, 40], "test");
        assert_eq!(result.len(), 4);
        assert!(result.s21.iter().all(|dp| dp.re == 0.0 && dp.im == 0.0));

        let segment = vec![Datapoint::new(30, 0.5, 0.0), Datapoint::new(40, 0.6, 0.0)];
        result.place_segment(2, &segment, &segment, &segment, &segment);
        assert_eq!(result.s11[2].re, 0.5);
        assert_eq!(result.raw_s21[3].re, 0.6);
        assert_eq!(result.s11[0], Datapoint::empty(10));

        result.place_segment(3, &segment, &segment, &segment, &segment);
        assert_eq!(result.len(), 5);
    }

    #[test]
    fn reference_is_an_independent_copy() {
        let live: SharedSweepResult = Arc::new(RwLock::new(SweepResult::from_channels(
            vec![Datapoint::new(1, 0.1, 0.0)],
            vec![Datapoint::new(1, 0.2, 0.0)],
            "run 1",
        )));
        let mut dataset = Dataset::new(Arc::clone(&live));
        dataset.set_reference();

        live.write().unwrap().s11[0].re = 0.9;
        assert_eq!(dataset.reference().unwrap().s11[0].re, 0.1);
        assert_eq!(dataset.snapshot().s11[0].re, 0.9);
        assert_eq!(dataset.title(), "run 1 (1 points) vs run 1 (1 points)");

        dataset.reset_reference();
        assert!(dataset.reference().is_none());
    }

    #[test]
    fn recorrect_uses_stored_raw_data() {
        let freqs = [1_000u64, 2_000];
        let mut cal = Calibration::new();
        for (standard, value) in [
            (CalibrationStandard::Short, -0.5),
            (CalibrationStandard::Open, 0.5),
            (CalibrationStandard::Load, 0.0),
        ] {
            let data: Vec<Datapoint> = freqs.iter().map(|&f| Datapoint::new(f, value, 0.0)).collect();
            cal.insert(standard, &data);
        }
        cal.calculate_corrections().unwrap();

        let raw = freqs.iter().map(|&f| Datapoint::new(f, 0.2, 0.0)).collect();
        let mut result = SweepResult::from_channels(raw, Vec::new(), "file");
        result.recorrect(&cal, &Corrections::default());
        assert!((result.s11[1].re - 0.4).abs() < 1e-12);
        assert_eq!(result.raw_s11[1].re, 0.2);
    }
}
