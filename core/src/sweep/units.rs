use serde::{Deserialize, Serialize};

use crate::prelude::{AcquisitionResult, SweepError};
use crate::sweep::SweepPlan;

/// Unit applied to frequency text that carries no SI suffix of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FrequencyUnit {
    #[default]
    #[serde(alias = "hz")]
    Hz,
    #[serde(alias = "khz", alias = "kHz")]
    KHz,
    #[serde(alias = "mhz")]
    MHz,
    #[serde(alias = "ghz")]
    GHz,
}

impl FrequencyUnit {
    pub fn multiplier(self) -> f64 {
        match self {
            FrequencyUnit::Hz => 1.0,
            FrequencyUnit::KHz => 1e3,
            FrequencyUnit::MHz => 1e6,
            FrequencyUnit::GHz => 1e9,
        }
    }
}

fn suffix_multiplier(suffix: &str) -> Option<f64> {
    let lower = suffix.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return None;
    }
    let prefix = lower.strip_suffix("hz").unwrap_or(&lower).trim();
    match prefix {
        "" => Some(1.0),
        "k" => Some(1e3),
        // Sloppy input: a lone lowercase "m" still means mega for frequencies.
        "m" => Some(1e6),
        "g" => Some(1e9),
        _ => Some(f64::NAN),
    }
}

/// Parses user-entered frequency text into whole Hz.
///
/// `"10"` with `FrequencyUnit::MHz` is 10 MHz; an explicit suffix such as
/// `"433.92M"`, `"100k"` or `"1.2 GHz"` overrides the unit. Commas are
/// accepted as decimal separators. Negative values are rejected.
pub fn parse_frequency(text: &str, unit: FrequencyUnit) -> AcquisitionResult<u64> {
    let invalid = || SweepError::InvalidFrequency(text.to_string());
    let cleaned = text.trim().replace(',', ".");
    let split = cleaned
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e'))
        .unwrap_or(cleaned.len());
    let (number, suffix) = cleaned.split_at(split);
    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    let multiplier = match suffix_multiplier(suffix) {
        Some(m) if m.is_nan() => return Err(invalid()),
        Some(m) => m,
        None => unit.multiplier(),
    };
    let hz = (value * multiplier).round();
    if !hz.is_finite() || hz < 0.0 {
        return Err(invalid());
    }
    Ok(hz as u64)
}

/// Short SI rendering such as `"433.92MHz"`.
pub fn format_frequency(hz: u64) -> String {
    let (scaled, prefix) = match hz {
        f if f >= 1_000_000_000 => (f as f64 / 1e9, "G"),
        f if f >= 1_000_000 => (f as f64 / 1e6, "M"),
        f if f >= 1_000 => (f as f64 / 1e3, "k"),
        f => (f as f64, ""),
    };
    let mut digits = format!("{:.6}", scaled);
    while digits.ends_with('0') {
        digits.pop();
    }
    if digits.ends_with('.') {
        digits.pop();
    }
    format!("{}{}Hz", digits, prefix)
}

/// Raw sweep-entry fields as typed by the user, with their unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyInput {
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub unit: FrequencyUnit,
}

impl FrequencyInput {
    pub fn new(start: impl Into<String>, end: impl Into<String>, unit: FrequencyUnit) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            unit,
        }
    }

    pub fn start_hz(&self) -> AcquisitionResult<u64> {
        parse_frequency(&self.start, self.unit)
    }

    pub fn end_hz(&self) -> AcquisitionResult<u64> {
        parse_frequency(&self.end, self.unit)
    }

    pub fn to_plan(
        &self,
        points_per_segment: usize,
        segments: usize,
        logarithmic: bool,
    ) -> AcquisitionResult<SweepPlan> {
        SweepPlan::new(
            self.start_hz()?,
            self.end_hz()?,
            points_per_segment,
            segments,
            logarithmic,
        )
    }
}
