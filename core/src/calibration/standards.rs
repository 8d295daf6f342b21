use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use log::warn;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::acquisition::Channel;
use crate::prelude::CalibrationError;

const Z0: f64 = 50.0;

pub const IDEAL_SHORT: Complex64 = Complex64::new(-1.0, 0.0);
pub const IDEAL_OPEN: Complex64 = Complex64::new(1.0, 0.0);
pub const IDEAL_LOAD: Complex64 = Complex64::new(0.0, 0.0);
pub const IDEAL_THROUGH: Complex64 = Complex64::new(1.0, 0.0);

/// Reference loads connected during the guided calibration procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStandard {
    Short,
    Open,
    Load,
    Through,
    Isolation,
    #[serde(rename = "thrurefl")]
    ThroughReflect,
}

impl CalibrationStandard {
    pub const ALL: [CalibrationStandard; 6] = [
        CalibrationStandard::Short,
        CalibrationStandard::Open,
        CalibrationStandard::Load,
        CalibrationStandard::Through,
        CalibrationStandard::Isolation,
        CalibrationStandard::ThroughReflect,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CalibrationStandard::Short => "short",
            CalibrationStandard::Open => "open",
            CalibrationStandard::Load => "load",
            CalibrationStandard::Through => "through",
            CalibrationStandard::Isolation => "isolation",
            CalibrationStandard::ThroughReflect => "thrurefl",
        }
    }

    /// Measurement channel this standard is captured from.
    pub fn channel(self) -> Channel {
        match self {
            CalibrationStandard::Through | CalibrationStandard::Isolation => Channel::Transmission,
            _ => Channel::Reflection,
        }
    }
}

impl fmt::Display for CalibrationStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CalibrationStandard {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CalibrationStandard::ALL
            .into_iter()
            .find(|standard| standard.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CalibrationError::UnknownStandard(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShortModel {
    pub ideal: bool,
    /// Inductance polynomial coefficients L0..L3 (H, H/Hz, H/Hz², H/Hz³).
    pub inductance: [f64; 4],
    /// One-way offset delay in seconds.
    pub delay: f64,
}

impl Default for ShortModel {
    fn default() -> Self {
        Self {
            ideal: true,
            inductance: [0.0; 4],
            delay: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenModel {
    pub ideal: bool,
    /// Capacitance polynomial coefficients C0..C3 (F, F/Hz, F/Hz², F/Hz³).
    pub capacitance: [f64; 4],
    pub delay: f64,
}

impl Default for OpenModel {
    fn default() -> Self {
        Self {
            ideal: true,
            capacitance: [50e-15, 0.0, 0.0, 0.0],
            delay: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadModel {
    pub ideal: bool,
    pub resistance: f64,
    pub inductance: f64,
    pub capacitance: f64,
    pub delay: f64,
}

impl Default for LoadModel {
    fn default() -> Self {
        Self {
            ideal: true,
            resistance: 50.0,
            inductance: 0.0,
            capacitance: 0.0,
            delay: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThroughModel {
    pub ideal: bool,
    pub delay: f64,
}

impl Default for ThroughModel {
    fn default() -> Self {
        Self {
            ideal: true,
            delay: 0.0,
        }
    }
}

/// Declared electrical behaviour of the calibration kit.
///
/// A standard flagged `ideal` is taken to be a perfect short/open/load/through;
/// otherwise its expected response is synthesized from the parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalKit {
    pub short: ShortModel,
    pub open: OpenModel,
    pub load: LoadModel,
    pub through: ThroughModel,
}

fn reflection(z: Complex64, delay: f64, freq: f64) -> Complex64 {
    let gamma = (z / Z0 - 1.0) / (z / Z0 + 1.0);
    gamma * Complex64::new(0.0, -2.0 * PI * 2.0 * freq * delay).exp()
}

fn finite_or(gamma: Complex64, ideal: Complex64, standard: CalibrationStandard) -> Complex64 {
    if gamma.is_finite() {
        gamma
    } else {
        warn!("Unusable {} parameters, falling back to the ideal standard", standard);
        ideal
    }
}

fn polynomial(coefficients: &[f64; 4], freq: f64) -> f64 {
    coefficients
        .iter()
        .rev()
        .fold(0.0, |acc, coefficient| acc * freq + coefficient)
}

impl CalKit {
    pub fn all_ideal() -> Self {
        Self::default()
    }

    pub fn gamma_short(&self, freq: u64) -> Complex64 {
        if self.short.ideal {
            return IDEAL_SHORT;
        }
        let f = freq as f64;
        let z = Complex64::new(0.0, 2.0 * PI * f * polynomial(&self.short.inductance, f));
        finite_or(
            reflection(z, self.short.delay, f),
            IDEAL_SHORT,
            CalibrationStandard::Short,
        )
    }

    pub fn gamma_open(&self, freq: u64) -> Complex64 {
        if self.open.ideal {
            return IDEAL_OPEN;
        }
        let f = freq as f64;
        let divisor = 2.0 * PI * f * polynomial(&self.open.capacitance, f);
        if divisor == 0.0 {
            return IDEAL_OPEN;
        }
        let z = Complex64::new(0.0, -1.0) / divisor;
        finite_or(
            reflection(z, self.open.delay, f),
            IDEAL_OPEN,
            CalibrationStandard::Open,
        )
    }

    pub fn gamma_load(&self, freq: u64) -> Complex64 {
        if self.load.ideal {
            return IDEAL_LOAD;
        }
        let f = freq as f64;
        let r = self.load.resistance;
        let mut z = Complex64::new(r, 0.0);
        if self.load.capacitance > 0.0 {
            z = r / Complex64::new(1.0, 2.0 * r * PI * f * self.load.capacitance);
        }
        if self.load.inductance > 0.0 {
            z += Complex64::new(0.0, 2.0 * PI * f * self.load.inductance);
        }
        finite_or(
            reflection(z, self.load.delay, f),
            IDEAL_LOAD,
            CalibrationStandard::Load,
        )
    }

    pub fn gamma_through(&self, freq: u64) -> Complex64 {
        if self.through.ideal {
            return IDEAL_THROUGH;
        }
        finite_or(
            Complex64::new(0.0, -2.0 * PI * self.through.delay * freq as f64).exp(),
            IDEAL_THROUGH,
            CalibrationStandard::Through,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn standard_names_round_trip() {
        for standard in CalibrationStandard::ALL {
            assert_eq!(standard.name().parse::<CalibrationStandard>().unwrap(), standard);
        }
        assert!("bogus".parse::<CalibrationStandard>().is_err());
        assert_eq!(CalibrationStandard::Through.channel(), Channel::Transmission);
        assert_eq!(CalibrationStandard::ThroughReflect.channel(), Channel::Reflection);
    }

    #[test]
    fn ideal_kit_returns_textbook_values() {
        let kit = CalKit::all_ideal();
        assert_eq!(kit.gamma_short(1_000_000), IDEAL_SHORT);
        assert_eq!(kit.gamma_open(1_000_000), IDEAL_OPEN);
        assert_eq!(kit.gamma_load(1_000_000), IDEAL_LOAD);
        assert_eq!(kit.gamma_through(1_000_000), IDEAL_THROUGH);
    }

    #[test]
    fn zero_parameter_models_match_ideal_magnitudes() {
        let mut kit = CalKit::default();
        kit.short.ideal = false;
        kit.load.ideal = false;
        kit.through.ideal = false;
        let short = kit.gamma_short(10_000_000);
        assert_abs_diff_eq!(short.re, -1.0, epsilon = 1e-12);
        let load = kit.gamma_load(10_000_000);
        assert_abs_diff_eq!(load.norm(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(kit.gamma_through(10_000_000).re, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn open_capacitance_rotates_phase_negative() {
        let mut kit = CalKit::default();
        kit.open.ideal = false;
        let gamma = kit.gamma_open(100_000_000);
        assert_abs_diff_eq!(gamma.norm(), 1.0, epsilon = 1e-9);
        assert!(gamma.arg() < 0.0);
    }

    #[test]
    fn unusable_parameters_fall_back_to_ideal() {
        let mut kit = CalKit::default();
        kit.load.ideal = false;
        kit.load.resistance = f64::NAN;
        assert_eq!(kit.gamma_load(1_000_000), IDEAL_LOAD);
        kit.short.ideal = false;
        kit.short.inductance = [f64::INFINITY, 0.0, 0.0, 0.0];
        assert_eq!(kit.gamma_short(1_000_000), IDEAL_SHORT);
    }

    #[test]
    fn through_delay_is_one_way() {
        let mut kit = CalKit::default();
        kit.through = ThroughModel {
            ideal: false,
            delay: 1e-9,
        };
        // A quarter period at 250 MHz.
        let gamma = kit.gamma_through(250_000_000);
        assert_abs_diff_eq!(gamma.re, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(gamma.im, -1.0, epsilon = 1e-9);
    }
}
