use std::collections::BTreeMap;
use std::f64::consts::PI;

use log::{debug, info, warn};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::calibration::standards::{CalKit, CalibrationStandard};
use crate::prelude::{CalibrationError, CalibrationResult};
use crate::rf::Datapoint;

/// Raw standard readings captured at one frequency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardReadings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short: Option<Complex64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<Complex64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<Complex64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub through: Option<Complex64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation: Option<Complex64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thrurefl: Option<Complex64>,
}

impl StandardReadings {
    pub fn get(&self, standard: CalibrationStandard) -> Option<Complex64> {
        match standard {
            CalibrationStandard::Short => self.short,
            CalibrationStandard::Open => self.open,
            CalibrationStandard::Load => self.load,
            CalibrationStandard::Through => self.through,
            CalibrationStandard::Isolation => self.isolation,
            CalibrationStandard::ThroughReflect => self.thrurefl,
        }
    }

    fn slot(&mut self, standard: CalibrationStandard) -> &mut Option<Complex64> {
        match standard {
            CalibrationStandard::Short => &mut self.short,
            CalibrationStandard::Open => &mut self.open,
            CalibrationStandard::Load => &mut self.load,
            CalibrationStandard::Through => &mut self.through,
            CalibrationStandard::Isolation => &mut self.isolation,
            CalibrationStandard::ThroughReflect => &mut self.thrurefl,
        }
    }

    fn complete_1port(&self) -> bool {
        self.short.is_some() && self.open.is_some() && self.load.is_some()
    }

    fn complete_2port(&self) -> bool {
        self.complete_1port() && self.through.is_some()
    }
}

/// Fitted error terms at one frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorTerms {
    /// Directivity.
    pub e00: Complex64,
    /// Source match.
    pub e11: Complex64,
    pub delta_e: Complex64,
    /// Reflection tracking.
    pub e10e01: Complex64,
    pub two_port: Option<TwoPortTerms>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoPortTerms {
    /// Isolation leakage.
    pub e30: Complex64,
    /// Load match.
    pub e22: Complex64,
    /// Transmission tracking.
    pub e10e32: Complex64,
}

/// Per-frequency error terms produced by a successful calculation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionModel {
    terms: BTreeMap<u64, ErrorTerms>,
    two_port: bool,
}

impl CorrectionModel {
    pub fn terms(&self, frequency: u64) -> Option<&ErrorTerms> {
        self.terms.get(&frequency)
    }

    pub fn is_two_port(&self) -> bool {
        self.two_port
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Solves `a * x = b` for a 3x3 complex system by Cramer's rule.
fn solve3(a: [[Complex64; 3]; 3], b: [Complex64; 3]) -> Option<[Complex64; 3]> {
    let det = |m: &[[Complex64; 3]; 3]| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };
    let d = det(&a);
    if d.norm() < f64::EPSILON || !d.is_finite() {
        return None;
    }
    let mut x = [Complex64::new(0.0, 0.0); 3];
    for (col, value) in x.iter_mut().enumerate() {
        let mut m = a;
        for row in 0..3 {
            m[row][col] = b[row];
        }
        *value = det(&m) / d;
    }
    Some(x)
}

/// Error-correction state: captured standards, kit definition and, once
/// calculated, the fitted correction model.
#[derive(Debug, Clone, Default)]
pub struct Calibration {
    readings: BTreeMap<u64, StandardReadings>,
    pub kit: CalKit,
    pub notes: Vec<String>,
    pub source: String,
    model: Option<CorrectionModel>,
}

impl Calibration {
    pub fn new() -> Self {
        Self {
            source: "Manual".to_string(),
            ..Default::default()
        }
    }

    pub fn with_kit(kit: CalKit) -> Self {
        Self {
            kit,
            ..Self::new()
        }
    }

    /// Stores a measured sequence for `standard`, replacing any earlier
    /// reading at the same frequencies. Invalidates calculated corrections.
    pub fn insert(&mut self, standard: CalibrationStandard, data: &[Datapoint]) {
        debug!("Inserting {} points for {}", data.len(), standard);
        for dp in data {
            *self
                .readings
                .entry(dp.frequency)
                .or_default()
                .slot(standard) = Some(dp.z());
        }
        self.model = None;
    }

    pub fn insert_named(&mut self, name: &str, data: &[Datapoint]) -> CalibrationResult<()> {
        let standard: CalibrationStandard = name.parse()?;
        self.insert(standard, data);
        Ok(())
    }

    pub(crate) fn insert_readings(&mut self, frequency: u64, readings: StandardReadings) {
        self.readings.insert(frequency, readings);
        self.model = None;
    }

    pub(crate) fn readings(&self) -> impl Iterator<Item = (&u64, &StandardReadings)> {
        self.readings.iter()
    }

    pub fn reset(&mut self) {
        self.readings.clear();
        self.notes.clear();
        self.model = None;
        self.source = "Manual".to_string();
    }

    pub fn frequencies(&self) -> impl Iterator<Item = u64> + '_ {
        self.readings.keys().copied()
    }

    /// Number of frequencies with a reading for `standard`.
    pub fn data_size(&self, standard: CalibrationStandard) -> usize {
        self.readings
            .values()
            .filter(|r| r.get(standard).is_some())
            .count()
    }

    pub fn is_valid_1port(&self) -> bool {
        !self.readings.is_empty() && self.readings.values().all(StandardReadings::complete_1port)
    }

    pub fn is_valid_2port(&self) -> bool {
        !self.readings.is_empty() && self.readings.values().all(StandardReadings::complete_2port)
    }

    pub fn is_calculated(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&CorrectionModel> {
        self.model.as_ref()
    }

    /// Fits the error terms at every captured frequency.
    pub fn calculate_corrections(&mut self) -> CalibrationResult<&CorrectionModel> {
        self.model = None;
        if !self.is_valid_1port() {
            let missing: Vec<&str> = [
                CalibrationStandard::Short,
                CalibrationStandard::Open,
                CalibrationStandard::Load,
            ]
            .into_iter()
            .filter(|s| self.data_size(*s) < self.readings.len() || self.readings.is_empty())
            .map(CalibrationStandard::name)
            .collect();
            return Err(CalibrationError::Incomplete(format!(
                "missing {} data for a 1-port calibration",
                missing.join("/")
            )));
        }
        let two_port = self.is_valid_2port();
        if two_port {
            if self.data_size(CalibrationStandard::Isolation) < self.readings.len() {
                warn!("No isolation data, assuming ideal isolation");
            }
            if self.data_size(CalibrationStandard::ThroughReflect) < self.readings.len() {
                warn!("No through-reflect data, assuming ideal port 2 match");
            }
        }

        let mut terms = BTreeMap::new();
        for (&freq, readings) in &self.readings {
            let mut port1 = self.port1_terms(freq, readings)?;
            if two_port {
                port1.two_port = Some(self.port2_terms(freq, readings, &port1));
            }
            terms.insert(freq, port1);
        }
        info!(
            "Calculated {} corrections at {} frequencies",
            if two_port { "2-port" } else { "1-port" },
            terms.len()
        );
        Ok(&*self.model.insert(CorrectionModel { terms, two_port }))
    }

    fn port1_terms(&self, freq: u64, readings: &StandardReadings) -> CalibrationResult<ErrorTerms> {
        let actual = [
            self.kit.gamma_short(freq),
            self.kit.gamma_open(freq),
            self.kit.gamma_load(freq),
        ];
        let measured = [readings.short, readings.open, readings.load];
        let one = Complex64::new(1.0, 0.0);

        // gm = e00 + g * gm * e11 - g * delta_e, linear in (e00, e11, delta_e).
        let mut a = [[Complex64::new(0.0, 0.0); 3]; 3];
        let mut b = [Complex64::new(0.0, 0.0); 3];
        for k in 0..3 {
            let gm = measured[k].ok_or_else(|| {
                CalibrationError::Incomplete(format!("missing standard at {} Hz", freq))
            })?;
            a[k] = [one, actual[k] * gm, -actual[k]];
            b[k] = gm;
        }
        let [e00, e11, delta_e] =
            solve3(a, b).ok_or(CalibrationError::Singular { frequency: freq })?;
        Ok(ErrorTerms {
            e00,
            e11,
            delta_e,
            e10e01: e00 * e11 - delta_e,
            two_port: None,
        })
    }

    fn port2_terms(&self, freq: u64, readings: &StandardReadings, port1: &ErrorTerms) -> TwoPortTerms {
        let gt = self.kit.gamma_through(freq);
        let gt2 = gt * gt;
        let through = readings.through.unwrap_or_default();
        let e30 = readings.isolation.unwrap_or_default();
        let e22 = match readings.thrurefl {
            Some(reflected) => {
                let gm7 = reflected - port1.e00;
                let denominator = gm7 * port1.e11 * gt2 + port1.e10e01 * gt2;
                if denominator.norm() > 0.0 {
                    gm7 / denominator
                } else {
                    Complex64::default()
                }
            }
            None => Complex64::default(),
        };
        let e10e32 = (through - e30) * (1.0 - port1.e11 * e22 * gt2) / gt;
        TwoPortTerms { e30, e22, e10e32 }
    }

    fn terms_for(&self, frequency: u64) -> CalibrationResult<&ErrorTerms> {
        let model = self.model.as_ref().ok_or(CalibrationError::NotCalibrated)?;
        model
            .terms(frequency)
            .ok_or(CalibrationError::UncalibratedFrequency(frequency))
    }

    /// Corrected reflection coefficient for a raw S11 reading.
    pub fn correct11(&self, dp: &Datapoint) -> CalibrationResult<Datapoint> {
        let t = self.terms_for(dp.frequency)?;
        let z = dp.z();
        let s11 = (z - t.e00) / (z * t.e11 - t.delta_e);
        Ok(dp.with_value(s11))
    }

    /// Corrected transmission for a raw S21 reading and its paired raw S11.
    pub fn correct21(&self, dp: &Datapoint, dp11: &Datapoint) -> CalibrationResult<Datapoint> {
        let t = self.terms_for(dp.frequency)?;
        let two = t.two_port.ok_or_else(|| {
            CalibrationError::Incomplete("no through data for a 2-port correction".to_string())
        })?;
        let s21 = (dp.z() - two.e30) / two.e10e32;
        let s21 = s21 * (t.e10e01 / (t.e11 * dp11.z() - t.delta_e));
        Ok(dp.with_value(s21))
    }
}

/// Rotates a reading to remove a fixed electrical delay (seconds).
///
/// Reflection readings see the delay twice.
pub fn correct_delay(dp: &Datapoint, delay: f64, reflect: bool) -> Datapoint {
    let mult = if reflect { 2.0 } else { 1.0 };
    let rotation = Complex64::new(0.0, -2.0 * PI * dp.frequency as f64 * delay * mult).exp();
    dp.with_value(dp.z() * rotation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::standards::{IDEAL_LOAD, IDEAL_OPEN, IDEAL_SHORT};
    use approx::assert_abs_diff_eq;

    const FREQS: [u64; 3] = [1_000_000, 2_000_000, 3_000_000];

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    struct ErrorBox {
        e00: Complex64,
        e11: Complex64,
        e10e01: Complex64,
        e22: Complex64,
        e10e32: Complex64,
        e30: Complex64,
    }

    impl ErrorBox {
        fn sample() -> Self {
            Self {
                e00: c(0.05, -0.02),
                e11: c(0.1, 0.04),
                e10e01: c(0.9, 0.1),
                e22: c(-0.06, 0.03),
                e10e32: c(0.8, -0.2),
                e30: c(0.001, 0.002),
            }
        }

        fn reflect(&self, gamma: Complex64) -> Complex64 {
            self.e00 + self.e10e01 * gamma / (1.0 - self.e11 * gamma)
        }

        fn through21(&self) -> Complex64 {
            self.e30 + self.e10e32 / (1.0 - self.e11 * self.e22)
        }

        fn through11(&self) -> Complex64 {
            self.e00 + self.e10e01 * self.e22 / (1.0 - self.e11 * self.e22)
        }
    }

    fn points(value: Complex64) -> Vec<Datapoint> {
        FREQS.iter().map(|&f| Datapoint::from_complex(f, value)).collect()
    }

    fn one_port(err: &ErrorBox) -> Calibration {
        let mut cal = Calibration::new();
        cal.insert(CalibrationStandard::Short, &points(err.reflect(IDEAL_SHORT)));
        cal.insert(CalibrationStandard::Open, &points(err.reflect(IDEAL_OPEN)));
        cal.insert(CalibrationStandard::Load, &points(err.reflect(IDEAL_LOAD)));
        cal
    }

    #[test]
    fn correction_requires_calculation() {
        let cal = one_port(&ErrorBox::sample());
        assert!(cal.is_valid_1port());
        assert!(!cal.is_calculated());
        let dp = Datapoint::new(FREQS[0], 0.1, 0.1);
        assert!(matches!(cal.correct11(&dp), Err(CalibrationError::NotCalibrated)));
    }

    #[test]
    fn missing_load_is_incomplete() {
        let err = ErrorBox::sample();
        let mut cal = Calibration::new();
        cal.insert(CalibrationStandard::Short, &points(err.reflect(IDEAL_SHORT)));
        cal.insert(CalibrationStandard::Open, &points(err.reflect(IDEAL_OPEN)));
        match cal.calculate_corrections() {
            Err(CalibrationError::Incomplete(msg)) => assert!(msg.contains("load")),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn one_port_recovers_error_terms_and_inverts() {
        let err = ErrorBox::sample();
        let mut cal = one_port(&err);
        cal.calculate_corrections().unwrap();
        assert!(!cal.model().unwrap().is_two_port());

        let terms = cal.model().unwrap().terms(FREQS[1]).unwrap();
        assert_abs_diff_eq!(terms.e00.re, err.e00.re, epsilon = 1e-12);
        assert_abs_diff_eq!(terms.e11.im, err.e11.im, epsilon = 1e-12);
        assert_abs_diff_eq!(terms.e10e01.re, err.e10e01.re, epsilon = 1e-12);

        for dut in [c(0.3, -0.4), c(-0.7, 0.1), c(0.0, 0.0)] {
            let raw = Datapoint::from_complex(FREQS[2], err.reflect(dut));
            let corrected = cal.correct11(&raw).unwrap();
            assert_abs_diff_eq!(corrected.re, dut.re, epsilon = 1e-12);
            assert_abs_diff_eq!(corrected.im, dut.im, epsilon = 1e-12);

            // Inverse Moebius transform back to the raw reading.
            let s = corrected.z();
            let back = (terms.e00 - s * terms.delta_e) / (1.0 - s * terms.e11);
            assert_abs_diff_eq!(back.re, raw.re, epsilon = 1e-12);
            assert_abs_diff_eq!(back.im, raw.im, epsilon = 1e-12);
        }
    }

    #[test]
    fn two_port_corrects_through_to_unity() {
        let err = ErrorBox::sample();
        let mut cal = one_port(&err);
        cal.insert(CalibrationStandard::Through, &points(err.through21()));
        cal.insert(CalibrationStandard::ThroughReflect, &points(err.through11()));
        cal.insert(CalibrationStandard::Isolation, &points(err.e30));
        cal.calculate_corrections().unwrap();
        assert!(cal.is_valid_2port());

        let terms = cal.model().unwrap().terms(FREQS[0]).unwrap();
        let two = terms.two_port.unwrap();
        assert_abs_diff_eq!(two.e22.re, err.e22.re, epsilon = 1e-12);
        assert_abs_diff_eq!(two.e10e32.im, err.e10e32.im, epsilon = 1e-12);

        let raw21 = Datapoint::from_complex(FREQS[0], err.through21());
        let raw11 = Datapoint::from_complex(FREQS[0], err.through11());
        let s21 = cal.correct21(&raw21, &raw11).unwrap();
        assert_abs_diff_eq!(s21.re, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s21.im, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn missing_isolation_falls_back_to_ideal() {
        let mut err = ErrorBox::sample();
        err.e30 = c(0.0, 0.0);
        err.e22 = c(0.0, 0.0);
        let mut cal = one_port(&err);
        cal.insert(CalibrationStandard::Through, &points(err.through21()));
        cal.calculate_corrections().unwrap();
        let two = cal.model().unwrap().terms(FREQS[2]).unwrap().two_port.unwrap();
        assert_eq!(two.e30, c(0.0, 0.0));
        assert_abs_diff_eq!(two.e10e32.re, err.e10e32.re, epsilon = 1e-12);
    }

    #[test]
    fn unknown_frequency_is_not_interpolated() {
        let mut cal = one_port(&ErrorBox::sample());
        cal.calculate_corrections().unwrap();
        let dp = Datapoint::new(1_500_000, 0.1, 0.0);
        assert!(matches!(
            cal.correct11(&dp),
            Err(CalibrationError::UncalibratedFrequency(1_500_000))
        ));
    }

    #[test]
    fn identical_standards_are_singular() {
        let mut cal = Calibration::new();
        for standard in [
            CalibrationStandard::Short,
            CalibrationStandard::Open,
            CalibrationStandard::Load,
        ] {
            cal.insert(standard, &points(c(0.5, 0.0)));
        }
        assert!(matches!(
            cal.calculate_corrections(),
            Err(CalibrationError::Singular { .. })
        ));
        assert!(!cal.is_calculated());
    }

    #[test]
    fn reinsert_invalidates_model_and_reset_clears() {
        let err = ErrorBox::sample();
        let mut cal = one_port(&err);
        cal.calculate_corrections().unwrap();
        cal.insert(CalibrationStandard::Load, &points(err.reflect(IDEAL_LOAD)));
        assert!(!cal.is_calculated());
        cal.notes.push("bench A".into());
        cal.reset();
        assert!(!cal.is_valid_1port());
        assert!(cal.notes.is_empty());
        assert_eq!(cal.data_size(CalibrationStandard::Short), 0);
    }

    #[test]
    fn delay_correction_doubles_for_reflection() {
        let dp = Datapoint::new(250_000_000, 1.0, 0.0);
        let through = correct_delay(&dp, -1e-9, false);
        assert_abs_diff_eq!(through.im, 1.0, epsilon = 1e-9);
        let reflect = correct_delay(&dp, -1e-9, true);
        assert_abs_diff_eq!(reflect.re, -1.0, epsilon = 1e-9);
    }
}
