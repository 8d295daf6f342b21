use log::debug;
use num_complex::Complex64;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use vnacore::acquisition::{Channel, Instrument};
use vnacore::calibration::CalibrationStandard;
use vnacore::prelude::{InstrumentError, InstrumentResult};

/// Systematic errors of the simulated test set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorModel {
    pub directivity: Complex64,
    pub source_match: Complex64,
    pub reflection_tracking: Complex64,
    pub load_match: Complex64,
    pub transmission_tracking: Complex64,
    pub isolation: Complex64,
}

impl Default for ErrorModel {
    fn default() -> Self {
        Self {
            directivity: Complex64::new(0.03, -0.01),
            source_match: Complex64::new(0.08, 0.02),
            reflection_tracking: Complex64::new(0.92, -0.05),
            load_match: Complex64::new(0.05, -0.02),
            transmission_tracking: Complex64::new(0.85, -0.1),
            isolation: Complex64::new(0.001, 0.0005),
        }
    }
}

impl ErrorModel {
    /// A perfect test set: readings equal the device's S-parameters.
    #[cfg(test)]
    pub fn ideal() -> Self {
        let zero = Complex64::new(0.0, 0.0);
        let one = Complex64::new(1.0, 0.0);
        Self {
            directivity: zero,
            source_match: zero,
            reflection_tracking: one,
            load_match: zero,
            transmission_tracking: one,
            isolation: zero,
        }
    }
}

/// Configuration of the simulated analyzer and the device under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub datapoints: usize,
    pub bandwidth: u32,
    pub validate: bool,
    /// Peak amplitude of uniform noise added to each component.
    pub noise: f64,
    /// Probability that a channel read comes back garbled.
    pub glitch_rate: f64,
    /// Probability that a frequency read comes back empty.
    pub dropout_rate: f64,
    pub seed: u64,
    pub resonance_hz: u64,
    pub quality: f64,
    pub insertion_loss_db: f64,
    pub error_model: ErrorModel,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            datapoints: 101,
            bandwidth: 1_000,
            validate: true,
            noise: 0.0005,
            glitch_rate: 0.0,
            dropout_rate: 0.0,
            seed: 0,
            resonance_hz: 10_000_000,
            quality: 40.0,
            insertion_loss_db: 1.5,
            error_model: ErrorModel::default(),
        }
    }
}

/// What is connected between the two ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Short,
    Open,
    Load,
    /// Port 1 joined straight to port 2.
    Through,
    /// Both ports terminated in loads.
    Isolation,
    Dut,
}

impl Termination {
    pub fn for_standard(standard: CalibrationStandard) -> Self {
        match standard {
            CalibrationStandard::Short => Termination::Short,
            CalibrationStandard::Open => Termination::Open,
            CalibrationStandard::Load => Termination::Load,
            CalibrationStandard::Through | CalibrationStandard::ThroughReflect => {
                Termination::Through
            }
            CalibrationStandard::Isolation => Termination::Isolation,
        }
    }
}

/// Handle used to swap what is connected to a running `SimulatedVna`.
#[derive(Debug, Clone)]
pub struct Fixture {
    termination: Arc<Mutex<Termination>>,
}

impl Fixture {
    pub fn connect(&self, termination: Termination) {
        if let Ok(mut current) = self.termination.lock() {
            *current = termination;
        }
    }

    #[cfg(test)]
    pub fn current(&self) -> Termination {
        self.termination
            .lock()
            .map(|t| *t)
            .unwrap_or(Termination::Dut)
    }
}

/// Scattering parameters of a series RLC resonator, `(s11, s21)`.
pub fn resonator(config: &DeviceConfig, frequency: u64) -> (Complex64, Complex64) {
    let f = frequency.max(1) as f64;
    let f0 = config.resonance_hz.max(1) as f64;
    let detune = f / f0 - f0 / f;
    let peak = 10f64.powf(-config.insertion_loss_db / 20.0);
    let s21 = Complex64::new(peak, 0.0) / Complex64::new(1.0, config.quality * detune);
    (Complex64::new(1.0, 0.0) - s21, s21)
}

/// Two-port analyzer with a forward-only error model and scriptable faults.
pub struct SimulatedVna {
    config: DeviceConfig,
    rng: StdRng,
    termination: Arc<Mutex<Termination>>,
    range: (u64, u64),
    datapoints: usize,
    bandwidth: u32,
    connected: bool,
}

impl SimulatedVna {
    pub fn new(config: DeviceConfig) -> (Self, Fixture) {
        let termination = Arc::new(Mutex::new(Termination::Dut));
        let fixture = Fixture {
            termination: Arc::clone(&termination),
        };
        let vna = Self {
            rng: StdRng::seed_from_u64(config.seed),
            datapoints: config.datapoints.max(1),
            bandwidth: config.bandwidth,
            range: (1_000_000, 30_000_000),
            termination,
            connected: true,
            config,
        };
        (vna, fixture)
    }

    #[cfg(test)]
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    fn termination(&self) -> Termination {
        self.termination
            .lock()
            .map(|t| *t)
            .unwrap_or(Termination::Dut)
    }

    fn frequencies(&self) -> Vec<u64> {
        let (start, end) = self.range;
        let n = self.datapoints;
        if n < 2 {
            return vec![start; n];
        }
        let step = (end - start) as f64 / (n - 1) as f64;
        (0..n)
            .map(|i| (start as f64 + step * i as f64).round() as u64)
            .collect()
    }

    /// Raw `(m11, m21)` the test set reports at `frequency`.
    pub fn measure(&self, frequency: u64) -> (Complex64, Complex64) {
        let e = &self.config.error_model;
        let one = Complex64::new(1.0, 0.0);
        let zero = Complex64::new(0.0, 0.0);
        let reflect = |gamma: Complex64| {
            e.directivity + e.reflection_tracking * gamma / (one - e.source_match * gamma)
        };
        match self.termination() {
            Termination::Short => (reflect(-one), e.isolation),
            Termination::Open => (reflect(one), e.isolation),
            Termination::Load | Termination::Isolation => (reflect(zero), e.isolation),
            Termination::Through => {
                let loop_gain = one - e.source_match * e.load_match;
                (
                    e.directivity + e.reflection_tracking * e.load_match / loop_gain,
                    e.isolation + e.transmission_tracking / loop_gain,
                )
            }
            Termination::Dut => {
                let (s11, s21) = resonator(&self.config, frequency);
                let (s22, s12) = (s11, s21);
                let delta = s11 * s22 - s21 * s12;
                let denominator = one - e.source_match * s11 - e.load_match * s22
                    + e.source_match * e.load_match * delta;
                (
                    e.directivity + e.reflection_tracking * (s11 - e.load_match * delta) / denominator,
                    e.isolation + e.transmission_tracking * s21 / denominator,
                )
            }
        }
    }

    fn noisy(&mut self, value: Complex64) -> Complex64 {
        let noise = self.config.noise;
        if noise <= 0.0 {
            return value;
        }
        value + Complex64::new(self.rng.gen_range(-noise..noise), self.rng.gen_range(-noise..noise))
    }
}

impl Instrument for SimulatedVna {
    fn name(&self) -> &str {
        "SimulatedVNA"
    }

    fn connected(&self) -> bool {
        self.connected
    }

    fn set_sweep_range(&mut self, start: u64, end: u64) -> InstrumentResult<()> {
        if !self.connected {
            return Err(InstrumentError::Disconnected);
        }
        if start > end {
            return Err(InstrumentError::Unsupported(format!("sweep {}-{} Hz", start, end)));
        }
        self.range = (start, end);
        Ok(())
    }

    fn reset_sweep(&mut self, start: u64, end: u64) -> InstrumentResult<()> {
        self.set_sweep_range(start, end)
    }

    fn read_frequencies(&mut self) -> InstrumentResult<Vec<u64>> {
        if !self.connected {
            return Err(InstrumentError::Disconnected);
        }
        if self.config.dropout_rate > 0.0 && self.rng.gen_bool(self.config.dropout_rate.min(1.0)) {
            debug!("Simulated frequency dropout");
            return Ok(Vec::new());
        }
        Ok(self.frequencies())
    }

    fn read_channel(&mut self, channel: Channel) -> InstrumentResult<Vec<String>> {
        if !self.connected {
            return Err(InstrumentError::Disconnected);
        }
        let frequencies = self.frequencies();
        if self.config.glitch_rate > 0.0 && self.rng.gen_bool(self.config.glitch_rate.min(1.0)) {
            debug!("Simulated garbled {} read", channel);
            return Ok(vec!["12.5 -3.0".to_string(); frequencies.len()]);
        }
        let mut lines = Vec::with_capacity(frequencies.len());
        for frequency in frequencies {
            let (m11, m21) = self.measure(frequency);
            let value = match channel {
                Channel::Reflection => m11,
                Channel::Transmission => m21,
            };
            let value = self.noisy(value);
            lines.push(format!("{:.9} {:.9}", value.re, value.im));
        }
        Ok(lines)
    }

    fn reconnect(&mut self) -> InstrumentResult<()> {
        self.connected = true;
        Ok(())
    }

    fn flush_buffers(&mut self) -> InstrumentResult<()> {
        Ok(())
    }

    fn features(&self) -> Vec<String> {
        vec![
            "Customizable data points".to_string(),
            "Bandwidth".to_string(),
        ]
    }

    fn datapoints(&self) -> usize {
        self.datapoints
    }

    fn set_datapoints(&mut self, points: usize) -> InstrumentResult<()> {
        if points == 0 || points > 1_024 {
            return Err(InstrumentError::Unsupported(format!("{} datapoints", points)));
        }
        self.datapoints = points;
        Ok(())
    }

    fn bandwidth(&self) -> u32 {
        self.bandwidth
    }

    fn set_bandwidth(&mut self, hz: u32) -> InstrumentResult<()> {
        self.bandwidth = hz;
        Ok(())
    }

    fn validate_input(&self) -> bool {
        self.config.validate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> DeviceConfig {
        DeviceConfig {
            noise: 0.0,
            datapoints: 11,
            ..Default::default()
        }
    }

    #[test]
    fn resonator_peaks_at_centre_with_zero_phase() {
        let config = quiet();
        let (_, at_peak) = resonator(&config, config.resonance_hz);
        let (_, off_peak) = resonator(&config, config.resonance_hz / 2);
        assert!(at_peak.norm() > off_peak.norm());
        assert_eq!(at_peak.im, 0.0);
        assert!((20.0 * at_peak.norm().log10() + config.insertion_loss_db).abs() < 1e-9);
    }

    #[test]
    fn readings_follow_range_and_termination() {
        let (mut vna, fixture) = SimulatedVna::new(quiet());
        vna.set_sweep_range(1_000_000, 2_000_000).unwrap();
        let freqs = vna.read_frequencies().unwrap();
        assert_eq!(freqs.len(), 11);
        assert_eq!(freqs[10], 2_000_000);

        fixture.connect(Termination::Load);
        let lines = vna.read_channel(Channel::Reflection).unwrap();
        let directivity = vna.config.error_model.directivity;
        assert_eq!(lines[0], format!("{:.9} {:.9}", directivity.re, directivity.im));
        assert_eq!(fixture.current(), Termination::Load);
    }

    #[test]
    fn glitches_produce_out_of_range_values() {
        let (mut vna, _) = SimulatedVna::new(DeviceConfig {
            glitch_rate: 1.0,
            ..quiet()
        });
        let lines = vna.read_channel(Channel::Transmission).unwrap();
        assert!(lines.iter().all(|line| line == "12.5 -3.0"));
    }

    #[test]
    fn disconnected_device_refuses_io() {
        let (mut vna, _) = SimulatedVna::new(quiet());
        vna.disconnect();
        assert!(!vna.connected());
        assert!(matches!(
            vna.read_frequencies(),
            Err(InstrumentError::Disconnected)
        ));
        vna.reconnect().unwrap();
        assert!(vna.read_frequencies().is_ok());
        assert!(vna.set_datapoints(0).is_err());
    }
}
