use std::f64::consts::PI;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Reference impedance used for impedance and VSWR views.
pub const REFERENCE_IMPEDANCE: f64 = 50.0;

/// One complex reading at a single frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub frequency: u64,
    pub re: f64,
    pub im: f64,
}

impl Datapoint {
    pub fn new(frequency: u64, re: f64, im: f64) -> Self {
        Self { frequency, re, im }
    }

    pub fn from_complex(frequency: u64, z: Complex64) -> Self {
        Self::new(frequency, z.re, z.im)
    }

    /// Zero-valued placeholder at `frequency`.
    pub fn empty(frequency: u64) -> Self {
        Self::new(frequency, 0.0, 0.0)
    }

    pub fn z(&self) -> Complex64 {
        Complex64::new(self.re, self.im)
    }

    pub fn magnitude(&self) -> f64 {
        self.z().norm()
    }

    /// Phase in radians, in `(-pi, pi]`.
    pub fn phase(&self) -> f64 {
        self.z().arg()
    }

    pub fn phase_deg(&self) -> f64 {
        self.phase().to_degrees()
    }

    /// Gain in dB; negative infinity for a zero reading.
    pub fn gain_db(&self) -> f64 {
        let mag = self.magnitude();
        if mag > 0.0 {
            20.0 * mag.log10()
        } else {
            f64::NEG_INFINITY
        }
    }

    pub fn vswr(&self) -> f64 {
        let mag = self.magnitude();
        if mag >= 1.0 {
            f64::INFINITY
        } else {
            (1.0 + mag) / (1.0 - mag)
        }
    }

    pub fn impedance(&self, reference: f64) -> Complex64 {
        gamma_to_impedance(self.z(), reference)
    }

    pub fn with_value(&self, z: Complex64) -> Self {
        Self::from_complex(self.frequency, z)
    }
}

pub fn gamma_to_impedance(gamma: Complex64, reference: f64) -> Complex64 {
    (Complex64::new(1.0, 0.0) + gamma) / (Complex64::new(1.0, 0.0) - gamma) * reference
}

/// Group delay in seconds at `index`, from the phase slope of its neighbours.
///
/// Edge samples use the nearest available neighbour. Phase jumps larger than
/// pi are unwrapped before the slope is taken.
pub fn group_delay(data: &[Datapoint], index: usize) -> f64 {
    if data.len() < 2 || index >= data.len() {
        return 0.0;
    }
    let lower = index.saturating_sub(1);
    let upper = (index + 1).min(data.len() - 1);

    let mut delta_angle = data[upper].phase() - data[lower].phase();
    let delta_freq = data[upper].frequency as f64 - data[lower].frequency as f64;
    if delta_freq == 0.0 {
        return 0.0;
    }
    if delta_angle.abs() > PI {
        delta_angle -= 2.0 * PI * delta_angle.signum();
    }
    -delta_angle / (2.0 * PI) / delta_freq
}

/// Compensates an inline attenuator of `attenuation_db` on a transmission trace.
pub fn attenuation_corrected(data: &[Datapoint], attenuation_db: f64) -> Vec<Datapoint> {
    if attenuation_db <= 0.0 {
        return data.to_vec();
    }
    let factor = 10f64.powf(attenuation_db / 20.0);
    data.iter()
        .map(|dp| Datapoint::new(dp.frequency, dp.re * factor, dp.im * factor))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn gain_and_phase_views() {
        let dp = Datapoint::new(1_000, 0.0, 0.1);
        assert_abs_diff_eq!(dp.gain_db(), -20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(dp.phase_deg(), 90.0, epsilon = 1e-9);
        assert_eq!(Datapoint::empty(5).gain_db(), f64::NEG_INFINITY);
    }

    #[test]
    fn impedance_of_matched_load_is_reference() {
        let z = Datapoint::empty(1).impedance(REFERENCE_IMPEDANCE);
        assert_abs_diff_eq!(z.re, 50.0, epsilon = 1e-12);
        assert_abs_diff_eq!(z.im, 0.0, epsilon = 1e-12);
        assert_eq!(Datapoint::new(1, 1.0, 0.0).vswr(), f64::INFINITY);
    }

    #[test]
    fn group_delay_of_linear_phase() {
        let delay = 1e-9;
        let data: Vec<Datapoint> = (0..5)
            .map(|i| {
                let f = 1_000_000 + i * 1_000;
                let z = Complex64::from_polar(1.0, -2.0 * PI * f as f64 * delay);
                Datapoint::from_complex(f, z)
            })
            .collect();
        for index in 0..data.len() {
            assert_abs_diff_eq!(group_delay(&data, index), delay, epsilon = 1e-15);
        }
    }

    #[test]
    fn attenuation_scales_amplitude() {
        let data = vec![Datapoint::new(1, 0.1, 0.0)];
        let corrected = attenuation_corrected(&data, 20.0);
        assert_abs_diff_eq!(corrected[0].re, 1.0, epsilon = 1e-12);
        assert_eq!(attenuation_corrected(&data, 0.0), data);
    }
}
