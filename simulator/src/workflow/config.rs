use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use vnacore::calibration::{Corrections, Smoothing};
use vnacore::prelude::SweepConfig;
use vnacore::sweep::{
    AnalysisMode, Averaging, FrequencyInput, FrequencyUnit, SweepMode, SweepProperties,
};

use crate::generator::profile::DeviceConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSection {
    pub start: String,
    pub end: String,
    pub unit: FrequencyUnit,
    pub points: usize,
    pub segments: usize,
    pub logarithmic: bool,
}

impl Default for SweepSection {
    fn default() -> Self {
        Self {
            start: "1".into(),
            end: "30".into(),
            unit: FrequencyUnit::MHz,
            points: 101,
            segments: 1,
            logarithmic: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertiesSection {
    pub name: String,
    pub mode: SweepMode,
    pub averages: usize,
    pub truncate: usize,
    /// Zero repeats until interrupted.
    pub repeat: usize,
    pub analysis: AnalysisMode,
}

impl Default for PropertiesSection {
    fn default() -> Self {
        Self {
            name: "dut".into(),
            mode: SweepMode::Single,
            averages: 3,
            truncate: 0,
            repeat: 1,
            analysis: AnalysisMode::FindPeak,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionsSection {
    pub offset_delay_ps: f64,
    pub s21_attenuation_db: f64,
    /// Savitzky-Golay filter on raw S21, e.g. `{ window: 11, order: 2 }`.
    pub s21_smoothing: Option<Smoothing>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSection {
    /// Calibration file applied before any sweep.
    pub load: Option<PathBuf>,
    /// Measure every standard on the simulated fixture first.
    pub guided: bool,
    pub save: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub touchstone: Option<PathBuf>,
    /// Gain/phase CSV; tracking rows for repeated runs.
    pub table: Option<PathBuf>,
    pub snapshot_dir: Option<PathBuf>,
    /// Earlier record shown alongside the new result.
    pub reference: Option<PathBuf>,
    /// Marker frequencies in the sweep unit.
    pub markers: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub sweep: SweepSection,
    pub properties: PropertiesSection,
    pub corrections: CorrectionsSection,
    pub device: DeviceConfig,
    pub calibration: CalibrationSection,
    pub outputs: OutputSection,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(start: &str, end: &str, points: usize, segments: usize, mode: SweepMode) -> Self {
        Self {
            sweep: SweepSection {
                start: start.to_string(),
                end: end.to_string(),
                points,
                segments,
                ..Default::default()
            },
            properties: PropertiesSection {
                mode,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn to_sweep_config(&self) -> anyhow::Result<SweepConfig> {
        let input = FrequencyInput::new(&self.sweep.start, &self.sweep.end, self.sweep.unit);
        let plan = input
            .to_plan(self.sweep.points, self.sweep.segments, self.sweep.logarithmic)
            .context("building sweep plan")?;
        let properties = SweepProperties {
            name: self.properties.name.clone(),
            mode: self.properties.mode,
            averages: Averaging::new(self.properties.averages, self.properties.truncate),
            logarithmic: self.sweep.logarithmic,
            repeat_count: self.properties.repeat,
            analysis_mode: self.properties.analysis,
        };
        Ok(SweepConfig::new(plan, properties))
    }

    pub fn to_corrections(&self) -> Corrections {
        Corrections {
            offset_delay: self.corrections.offset_delay_ps * 1e-12,
            s21_attenuation_db: self.corrections.s21_attenuation_db,
            s21_smoothing: self.corrections.s21_smoothing,
        }
    }

    pub fn marker_frequencies(&self) -> anyhow::Result<Vec<u64>> {
        self.outputs
            .markers
            .iter()
            .map(|text| {
                vnacore::sweep::parse_frequency(text, self.sweep.unit)
                    .with_context(|| format!("parsing marker frequency '{}'", text))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_from_args_produces_sweep_config() {
        let cfg = WorkflowConfig::from_args("1", "10", 51, 2, SweepMode::Single);
        let sweep = cfg.to_sweep_config().unwrap();
        assert_eq!(sweep.plan.start(), 1_000_000);
        assert_eq!(sweep.plan.end(), 10_000_000);
        assert_eq!(sweep.plan.total_points(), 102);
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"sweep:\n  start: \"5\"\n  end: \"15\"\n  points: 21\nproperties:\n  mode: average\n  averages: 5\n  truncate: 1\ncorrections:\n  offset_delay_ps: 25\n  s21_smoothing:\n    window: 7\ndevice:\n  seed: 7\noutputs:\n  markers: [\"10\", \"12.5M\"]\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = WorkflowConfig::load(&path).unwrap();
        assert_eq!(cfg.device.seed, 7);
        assert_eq!(cfg.device.datapoints, 101);

        let sweep = cfg.to_sweep_config().unwrap();
        assert_eq!(sweep.properties.mode, SweepMode::Average);
        assert_eq!(sweep.properties.averages, Averaging { count: 5, truncate: 1 });
        let corrections = cfg.to_corrections();
        assert!((corrections.offset_delay - 25e-12).abs() < 1e-18);
        assert_eq!(corrections.s21_smoothing, Some(Smoothing { window: 7, order: 2 }));
        assert_eq!(cfg.marker_frequencies().unwrap(), vec![10_000_000, 12_500_000]);
    }

    #[test]
    fn bad_frequencies_are_reported() {
        let cfg = WorkflowConfig::from_args("ten", "20", 11, 1, SweepMode::Single);
        assert!(cfg.to_sweep_config().is_err());
        let cfg = WorkflowConfig::from_args("20", "10", 11, 1, SweepMode::Single);
        assert!(cfg.to_sweep_config().is_err());
    }
}
