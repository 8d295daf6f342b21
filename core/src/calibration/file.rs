use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::calibration::model::{Calibration, StandardReadings};
use crate::calibration::standards::CalKit;
use crate::prelude::{CalibrationError, CalibrationResult};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CalibrationRow {
    frequency: u64,
    #[serde(flatten)]
    readings: StandardReadings,
}

/// On-disk form of a calibration: kit, notes and the raw standards.
#[derive(Debug, Serialize, Deserialize)]
struct CalibrationDocument {
    version: u32,
    #[serde(default)]
    notes: Vec<String>,
    #[serde(default)]
    kit: CalKit,
    points: Vec<CalibrationRow>,
}

impl Calibration {
    /// Serializes the standards, kit and notes. Refused until corrections
    /// have been calculated.
    pub fn write_to<W: Write>(&self, writer: W) -> CalibrationResult<()> {
        if !self.is_calculated() {
            return Err(CalibrationError::NotCalibrated);
        }
        let document = CalibrationDocument {
            version: FORMAT_VERSION,
            notes: self.notes.clone(),
            kit: self.kit.clone(),
            points: self
                .readings()
                .map(|(&frequency, readings)| CalibrationRow {
                    frequency,
                    readings: readings.clone(),
                })
                .collect(),
        };
        serde_json::to_writer_pretty(writer, &document)
            .map_err(|err| CalibrationError::Format(err.to_string()))
    }

    /// Restores standards, kit and notes. Corrections are not calculated.
    pub fn read_from<R: Read>(reader: R) -> CalibrationResult<Self> {
        let document: CalibrationDocument = serde_json::from_reader(reader)
            .map_err(|err| CalibrationError::Format(err.to_string()))?;
        if document.version != FORMAT_VERSION {
            return Err(CalibrationError::Format(format!(
                "unsupported calibration file version {}",
                document.version
            )));
        }
        let mut calibration = Calibration::with_kit(document.kit);
        calibration.notes = document.notes;
        for row in document.points {
            calibration.insert_readings(row.frequency, row.readings);
        }
        Ok(calibration)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> CalibrationResult<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        info!("Saved calibration to {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> CalibrationResult<Self> {
        let path = path.as_ref();
        let mut calibration = Self::read_from(BufReader::new(File::open(path)?))?;
        calibration.source = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        info!(
            "Loaded calibration from {} ({} frequencies)",
            path.display(),
            calibration.frequencies().count()
        );
        Ok(calibration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::standards::CalibrationStandard;
    use crate::rf::Datapoint;
    use approx::assert_abs_diff_eq;
    use num_complex::Complex64;

    fn sample() -> Calibration {
        let mut cal = Calibration::new();
        for (standard, value) in [
            (CalibrationStandard::Short, Complex64::new(-0.9, 0.05)),
            (CalibrationStandard::Open, Complex64::new(0.95, -0.02)),
            (CalibrationStandard::Load, Complex64::new(0.02, 0.01)),
            (CalibrationStandard::Through, Complex64::new(0.8, -0.1)),
        ] {
            let data: Vec<Datapoint> = [1_000_000u64, 2_000_000]
                .iter()
                .map(|&f| Datapoint::from_complex(f, value))
                .collect();
            cal.insert(standard, &data);
        }
        cal.kit.open.ideal = false;
        cal.notes.push("SMA kit, bench 2".to_string());
        cal
    }

    #[test]
    fn uncalculated_calibration_is_not_saved() {
        let cal = sample();
        let mut buffer = Vec::new();
        assert!(matches!(
            cal.write_to(&mut buffer),
            Err(CalibrationError::NotCalibrated)
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn file_round_trip_reproduces_model() {
        let mut cal = sample();
        cal.calculate_corrections().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.cal.json");
        cal.save(&path).unwrap();

        let mut loaded = Calibration::load(&path).unwrap();
        assert_eq!(loaded.source, "bench.cal.json");
        assert_eq!(loaded.notes, cal.notes);
        assert!(!loaded.kit.open.ideal);
        assert!(loaded.kit.short.ideal);
        assert_abs_diff_eq!(loaded.kit.open.capacitance[0], 50e-15, epsilon = 1e-20);
        assert!(!loaded.is_calculated());
        loaded.calculate_corrections().unwrap();
        assert!(loaded.is_valid_2port());

        let original = cal.model().unwrap();
        let restored = loaded.model().unwrap();
        assert_eq!(original.len(), restored.len());
        for f in cal.frequencies() {
            let (a, b) = (original.terms(f).unwrap(), restored.terms(f).unwrap());
            for (x, y) in [(a.e00, b.e00), (a.e11, b.e11), (a.delta_e, b.delta_e)] {
                assert_abs_diff_eq!((x - y).norm(), 0.0, epsilon = 1e-12);
            }
            let (x, y) = (a.two_port.unwrap(), b.two_port.unwrap());
            assert_abs_diff_eq!((x.e10e32 - y.e10e32).norm(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn malformed_document_is_a_format_error() {
        let result = Calibration::read_from(&b"{\"version\":1}"[..]);
        assert!(matches!(result, Err(CalibrationError::Format(_))));
        let result = Calibration::read_from(&b"{\"version\":7,\"points\":[]}"[..]);
        assert!(matches!(result, Err(CalibrationError::Format(_))));
    }
}
