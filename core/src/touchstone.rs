//! Per-frequency text export of sweep results.
//!
//! Two shapes are handled: the Touchstone-style `s1p`/`s2p` records with an
//! option line, and the CSV gain/phase tables used for resonance tracking.

use std::io::{BufRead, Write};

use num_complex::Complex64;

use crate::acquisition::TrackingRow;
use crate::prelude::{AcquisitionResult, SweepError};
use crate::rf::Datapoint;
use crate::sweep::FrequencyUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueFormat {
    #[default]
    RealImaginary,
    MagnitudeAngle,
    DecibelAngle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchstoneOptions {
    pub unit: FrequencyUnit,
    pub format: ValueFormat,
    pub resistance: f64,
}

impl Default for TouchstoneOptions {
    fn default() -> Self {
        Self {
            unit: FrequencyUnit::GHz,
            format: ValueFormat::MagnitudeAngle,
            resistance: 50.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TouchstoneData {
    pub options: TouchstoneOptions,
    pub comments: Vec<String>,
    pub s11: Vec<Datapoint>,
    pub s21: Vec<Datapoint>,
}

fn codec(message: impl Into<String>) -> SweepError {
    SweepError::Codec(message.into())
}

/// Writes a 4-parameter record; S12 and S22 are always zero.
pub fn write_touchstone<W: Write>(
    mut writer: W,
    s11: &[Datapoint],
    s21: &[Datapoint],
) -> AcquisitionResult<()> {
    if s11.len() != s21.len() {
        return Err(codec(format!(
            "channel length mismatch: {} s11 vs {} s21",
            s11.len(),
            s21.len()
        )));
    }
    writeln!(writer, "# HZ S RI R 50")?;
    for (dp11, dp21) in s11.iter().zip(s21) {
        writeln!(
            writer,
            "{} {} {} {} {} 0 0 0 0",
            dp11.frequency, dp11.re, dp11.im, dp21.re, dp21.im
        )?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_touchstone_1port<W: Write>(mut writer: W, s11: &[Datapoint]) -> AcquisitionResult<()> {
    writeln!(writer, "# HZ S RI R 50")?;
    for dp in s11 {
        writeln!(writer, "{} {} {}", dp.frequency, dp.re, dp.im)?;
    }
    writer.flush()?;
    Ok(())
}

fn parse_options(line: &str) -> AcquisitionResult<TouchstoneOptions> {
    let mut options = TouchstoneOptions::default();
    let mut tokens = line.trim_start_matches('#').split_whitespace();
    while let Some(token) = tokens.next() {
        match token.to_ascii_uppercase().as_str() {
            "HZ" => options.unit = FrequencyUnit::Hz,
            "KHZ" => options.unit = FrequencyUnit::KHz,
            "MHZ" => options.unit = FrequencyUnit::MHz,
            "GHZ" => options.unit = FrequencyUnit::GHz,
            "RI" => options.format = ValueFormat::RealImaginary,
            "MA" => options.format = ValueFormat::MagnitudeAngle,
            "DB" => options.format = ValueFormat::DecibelAngle,
            "S" => {}
            "R" => {
                let value = tokens.next().ok_or_else(|| codec("missing reference resistance"))?;
                options.resistance = value
                    .parse()
                    .map_err(|_| codec(format!("bad reference resistance '{}'", value)))?;
            }
            other => return Err(codec(format!("unsupported option '{}'", other))),
        }
    }
    Ok(options)
}

fn to_complex(format: ValueFormat, a: f64, b: f64) -> Complex64 {
    match format {
        ValueFormat::RealImaginary => Complex64::new(a, b),
        ValueFormat::MagnitudeAngle => Complex64::from_polar(a, b.to_radians()),
        ValueFormat::DecibelAngle => Complex64::from_polar(10f64.powf(a / 20.0), b.to_radians()),
    }
}

/// Parses a 1-port or 4-parameter record. Only S11 and S21 are kept.
pub fn read_touchstone<R: BufRead>(reader: R) -> AcquisitionResult<TouchstoneData> {
    let mut data = TouchstoneData::default();
    let mut seen_options = false;

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('!') {
            data.comments.push(comment.trim().to_string());
            continue;
        }
        if line.starts_with('#') {
            if seen_options {
                continue;
            }
            data.options = parse_options(line)?;
            seen_options = true;
            continue;
        }

        let body = line.split('!').next().unwrap_or_default();
        let values = body
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|err| codec(format!("line {}: {}", number + 1, err)))?;
        if values.is_empty() {
            continue;
        }
        let frequency = (values[0] * data.options.unit.multiplier()).round() as u64;
        let format = data.options.format;
        match values.len() {
            3 => {
                data.s11.push(Datapoint::from_complex(frequency, to_complex(format, values[1], values[2])));
            }
            9 => {
                data.s11.push(Datapoint::from_complex(frequency, to_complex(format, values[1], values[2])));
                data.s21.push(Datapoint::from_complex(frequency, to_complex(format, values[3], values[4])));
            }
            n => {
                return Err(codec(format!(
                    "line {}: expected 3 or 9 values, found {}",
                    number + 1,
                    n
                )))
            }
        }
    }
    Ok(data)
}

/// Gain/phase/frequency rows of a tracking run, optionally with elapsed time.
pub fn write_tracking_table<W: Write>(
    writer: W,
    rows: &[TrackingRow],
    with_time: bool,
) -> AcquisitionResult<()> {
    let mut csv = csv::Writer::from_writer(writer);
    let mut header = vec!["IL[dB]", "PH[Deg]", "Frec[Hz]"];
    if with_time {
        header.push("Time[Seg]");
    }
    csv.write_record(&header).map_err(|err| codec(err.to_string()))?;
    for row in rows {
        let mut record = vec![
            format!("{:.4}", row.gain_db),
            format!("{:.4}", row.phase_deg),
            row.frequency.to_string(),
        ];
        if with_time {
            record.push(format!("{:.3}", row.elapsed));
        }
        csv.write_record(&record).map_err(|err| codec(err.to_string()))?;
    }
    csv.flush()?;
    Ok(())
}

/// Gain/phase table of a single sweep's transmission channel.
pub fn write_gain_phase_table<W: Write>(writer: W, s21: &[Datapoint]) -> AcquisitionResult<()> {
    let rows: Vec<TrackingRow> = s21.iter().map(|dp| TrackingRow::from_datapoint(dp, 0.0)).collect();
    write_tracking_table(writer, &rows, false)
}
