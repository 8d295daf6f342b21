use std::fmt;

use num_complex::Complex64;

use crate::prelude::InstrumentResult;

/// Raw value channel exposed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Reflection,
    Transmission,
}

impl Channel {
    pub fn name(self) -> &'static str {
        match self {
            Channel::Reflection => "reflection",
            Channel::Transmission => "transmission",
        }
    }

    /// Device command selecting this channel's data buffer.
    pub fn command(self) -> &'static str {
        match self {
            Channel::Reflection => "data 0",
            Channel::Transmission => "data 1",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Link to a network analyzer.
///
/// Implementations own whatever transport they use. All calls are blocking
/// and are only made from the acquisition worker.
pub trait Instrument: Send {
    fn name(&self) -> &str;

    fn connected(&self) -> bool;

    fn set_sweep_range(&mut self, start: u64, end: u64) -> InstrumentResult<()>;

    /// Restores the device's own display sweep after a segmented run.
    fn reset_sweep(&mut self, start: u64, end: u64) -> InstrumentResult<()>;

    fn read_frequencies(&mut self) -> InstrumentResult<Vec<u64>>;

    /// One `"re im"` text pair per sampled frequency.
    fn read_channel(&mut self, channel: Channel) -> InstrumentResult<Vec<String>>;

    fn reconnect(&mut self) -> InstrumentResult<()>;

    fn flush_buffers(&mut self) -> InstrumentResult<()>;

    fn features(&self) -> Vec<String> {
        Vec::new()
    }

    fn datapoints(&self) -> usize;

    fn set_datapoints(&mut self, points: usize) -> InstrumentResult<()>;

    fn bandwidth(&self) -> u32;

    fn set_bandwidth(&mut self, hz: u32) -> InstrumentResult<()>;

    /// Whether implausible channel values should trigger a re-read.
    fn validate_input(&self) -> bool {
        true
    }
}

/// Why a channel read was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelFault {
    Unparseable(String),
    OutOfRange(f64),
}

impl fmt::Display for ChannelFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelFault::Unparseable(line) => write!(f, "unparseable value '{}'", line),
            ChannelFault::OutOfRange(value) => write!(f, "value {} outside valid range", value),
        }
    }
}

/// Parses `"re im"` lines, rejecting any component above `limit` in
/// magnitude when `validate` is set. Blank lines are skipped.
pub fn parse_channel(lines: &[String], validate: bool, limit: f64) -> Result<Vec<Complex64>, ChannelFault> {
    let mut values = Vec::with_capacity(lines.len());
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace().map(str::parse::<f64>);
        let (re, im) = match (parts.next(), parts.next(), parts.next()) {
            (Some(Ok(re)), Some(Ok(im)), None) => (re, im),
            _ => return Err(ChannelFault::Unparseable(line.to_string())),
        };
        if validate {
            for component in [re, im] {
                if !component.is_finite() || component.abs() > limit {
                    return Err(ChannelFault::OutOfRange(component));
                }
            }
        }
        values.push(Complex64::new(re, im));
    }
    Ok(values)
}
