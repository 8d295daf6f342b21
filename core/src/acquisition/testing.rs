//! Scriptable instrument and clock doubles for engine tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use num_complex::Complex64;

use crate::acquisition::clock::Clock;
use crate::acquisition::instrument::{Channel, Instrument};
use crate::acquisition::monitor::SweepMonitor;
use crate::prelude::{InstrumentError, InstrumentResult};

pub struct FakeState {
    pub connected: bool,
    pub validate: bool,
    pub datapoints: usize,
    pub range: (u64, u64),
    /// Every range requested, in order.
    pub ranges: Vec<(u64, u64)>,
    pub resets: Vec<(u64, u64)>,
    pub reconnects: usize,
    pub flushes: usize,
    /// Frequency reads so far.
    pub reads: usize,
    /// Frequency reads still to come back empty.
    pub empty_reads: usize,
    /// Replies served before generated data, one per channel read.
    pub reflection_script: VecDeque<Vec<String>>,
    pub transmission_script: VecDeque<Vec<String>>,
    /// Fixed reflection value; otherwise read `n` returns `(n % 100) / 100`.
    pub reflection_value: Option<Complex64>,
    /// Centre of a Q=50 resonator on the transmission channel.
    pub resonance: Option<u64>,
    /// Requests a stop on the monitor once this many reads were made.
    pub stop_after: Option<(usize, Arc<SweepMonitor>)>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            connected: true,
            validate: true,
            datapoints: 101,
            range: (1_000_000, 2_000_000),
            ranges: Vec::new(),
            resets: Vec::new(),
            reconnects: 0,
            flushes: 0,
            reads: 0,
            empty_reads: 0,
            reflection_script: VecDeque::new(),
            transmission_script: VecDeque::new(),
            reflection_value: None,
            resonance: None,
            stop_after: None,
        }
    }
}

impl FakeState {
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

    fn generated(&self, channel: Channel) -> Vec<String> {
        self.frequencies()
            .into_iter()
            .map(|f| {
                let z = match channel {
                    Channel::Reflection => self
                        .reflection_value
                        .unwrap_or_else(|| Complex64::new((self.reads % 100) as f64 / 100.0, 0.0)),
                    Channel::Transmission => match self.resonance {
                        Some(f0) => {
                            let detune = f as f64 / f0 as f64 - f0 as f64 / f as f64;
                            Complex64::new(1.0, 0.0) / Complex64::new(1.0, 50.0 * detune)
                        }
                        None => Complex64::new(0.5, -0.1),
                    },
                };
                format!("{} {}", z.re, z.im)
            })
            .collect()
    }
}

pub struct FakeInstrument {
    state: Arc<Mutex<FakeState>>,
}

impl FakeInstrument {
    pub fn new() -> (Self, Arc<Mutex<FakeState>>) {
        let state = Arc::new(Mutex::new(FakeState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }

    fn with_state<T>(&self, apply: impl FnOnce(&mut FakeState) -> T) -> InstrumentResult<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| InstrumentError::Io("fake state poisoned".into()))?;
        Ok(apply(&mut state))
    }
}

impl Instrument for FakeInstrument {
    fn name(&self) -> &str {
        "fake"
    }

    fn connected(&self) -> bool {
        self.with_state(|s| s.connected).unwrap_or(false)
    }

    fn set_sweep_range(&mut self, start: u64, end: u64) -> InstrumentResult<()> {
        self.with_state(|s| {
            s.range = (start, end);
            s.ranges.push((start, end));
        })
    }

    fn reset_sweep(&mut self, start: u64, end: u64) -> InstrumentResult<()> {
        self.with_state(|s| s.resets.push((start, end)))
    }

    fn read_frequencies(&mut self) -> InstrumentResult<Vec<u64>> {
        self.with_state(|s| {
            s.reads += 1;
            if let Some((after, monitor)) = &s.stop_after {
                if s.reads >= *after {
                    monitor.request_stop();
                }
            }
            if s.empty_reads > 0 {
                s.empty_reads -= 1;
                return Vec::new();
            }
            s.frequencies()
        })
    }

    fn read_channel(&mut self, channel: Channel) -> InstrumentResult<Vec<String>> {
        self.with_state(|s| {
            let scripted = match channel {
                Channel::Reflection => s.reflection_script.pop_front(),
                Channel::Transmission => s.transmission_script.pop_front(),
            };
            scripted.unwrap_or_else(|| s.generated(channel))
        })
    }

    fn reconnect(&mut self) -> InstrumentResult<()> {
        self.with_state(|s| s.reconnects += 1)
    }

    fn flush_buffers(&mut self) -> InstrumentResult<()> {
        self.with_state(|s| s.flushes += 1)
    }

    fn datapoints(&self) -> usize {
        self.with_state(|s| s.datapoints).unwrap_or(0)
    }

    fn set_datapoints(&mut self, points: usize) -> InstrumentResult<()> {
        self.with_state(|s| s.datapoints = points)
    }

    fn bandwidth(&self) -> u32 {
        1_000
    }

    fn set_bandwidth(&mut self, _hz: u32) -> InstrumentResult<()> {
        Ok(())
    }

    fn validate_input(&self) -> bool {
        self.with_state(|s| s.validate).unwrap_or(true)
    }
}

/// Clock that records sleeps instead of blocking.
#[derive(Clone)]
pub struct FakeClock {
    base: Instant,
    inner: Arc<Mutex<FakeTime>>,
}

#[derive(Default)]
struct FakeTime {
    sleeps: Vec<Duration>,
    elapsed: Duration,
    tick: Duration,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            inner: Arc::new(Mutex::new(FakeTime::default())),
        }
    }

    /// Advances time by `tick` on every `now()` call.
    pub fn set_tick(&self, tick: Duration) {
        self.inner.lock().unwrap().tick = tick;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.lock().unwrap().sleeps.clone()
    }
}

impl Clock for FakeClock {
    fn sleep(&self, duration: Duration) {
        let mut time = self.inner.lock().unwrap();
        time.sleeps.push(duration);
        time.elapsed += duration;
    }

    fn now(&self) -> Instant {
        let mut time = self.inner.lock().unwrap();
        let tick = time.tick;
        time.elapsed += tick;
        self.base + time.elapsed
    }
}
