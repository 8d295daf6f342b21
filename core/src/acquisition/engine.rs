use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use ndarray::Array2;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::acquisition::clock::{Clock, SystemClock};
use crate::acquisition::events::{NullObserver, SweepObserver};
use crate::acquisition::instrument::{parse_channel, Channel, Instrument};
use crate::acquisition::monitor::{EngineState, SweepMonitor};
use crate::acquisition::peak::{find_peak, PeakWindows, TrackingRow};
use crate::calibration::{Corrections, SharedCalibration};
use crate::dataset::SweepResult;
use crate::prelude::{AcquisitionResult, SweepConfig, SweepError};
use crate::rf::{Datapoint, StatsHelper};
use crate::sweep::{AnalysisMode, SweepMode, SweepPlan, SweepProperties};
use crate::telemetry::{LogManager, SweepCounters, SweepMetrics};
use crate::touchstone::write_touchstone;

/// Bounded retry behaviour for device reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Reads of a segment, first one included, before the repetition is
    /// given up as empty.
    pub segment_retries: usize,
    /// Multiplied by the attempt number before each segment re-read.
    pub segment_backoff: Duration,
    /// Pause before re-reading a rejected channel.
    pub reread_delay: Duration,
    /// Rejected channel reads before the instrument is reconnected.
    pub reconnect_after: usize,
    /// Rejected channel reads before the run fails.
    pub max_channel_reads: usize,
    /// Largest plausible magnitude of a raw channel component.
    pub value_limit: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            segment_retries: 5,
            segment_backoff: Duration::from_millis(500),
            reread_delay: Duration::from_millis(200),
            reconnect_after: 5,
            max_channel_reads: 10,
            value_limit: 9.5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub corrections: Corrections,
    pub retry: RetryPolicy,
    pub peak_windows: PeakWindows,
    /// Directory receiving one `.s2p` snapshot per repeated pass.
    pub snapshot_dir: Option<PathBuf>,
}

/// Plan and properties frozen for the duration of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub plan: SweepPlan,
    pub properties: SweepProperties,
}

struct RawSegment {
    frequencies: Vec<u64>,
    s11: Vec<Complex64>,
    s21: Vec<Complex64>,
}

impl RawSegment {
    fn empty() -> Self {
        Self {
            frequencies: Vec::new(),
            s11: Vec::new(),
            s21: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }
}

/// Runs sweeps against an attached instrument and publishes the results.
pub struct AcquisitionEngine {
    instrument: Option<Box<dyn Instrument>>,
    calibration: SharedCalibration,
    observer: Box<dyn SweepObserver>,
    clock: Box<dyn Clock>,
    settings: EngineSettings,
    monitor: Arc<SweepMonitor>,
    metrics: SweepMetrics,
    log: LogManager,
    tracked_index: Option<usize>,
    tracking: Vec<TrackingRow>,
}

impl AcquisitionEngine {
    pub fn new(calibration: SharedCalibration) -> Self {
        Self {
            instrument: None,
            calibration,
            observer: Box::new(NullObserver),
            clock: Box::new(SystemClock),
            settings: EngineSettings::default(),
            monitor: SweepMonitor::new(),
            metrics: SweepMetrics::new(),
            log: LogManager::new("acquisition"),
            tracked_index: None,
            tracking: Vec::new(),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn SweepObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn attach(&mut self, instrument: Box<dyn Instrument>) {
        info!("Attached instrument {}", instrument.name());
        self.instrument = Some(instrument);
    }

    pub fn detach(&mut self) -> Option<Box<dyn Instrument>> {
        self.instrument.take()
    }

    pub fn instrument_mut(&mut self) -> Option<&mut (dyn Instrument + 'static)> {
        self.instrument.as_deref_mut()
    }

    pub fn calibration(&self) -> SharedCalibration {
        Arc::clone(&self.calibration)
    }

    pub fn monitor(&self) -> Arc<SweepMonitor> {
        Arc::clone(&self.monitor)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut EngineSettings {
        &mut self.settings
    }

    pub fn metrics(&self) -> SweepCounters {
        self.metrics.snapshot()
    }

    pub fn tracked_index(&self) -> Option<usize> {
        self.tracked_index
    }

    /// Resonance samples collected by the last repeated run.
    pub fn tracking(&self) -> &[TrackingRow] {
        &self.tracking
    }

    fn instrument(&mut self) -> AcquisitionResult<&mut Box<dyn Instrument>> {
        self.instrument.as_mut().ok_or(SweepError::NotConnected)
    }

    /// Validates the request and moves the engine into `Running`.
    ///
    /// Nothing is sent to the instrument here.
    pub fn start(&mut self, plan: SweepPlan, properties: SweepProperties) -> AcquisitionResult<RunSnapshot> {
        match &self.instrument {
            Some(instrument) if instrument.connected() => {}
            _ => return Err(SweepError::NotConnected),
        }
        let plan = plan.with_logarithmic(plan.logarithmic() || properties.logarithmic);
        let step = smallest_step(&plan);
        if step < 1.0 {
            return Err(SweepError::StepTooSmall(step));
        }

        self.monitor.begin_run();
        let source = if properties.name.is_empty() {
            "sweep".to_string()
        } else {
            properties.name.clone()
        };
        self.monitor
            .update_result(|result| *result = SweepResult::with_frequencies(plan.all_frequencies(), source));
        self.tracking.clear();
        self.log.record(&format!(
            "Starting {:?} sweep {}-{} Hz, {} x {} points",
            properties.mode,
            plan.start(),
            plan.end(),
            plan.segments(),
            plan.points_per_segment()
        ));
        Ok(RunSnapshot { plan, properties })
    }

    /// Runs one request to a terminal state.
    ///
    /// On failure the instrument is flushed and reconnected so the next run
    /// starts clean, the monitor drops back to `Idle` with the error message
    /// kept, and the error is returned after observers are told.
    pub fn run(&mut self, config: SweepConfig) -> AcquisitionResult<EngineState> {
        let snapshot = self.start(config.plan, config.properties)?;
        match self.execute(&snapshot) {
            Ok(state) => {
                self.monitor.set_state(state);
                self.log.record(&format!("Sweep ended in state {:?}", state));
                Ok(state)
            }
            Err(err) => {
                let message = err.to_string();
                error!("Sweep failed: {}", message);
                self.metrics.record_error();
                self.monitor.fail(message.clone());
                self.observer.on_error(&message);
                if let Some(instrument) = self.instrument.as_mut() {
                    if let Err(flush) = instrument.flush_buffers() {
                        warn!("Flush after failure: {}", flush);
                    }
                    if let Err(reconnect) = instrument.reconnect() {
                        warn!("Reconnect after failure: {}", reconnect);
                    }
                }
                // Ready for the next request; the message stays readable.
                self.monitor.set_state(EngineState::Idle);
                Err(err)
            }
        }
    }

    fn execute(&mut self, snapshot: &RunSnapshot) -> AcquisitionResult<EngineState> {
        let plan = snapshot.plan;
        let properties = &snapshot.properties;
        let averages = properties.effective_averages();
        let started = self.clock.now();
        let mut passes = 0usize;

        let instrument = self.instrument()?;
        if instrument.datapoints() != plan.points_per_segment() {
            instrument.set_datapoints(plan.points_per_segment())?;
        }

        loop {
            for index in 0..plan.segments() {
                if self.monitor.stop_requested() {
                    return self.finish_stopped(&plan);
                }
                let (start, end) = plan.segment_range(index);
                debug!("Reading segment {} ({}-{} Hz)", index, start, end);
                let Some(segment) = self.read_averaged_segment(
                    start,
                    end,
                    averages,
                    properties.averages.truncate,
                    (index, plan.segments()),
                )?
                else {
                    info!("Segment {} discarded after stop request", index);
                    return self.finish_stopped(&plan);
                };
                self.store_segment(index * plan.points_per_segment(), segment)?;
                self.metrics.record_segment();
                self.publish_progress((index + 1) as f64 / plan.segments() as f64 * 100.0);
            }
            passes += 1;

            if properties.mode == SweepMode::Single {
                self.track(properties, self.settings.peak_windows.single_deg, started);
                self.end_of_run(&plan);
                let result = self.monitor.snapshot();
                self.observer.on_finished(&result);
                return Ok(EngineState::Finished);
            }

            self.track(properties, self.settings.peak_windows.continuous_deg, started);
            self.write_snapshot(properties, passes)?;

            if properties.repeat_count > 0 && passes >= properties.repeat_count {
                self.end_of_run(&plan);
                let result = self.monitor.snapshot();
                self.observer.on_finished(&result);
                return Ok(EngineState::Finished);
            }
        }
    }

    fn finish_stopped(&mut self, plan: &SweepPlan) -> AcquisitionResult<EngineState> {
        self.end_of_run(plan);
        let result = self.monitor.snapshot();
        self.observer.on_finished(&result);
        Ok(EngineState::Stopped)
    }

    fn end_of_run(&mut self, plan: &SweepPlan) {
        if plan.segments() > 1 {
            if let Some(instrument) = self.instrument.as_mut() {
                if let Err(err) = instrument.reset_sweep(plan.start(), plan.end()) {
                    warn!("Could not restore the device sweep: {}", err);
                }
            }
        }
    }

    /// Records the pass's resonance row, timed from the start of the run.
    fn track(&mut self, properties: &SweepProperties, half_window_deg: f64, started: Instant) {
        if let Some(row) = self.analyse(properties, half_window_deg) {
            let row = TrackingRow {
                elapsed: elapsed_seconds(started, self.clock.now()),
                ..row
            };
            self.tracking.push(row);
            self.observer.on_tracked(&row);
        }
    }

    fn publish_progress(&self, percentage: f64) {
        self.monitor.set_percentage(percentage);
        let partial = self.monitor.snapshot();
        self.observer.on_progress(percentage, &partial);
    }

    /// Locates the resonance sample on the corrected transmission trace.
    fn analyse(&mut self, properties: &SweepProperties, half_window_deg: f64) -> Option<TrackingRow> {
        let s21 = self.monitor.snapshot().s21;
        let found = match properties.analysis_mode {
            AnalysisMode::FindPeak => find_peak(&s21, half_window_deg).or(self.tracked_index),
            AnalysisMode::TrackIndex => self
                .tracked_index
                .or_else(|| find_peak(&s21, half_window_deg)),
        };
        let index = found.filter(|&index| index < s21.len())?;
        self.tracked_index = Some(index);
        let row = TrackingRow::from_datapoint(&s21[index], 0.0);
        debug!(
            "Tracked {} Hz at {:.3} dB / {:.3} deg",
            row.frequency, row.gain_db, row.phase_deg
        );
        Some(row)
    }

    fn write_snapshot(&self, properties: &SweepProperties, pass: usize) -> AcquisitionResult<()> {
        let Some(dir) = &self.settings.snapshot_dir else {
            return Ok(());
        };
        let stem = if properties.name.is_empty() {
            "sweep"
        } else {
            properties.name.as_str()
        };
        let path = dir.join(format!("{}_{:04}.s2p", stem, pass));
        let result = self.monitor.snapshot();
        write_touchstone(BufWriter::new(File::create(&path)?), &result.s11, &result.s21)?;
        debug!("Wrote snapshot {}", path.display());
        Ok(())
    }

    /// Applies calibration and corrections to one averaged segment and
    /// writes it into the live result.
    fn store_segment(&mut self, offset: usize, segment: RawSegment) -> AcquisitionResult<()> {
        let raw_s11: Vec<Datapoint> = segment
            .frequencies
            .iter()
            .zip(&segment.s11)
            .map(|(&f, &z)| Datapoint::from_complex(f, z))
            .collect();
        let raw_s21: Vec<Datapoint> = segment
            .frequencies
            .iter()
            .zip(&segment.s21)
            .map(|(&f, &z)| Datapoint::from_complex(f, z))
            .collect();

        let (s11, s21) = {
            let calibration = self
                .calibration
                .read()
                .map_err(|_| SweepError::AcquisitionFailed("calibration lock poisoned".into()))?;
            self.settings.corrections.apply(&calibration, &raw_s11, &raw_s21)
        };
        self.monitor
            .update_result(|result| result.place_segment(offset, &raw_s11, &raw_s21, &s11, &s21));
        Ok(())
    }

    /// Reads a segment `averages` times and combines the repetitions.
    ///
    /// Returns `None` when a stop was requested between repetitions; the
    /// partial average is dropped.
    fn read_averaged_segment(
        &mut self,
        start: u64,
        end: u64,
        averages: usize,
        truncate: usize,
        (segment, segments): (usize, usize),
    ) -> AcquisitionResult<Option<RawSegment>> {
        let policy = self.settings.retry;
        let mut frequencies: Vec<u64> = Vec::new();
        let mut reps11: Vec<Vec<Complex64>> = Vec::new();
        let mut reps21: Vec<Vec<Complex64>> = Vec::new();

        for repetition in 0..averages {
            if repetition > 0 && self.monitor.stop_requested() {
                return Ok(None);
            }
            let mut data = RawSegment::empty();
            for attempt in 0..policy.segment_retries.max(1) {
                if attempt > 0 {
                    self.metrics.record_retry();
                    warn!("Empty segment {}-{} Hz, retry {}", start, end, attempt);
                    self.clock.sleep(policy.segment_backoff * attempt as u32);
                }
                data = self.read_segment(start, end)?;
                if !data.is_empty() {
                    break;
                }
            }

            if data.is_empty() {
                warn!("Segment {}-{} Hz returned no data, skipping repetition", start, end);
            } else if !frequencies.is_empty() && data.frequencies.len() != frequencies.len() {
                warn!(
                    "Repetition {} returned {} points instead of {}, skipping",
                    repetition,
                    data.frequencies.len(),
                    frequencies.len()
                );
            } else {
                if frequencies.is_empty() {
                    frequencies = data.frequencies;
                }
                reps11.push(data.s11);
                reps21.push(data.s21);
            }

            if averages > 1 {
                let done = segment * averages + repetition + 1;
                self.publish_progress(done as f64 / (segments * averages) as f64 * 100.0);
            }
        }

        if frequencies.is_empty() {
            return Err(SweepError::AcquisitionFailed(format!(
                "no data from device for segment {}-{} Hz",
                start, end
            )));
        }
        let s11 = average(&reps11, frequencies.len(), truncate);
        let s21 = average(&reps21, frequencies.len(), truncate);
        Ok(Some(RawSegment {
            frequencies,
            s11,
            s21,
        }))
    }

    /// Single read of one segment. Disagreeing channel lengths yield an
    /// empty segment.
    fn read_segment(&mut self, start: u64, end: u64) -> AcquisitionResult<RawSegment> {
        let instrument = self.instrument()?;
        instrument.set_sweep_range(start, end)?;
        let frequencies = instrument.read_frequencies()?;
        let s11 = self.read_channel_data(Channel::Reflection)?;
        let s21 = self.read_channel_data(Channel::Transmission)?;
        if s11.len() != frequencies.len() || s21.len() != frequencies.len() {
            warn!(
                "Channel length mismatch: {} frequencies, {} reflection, {} transmission",
                frequencies.len(),
                s11.len(),
                s21.len()
            );
            return Ok(RawSegment::empty());
        }
        Ok(RawSegment {
            frequencies,
            s11,
            s21,
        })
    }

    /// Reads a channel until it parses and passes range validation.
    fn read_channel_data(&mut self, channel: Channel) -> AcquisitionResult<Vec<Complex64>> {
        let policy = self.settings.retry;
        let mut rejected = 0usize;
        loop {
            let instrument = self.instrument()?;
            let validate = instrument.validate_input();
            let lines = instrument.read_channel(channel)?;
            let fault = match parse_channel(&lines, validate, policy.value_limit) {
                Ok(values) => return Ok(values),
                Err(fault) => fault,
            };

            rejected += 1;
            self.metrics.record_out_of_range();
            warn!("Rejected {} read {}: {}", channel, rejected, fault);
            if rejected >= policy.max_channel_reads {
                error!("Giving up on {} after {} reads", channel, rejected);
                return Err(SweepError::DataOutOfRange {
                    channel: channel.to_string(),
                    attempts: rejected,
                });
            }
            if rejected == policy.reconnect_after {
                self.log
                    .warn(&format!("Reconnecting after {} rejected {} reads", rejected, channel));
                self.metrics.record_reconnect();
                self.instrument()?.reconnect()?;
            }
            self.clock.sleep(policy.reread_delay);
        }
    }
}

/// Smallest frequency step of any segment of `plan`, in Hz.
fn smallest_step(plan: &SweepPlan) -> f64 {
    let points = plan.points_per_segment();
    if points < 2 {
        return plan.span() as f64;
    }
    (0..plan.segments())
        .map(|index| {
            let (start, end) = plan.segment_range(index);
            end.saturating_sub(start) as f64 / (points - 1) as f64
        })
        .fold(f64::INFINITY, f64::min)
}

fn average(repetitions: &[Vec<Complex64>], points: usize, truncate: usize) -> Vec<Complex64> {
    let rows = repetitions.len();
    let flat: Vec<Complex64> = repetitions.iter().flatten().copied().collect();
    let Ok(matrix) = Array2::from_shape_vec((rows, points), flat) else {
        return repetitions.first().cloned().unwrap_or_default();
    };
    let mean = if truncate > 0 && rows > 1 {
        StatsHelper::truncated_mean(matrix.view(), truncate)
    } else {
        StatsHelper::column_mean(matrix.view())
    };
    mean.to_vec()
}

fn elapsed_seconds(started: Instant, now: Instant) -> f64 {
    now.saturating_duration_since(started).as_secs_f64()
}
