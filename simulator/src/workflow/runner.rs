use crate::generator::profile::{Fixture, SimulatedVna, Termination};
use crate::presenter::console::Console;
use crate::presenter::model::PresentationModel;
use crate::workflow::config::WorkflowConfig;
use anyhow::{bail, Context};
use log::info;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use vnacore::acquisition::{
    Channel, ChannelObserver, EngineSettings, EngineState, SweepMonitor, SweepWorker, TrackingRow,
};
use vnacore::calibration::{Calibration, CalibrationStandard, SharedCalibration};
use vnacore::markers::MarkerRegistry;
use vnacore::prelude::SweepConfig;
use vnacore::sweep::SweepMode;
use vnacore::touchstone::{
    read_touchstone, write_gain_phase_table, write_touchstone, write_tracking_table,
};
use vnacore::{AcquisitionEngine, Dataset, SweepResult};

const EVENT_POLL: Duration = Duration::from_millis(20);

pub struct WorkflowResult {
    pub state: EngineState,
    pub result: SweepResult,
    pub tracking: Vec<TrackingRow>,
    pub model: PresentationModel,
}

/// Drives the simulated analyzer through calibration and the DUT sweep.
pub struct Runner {
    config: WorkflowConfig,
    engine: Option<AcquisitionEngine>,
    calibration: SharedCalibration,
    fixture: Fixture,
    monitor: Arc<SweepMonitor>,
    console: Console,
    markers: MarkerRegistry,
}

impl Runner {
    pub fn new(config: WorkflowConfig, console: Console) -> anyhow::Result<Self> {
        let calibration = match &config.calibration.load {
            Some(path) => {
                let mut loaded = Calibration::load(path)
                    .with_context(|| format!("loading calibration {}", path.display()))?;
                loaded
                    .calculate_corrections()
                    .with_context(|| format!("calculating corrections from {}", path.display()))?;
                loaded
            }
            None => Calibration::new(),
        };
        let calibration: SharedCalibration = Arc::new(RwLock::new(calibration));

        let (vna, fixture) = SimulatedVna::new(config.device.clone());
        let settings = EngineSettings {
            corrections: config.to_corrections(),
            snapshot_dir: config.outputs.snapshot_dir.clone(),
            ..Default::default()
        };
        let mut engine = AcquisitionEngine::new(Arc::clone(&calibration)).with_settings(settings);
        engine.attach(Box::new(vna));
        let monitor = engine.monitor();

        let mut markers = MarkerRegistry::new();
        for frequency in config.marker_frequencies()? {
            markers.add(frequency);
        }

        Ok(Self {
            config,
            engine: Some(engine),
            calibration,
            fixture,
            monitor,
            console,
            markers,
        })
    }

    /// Shared run handle; `request_stop` on it interrupts the current sweep.
    pub fn monitor(&self) -> Arc<SweepMonitor> {
        Arc::clone(&self.monitor)
    }

    pub fn calibration(&self) -> SharedCalibration {
        Arc::clone(&self.calibration)
    }

    fn engine_mut(&mut self) -> anyhow::Result<&mut AcquisitionEngine> {
        self.engine
            .as_mut()
            .context("acquisition engine is busy with another run")
    }

    /// Measures every standard on the fixture, then fits the error terms.
    pub fn calibrate(&mut self) -> anyhow::Result<()> {
        let mut sweep = self.config.to_sweep_config()?;
        sweep.properties.mode = SweepMode::Single;

        self.calibration
            .write()
            .map_err(|_| anyhow::anyhow!("calibration lock poisoned"))?
            .reset();

        for standard in CalibrationStandard::ALL {
            self.console
                .publish_status(&format!("Measuring {} standard", standard));
            self.fixture.connect(Termination::for_standard(standard));
            let mut request = sweep.clone();
            request.properties.name = standard.name().to_string();

            let state = self
                .engine_mut()?
                .run(request)
                .with_context(|| format!("sweeping {} standard", standard))?;
            if state != EngineState::Finished {
                bail!("calibration interrupted while measuring {}", standard);
            }
            let result = self.monitor.snapshot();
            let readings = match standard.channel() {
                Channel::Reflection => result.raw_s11,
                Channel::Transmission => result.raw_s21,
            };
            self.calibration
                .write()
                .map_err(|_| anyhow::anyhow!("calibration lock poisoned"))?
                .insert(standard, &readings);
        }
        self.fixture.connect(Termination::Dut);

        let mut calibration = self
            .calibration
            .write()
            .map_err(|_| anyhow::anyhow!("calibration lock poisoned"))?;
        calibration.source = "Guided".to_string();
        calibration
            .calculate_corrections()
            .context("calculating corrections")?;
        self.console.publish_status(&format!(
            "Calibrated at {} frequencies",
            calibration.frequencies().count()
        ));
        if let Some(path) = &self.config.calibration.save {
            calibration
                .save(path)
                .with_context(|| format!("saving calibration {}", path.display()))?;
            self.console
                .publish_status(&format!("Calibration saved to {}", path.display()));
        }
        Ok(())
    }

    /// Sweeps the device under test on a worker thread and writes the outputs.
    pub fn execute(&mut self) -> anyhow::Result<WorkflowResult> {
        let sweep = self.config.to_sweep_config()?;
        self.fixture.connect(Termination::Dut);
        let state = self.sweep_on_worker(&sweep)?;

        let result = self.monitor.snapshot();
        let tracking = match &self.engine {
            Some(engine) => engine.tracking().to_vec(),
            None => Vec::new(),
        };
        self.write_outputs(&sweep, &result, &tracking)?;

        let mut dataset = Dataset::new(self.monitor.result());
        if let Some(path) = &self.config.outputs.reference {
            dataset.set_reference_from(load_reference(path)?);
        }
        let model = PresentationModel::from_dataset(&dataset, &mut self.markers, &tracking);
        self.console.publish(&model);

        Ok(WorkflowResult {
            state,
            result,
            tracking,
            model,
        })
    }

    fn sweep_on_worker(&mut self, sweep: &SweepConfig) -> anyhow::Result<EngineState> {
        let engine = self
            .engine
            .take()
            .context("acquisition engine is busy with another run")?;
        let (observer, mut events) = ChannelObserver::new();
        let engine = engine.with_observer(Box::new(observer));
        self.console.reset_progress();

        let shared = sweep.clone().shared();
        let worker = SweepWorker::spawn(engine, &shared).context("spawning sweep worker")?;
        loop {
            match events.try_recv() {
                Ok(event) => self.console.handle(&event),
                Err(TryRecvError::Empty) if worker.is_finished() => break,
                Err(TryRecvError::Empty) => thread::sleep(EVENT_POLL),
                Err(TryRecvError::Disconnected) => break,
            }
        }
        let (engine, outcome) = worker.join().context("joining sweep worker")?;
        self.engine = Some(engine);
        while let Ok(event) = events.try_recv() {
            self.console.handle(&event);
        }

        let state = outcome.context("sweeping device under test")?;
        if state == EngineState::Stopped {
            self.console.publish_status("Sweep stopped");
        }
        Ok(state)
    }

    fn write_outputs(
        &self,
        sweep: &SweepConfig,
        result: &SweepResult,
        tracking: &[TrackingRow],
    ) -> anyhow::Result<()> {
        if let Some(path) = &self.config.outputs.touchstone {
            let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            write_touchstone(BufWriter::new(file), &result.s11, &result.s21)
                .with_context(|| format!("writing {}", path.display()))?;
            self.console
                .publish_status(&format!("Touchstone written to {}", path.display()));
        }
        if let Some(path) = &self.config.outputs.table {
            let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            let written = if sweep.properties.is_repeating() {
                write_tracking_table(BufWriter::new(file), tracking, true)
            } else {
                write_gain_phase_table(BufWriter::new(file), &result.s21)
            };
            written.with_context(|| format!("writing {}", path.display()))?;
            self.console
                .publish_status(&format!("Table written to {}", path.display()));
        }
        Ok(())
    }
}

fn load_reference(path: &Path) -> anyhow::Result<SweepResult> {
    let file = File::open(path).with_context(|| format!("opening reference {}", path.display()))?;
    let data = read_touchstone(BufReader::new(file))
        .with_context(|| format!("parsing reference {}", path.display()))?;
    let source = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    info!("Loaded reference {} ({} points)", source, data.s11.len());
    Ok(SweepResult::from_channels(data.s11, data.s21, source))
}
