use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error};

use crate::acquisition::engine::AcquisitionEngine;
use crate::acquisition::monitor::{EngineState, SweepMonitor};
use crate::prelude::{AcquisitionResult, SharedSweepConfig, SweepError};

type WorkerOutput = (AcquisitionEngine, AcquisitionResult<EngineState>);

/// One acquisition run on a dedicated thread.
///
/// The engine moves onto the thread and comes back from `join`, so only one
/// run per engine can be in flight.
pub struct SweepWorker {
    monitor: Arc<SweepMonitor>,
    handle: JoinHandle<WorkerOutput>,
}

impl SweepWorker {
    /// Snapshots `config` and starts the run.
    pub fn spawn(mut engine: AcquisitionEngine, config: &SharedSweepConfig) -> AcquisitionResult<Self> {
        let snapshot = config
            .lock()
            .map_err(|_| SweepError::AcquisitionFailed("sweep configuration lock poisoned".into()))?
            .clone();
        let monitor = engine.monitor();
        let handle = thread::Builder::new()
            .name("sweep-worker".into())
            .spawn(move || {
                debug!("Sweep worker started");
                let outcome = engine.run(snapshot);
                (engine, outcome)
            })?;
        Ok(Self { monitor, handle })
    }

    pub fn monitor(&self) -> Arc<SweepMonitor> {
        Arc::clone(&self.monitor)
    }

    /// Asks the run to stop at its next checkpoint.
    pub fn stop(&self) {
        self.monitor.request_stop();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the run and hands the engine back with its outcome.
    pub fn join(self) -> AcquisitionResult<WorkerOutput> {
        self.handle.join().map_err(|_| {
            error!("Sweep worker panicked");
            SweepError::AcquisitionFailed("sweep worker panicked".into())
        })
    }
}
