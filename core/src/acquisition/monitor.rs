use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::dataset::{SharedSweepResult, SweepResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Running,
    Finished,
    Error,
    Stopped,
}

impl EngineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EngineState::Finished | EngineState::Error | EngineState::Stopped
        )
    }
}

#[derive(Debug, Clone, Default)]
struct RunStatus {
    state: EngineState,
    percentage: f64,
    error: Option<String>,
}

/// Handle shared between the acquisition worker and its readers.
///
/// The worker is the only writer of status and live result; the stop flag is
/// the only thing readers write.
#[derive(Debug, Default)]
pub struct SweepMonitor {
    stop: AtomicBool,
    status: RwLock<RunStatus>,
    result: SharedSweepResult,
}

impl SweepMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_stop(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    pub fn state(&self) -> EngineState {
        self.status.read().map(|s| s.state).unwrap_or_default()
    }

    pub fn percentage(&self) -> f64 {
        self.status.read().map(|s| s.percentage).unwrap_or_default()
    }

    pub fn error_message(&self) -> Option<String> {
        self.status.read().ok().and_then(|s| s.error.clone())
    }

    pub fn result(&self) -> SharedSweepResult {
        Arc::clone(&self.result)
    }

    /// Copy of the live result taken under a short read lock.
    pub fn snapshot(&self) -> SweepResult {
        match self.result.read() {
            Ok(result) => result.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set_state(&self, state: EngineState) {
        if let Ok(mut status) = self.status.write() {
            status.state = state;
        }
    }

    pub(crate) fn set_percentage(&self, percentage: f64) {
        if let Ok(mut status) = self.status.write() {
            status.percentage = percentage;
        }
    }

    /// Clears the stop flag before reporting `Running`, so a stop issued
    /// once `Running` is visible is never lost.
    pub(crate) fn begin_run(&self) {
        self.clear_stop();
        if let Ok(mut status) = self.status.write() {
            *status = RunStatus {
                state: EngineState::Running,
                percentage: 0.0,
                error: None,
            };
        }
    }

    pub(crate) fn fail(&self, message: String) {
        if let Ok(mut status) = self.status.write() {
            status.state = EngineState::Error;
            status.error = Some(message);
        }
    }

    pub(crate) fn update_result<T>(&self, apply: impl FnOnce(&mut SweepResult) -> T) -> T {
        match self.result.write() {
            Ok(mut result) => apply(&mut result),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_run_clears_previous_failure_and_stop() {
        let monitor = SweepMonitor::new();
        monitor.fail("device gone".into());
        monitor.request_stop();
        assert_eq!(monitor.state(), EngineState::Error);

        monitor.begin_run();
        assert_eq!(monitor.state(), EngineState::Running);
        assert!(!monitor.stop_requested());
        assert!(monitor.error_message().is_none());
        assert!(!monitor.state().is_terminal());
    }
}
