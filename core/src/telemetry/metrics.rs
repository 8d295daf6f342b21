use std::sync::Mutex;

/// Counters accumulated over the lifetime of an acquisition engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepCounters {
    pub segments: usize,
    pub retries: usize,
    pub reconnects: usize,
    pub out_of_range: usize,
    pub errors: usize,
}

#[derive(Debug, Default)]
pub struct SweepMetrics {
    inner: Mutex<SweepCounters>,
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, apply: impl FnOnce(&mut SweepCounters)) {
        if let Ok(mut counters) = self.inner.lock() {
            apply(&mut counters);
        }
    }

    pub fn record_segment(&self) {
        self.update(|c| c.segments += 1);
    }

    pub fn record_retry(&self) {
        self.update(|c| c.retries += 1);
    }

    pub fn record_reconnect(&self) {
        self.update(|c| c.reconnects += 1);
    }

    pub fn record_out_of_range(&self) {
        self.update(|c| c.out_of_range += 1);
    }

    pub fn record_error(&self) {
        self.update(|c| c.errors += 1);
    }

    pub fn snapshot(&self) -> SweepCounters {
        self.inner.lock().map(|c| *c).unwrap_or_default()
    }
}
