use crate::presenter::model::PresentationModel;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};
use vnacore::acquisition::{SweepEvent, TrackingRow};
use vnacore::sweep::format_frequency;

/// Prints sweep progress and holds the last published model.
#[derive(Clone)]
pub struct Console {
    state: Arc<RwLock<PresentationModel>>,
    last_step: Arc<RwLock<i64>>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PresentationModel::default())),
            last_step: Arc::new(RwLock::new(-1)),
        }
    }

    pub fn publish(&self, model: &PresentationModel) {
        if let Ok(mut guard) = self.state.write() {
            *guard = model.clone();
        }
        println!("[VNA] {}", model.summary());
        for marker in &model.markers {
            println!(
                "[VNA]   {} {}: {:.2} dB, {:.1} deg, {:.3} ns",
                marker.label,
                format_frequency(marker.frequency),
                marker.gain_db,
                marker.phase_deg,
                marker.group_delay_ns
            );
        }
    }

    pub fn publish_status(&self, message: &str) {
        println!("[VNA] {}", message);
    }

    /// Prints progress in 10% steps and returns true when a line was printed.
    pub fn publish_progress(&self, percentage: f64) -> bool {
        let step = (percentage / 10.0).floor() as i64;
        let Ok(mut last) = self.last_step.write() else {
            return false;
        };
        if step <= *last {
            return false;
        }
        *last = step;
        println!("[VNA] sweep {:>3.0}%", percentage);
        true
    }

    pub fn publish_tracked(&self, row: &TrackingRow) {
        println!(
            "[VNA] peak {} {:.3} dB {:.2} deg at {:.1} s",
            format_frequency(row.frequency),
            row.gain_db,
            row.phase_deg,
            row.elapsed
        );
    }

    /// Routes one engine event to the matching printer.
    pub fn handle(&self, event: &SweepEvent) {
        match event {
            SweepEvent::Progress { percentage, .. } => {
                self.publish_progress(*percentage);
            }
            SweepEvent::Tracked(row) => self.publish_tracked(row),
            SweepEvent::Finished(result) => {
                self.reset_progress();
                self.publish_status(&format!("sweep finished, {} points", result.len()));
            }
            SweepEvent::Error(message) => {
                self.reset_progress();
                eprintln!("[VNA] sweep failed: {}", message);
            }
        }
    }

    pub fn reset_progress(&self) {
        if let Ok(mut last) = self.last_step.write() {
            *last = -1;
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let model = self.snapshot();
        let text = serde_json::to_string_pretty(&model).context("serializing presentation model")?;
        fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn snapshot(&self) -> PresentationModel {
        self.state
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
