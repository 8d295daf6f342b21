use log::debug;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::acquisition::peak::TrackingRow;
use crate::dataset::SweepResult;

/// Notifications pushed by the acquisition worker.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepEvent {
    Progress { percentage: f64, partial: SweepResult },
    Tracked(TrackingRow),
    Finished(SweepResult),
    Error(String),
}

pub trait SweepObserver: Send {
    fn on_progress(&self, percentage: f64, partial: &SweepResult);

    fn on_tracked(&self, _row: &TrackingRow) {}

    fn on_finished(&self, result: &SweepResult);

    fn on_error(&self, message: &str);
}

/// Observer that discards every event.
#[derive(Debug, Default)]
pub struct NullObserver;

impl SweepObserver for NullObserver {
    fn on_progress(&self, _percentage: f64, _partial: &SweepResult) {}

    fn on_finished(&self, _result: &SweepResult) {}

    fn on_error(&self, _message: &str) {}
}

/// Forwards events into an unbounded channel drained by the presenter.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: UnboundedSender<SweepEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, UnboundedReceiver<SweepEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: SweepEvent) {
        if self.tx.send(event).is_err() {
            debug!("Sweep event dropped, receiver closed");
        }
    }
}

impl SweepObserver for ChannelObserver {
    fn on_progress(&self, percentage: f64, partial: &SweepResult) {
        self.send(SweepEvent::Progress {
            percentage,
            partial: partial.clone(),
        });
    }

    fn on_tracked(&self, row: &TrackingRow) {
        self.send(SweepEvent::Tracked(*row));
    }

    fn on_finished(&self, result: &SweepResult) {
        self.send(SweepEvent::Finished(result.clone()));
    }

    fn on_error(&self, message: &str) {
        self.send(SweepEvent::Error(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_observer_forwards_in_order() {
        let (observer, mut rx) = ChannelObserver::new();
        let result = SweepResult::new("unit");
        observer.on_progress(50.0, &result);
        observer.on_error("boom");
        observer.on_finished(&result);

        assert!(matches!(rx.try_recv(), Ok(SweepEvent::Progress { percentage, .. }) if percentage == 50.0));
        assert_eq!(rx.try_recv().ok(), Some(SweepEvent::Error("boom".into())));
        assert!(matches!(rx.try_recv(), Ok(SweepEvent::Finished(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_receiver_is_not_an_error() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_error("nobody listening");
    }
}
