use super::traits::{Observer, ObserverEvent, ObserverMetric};
use parking_lot::Mutex;

/// Keeps everything it is handed so tests can assert on it.
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<ObserverEvent>>,
    pub metrics: Mutex<Vec<ObserverMetric>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<ObserverEvent> {
        self.events.lock().clone()
    }

    /// Debug rendering of every recorded event, for "never logged" checks.
    pub fn rendered(&self) -> String {
        self.events
            .lock()
            .iter()
            .map(|e| format!("{e:?}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Observer for RecordingObserver {
    fn record_event(&self, event: &ObserverEvent) {
        self.events.lock().push(event.clone());
    }

    fn record_metric(&self, metric: &ObserverMetric) {
        self.metrics.lock().push(metric.clone());
    }

    fn name(&self) -> &str {
        "recording"
    }
}
