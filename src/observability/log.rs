use super::traits::{Observer, ObserverEvent, ObserverMetric};

/// Writes every event as a structured `tracing` record.
pub struct LogObserver;

impl LogObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer for LogObserver {
    fn record_event(&self, event: &ObserverEvent) {
        match event {
            ObserverEvent::AuthRejected { reason, token_hint } => {
                tracing::warn!(
                    reason = reason.as_str(),
                    token = token_hint.as_deref().unwrap_or("-"),
                    "Rejected request with bad authorization"
                );
            }
            ObserverEvent::ValidationRejected { detail } => {
                tracing::warn!(%detail, "Rejected credential submission");
            }
            ObserverEvent::CredentialsSaved { exchange, created } => {
                tracing::info!(
                    %exchange,
                    created = *created,
                    "Saved API credentials"
                );
            }
            ObserverEvent::StorageFailed { operation, detail } => {
                tracing::error!(
                    operation = operation.as_str(),
                    error = %detail,
                    "Storage operation failed"
                );
            }
            ObserverEvent::StorageTimedOut { operation } => {
                tracing::error!(
                    operation = operation.as_str(),
                    "Storage operation timed out"
                );
            }
            ObserverEvent::ConnectivityChecked { healthy } => {
                if *healthy {
                    tracing::debug!("Database connectivity check passed");
                } else {
                    tracing::warn!("Database connectivity check failed");
                }
            }
        }
    }

    fn record_metric(&self, metric: &ObserverMetric) {
        match metric {
            ObserverMetric::StorageLatency {
                operation,
                duration,
            } => {
                tracing::trace!(
                    operation = operation.as_str(),
                    elapsed_ms = duration.as_millis() as u64,
                    "Storage latency"
                );
            }
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}
