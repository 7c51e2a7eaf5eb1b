use super::traits::{Observer, ObserverEvent, ObserverMetric};
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Prometheus counters over the request path, kept in a private registry.
pub struct PrometheusObserver {
    registry: Registry,
    auth_rejections: IntCounterVec,
    validation_rejections: IntCounter,
    credentials_saved: IntCounterVec,
    storage_failures: IntCounterVec,
    connectivity_checks: IntCounterVec,
    storage_latency: HistogramVec,
}

impl PrometheusObserver {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("keyport".into()), None)?;

        let auth_rejections = IntCounterVec::new(
            Opts::new("auth_rejections_total", "Requests rejected by bearer auth"),
            &["reason"],
        )?;
        let validation_rejections = IntCounter::new(
            "validation_rejections_total",
            "Credential submissions rejected by payload validation",
        )?;
        let credentials_saved = IntCounterVec::new(
            Opts::new("credentials_saved_total", "Successful credential upserts"),
            &["outcome"],
        )?;
        let storage_failures = IntCounterVec::new(
            Opts::new("storage_failures_total", "Failed or timed-out storage operations"),
            &["operation", "kind"],
        )?;
        let connectivity_checks = IntCounterVec::new(
            Opts::new("connectivity_checks_total", "Database liveness probes"),
            &["result"],
        )?;
        let storage_latency = HistogramVec::new(
            HistogramOpts::new("storage_latency_seconds", "Storage operation latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;

        registry.register(Box::new(auth_rejections.clone()))?;
        registry.register(Box::new(validation_rejections.clone()))?;
        registry.register(Box::new(credentials_saved.clone()))?;
        registry.register(Box::new(storage_failures.clone()))?;
        registry.register(Box::new(connectivity_checks.clone()))?;
        registry.register(Box::new(storage_latency.clone()))?;

        Ok(Self {
            registry,
            auth_rejections,
            validation_rejections,
            credentials_saved,
            storage_failures,
            connectivity_checks,
            storage_latency,
        })
    }

    /// Text exposition format of every registered metric.
    pub fn encode(&self) -> prometheus::Result<String> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

impl Observer for PrometheusObserver {
    fn record_event(&self, event: &ObserverEvent) {
        match event {
            ObserverEvent::AuthRejected { reason, .. } => {
                self.auth_rejections
                    .with_label_values(&[reason.as_str()])
                    .inc();
            }
            ObserverEvent::ValidationRejected { .. } => self.validation_rejections.inc(),
            ObserverEvent::CredentialsSaved { created, .. } => {
                let outcome = if *created { "created" } else { "updated" };
                self.credentials_saved.with_label_values(&[outcome]).inc();
            }
            ObserverEvent::StorageFailed { operation, .. } => {
                self.storage_failures
                    .with_label_values(&[operation.as_str(), "error"])
                    .inc();
            }
            ObserverEvent::StorageTimedOut { operation } => {
                self.storage_failures
                    .with_label_values(&[operation.as_str(), "timeout"])
                    .inc();
            }
            ObserverEvent::ConnectivityChecked { healthy } => {
                let result = if *healthy { "ok" } else { "failed" };
                self.connectivity_checks.with_label_values(&[result]).inc();
            }
        }
    }

    fn record_metric(&self, metric: &ObserverMetric) {
        match metric {
            ObserverMetric::StorageLatency {
                operation,
                duration,
            } => {
                self.storage_latency
                    .with_label_values(&[operation.as_str()])
                    .observe(duration.as_secs_f64());
            }
        }
    }

    fn name(&self) -> &str {
        "prometheus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{AuthFailure, StorageOp};
    use std::time::Duration;

    #[test]
    fn counts_show_up_in_exposition() {
        let observer = PrometheusObserver::new().unwrap();
        observer.record_event(&ObserverEvent::AuthRejected {
            reason: AuthFailure::InvalidToken,
            token_hint: Some("wrong-…".into()),
        });
        observer.record_event(&ObserverEvent::CredentialsSaved {
            exchange: "binance".into(),
            created: true,
        });
        observer.record_event(&ObserverEvent::StorageTimedOut {
            operation: StorageOp::Connectivity,
        });
        observer.record_metric(&ObserverMetric::StorageLatency {
            operation: StorageOp::Upsert,
            duration: Duration::from_millis(2),
        });

        let text = observer.encode().unwrap();
        assert!(text.contains("keyport_auth_rejections_total{reason=\"invalid_token\"} 1"));
        assert!(text.contains("keyport_credentials_saved_total{outcome=\"created\"} 1"));
        assert!(text.contains(
            "keyport_storage_failures_total{kind=\"timeout\",operation=\"connectivity\"} 1"
        ));
        assert!(text.contains("keyport_storage_latency_seconds_count{operation=\"upsert\"} 1"));
    }

    #[test]
    fn exposition_never_contains_token_hints() {
        let observer = PrometheusObserver::new().unwrap();
        observer.record_event(&ObserverEvent::AuthRejected {
            reason: AuthFailure::InvalidToken,
            token_hint: Some("secret-…".into()),
        });
        assert!(!observer.encode().unwrap().contains("secret"));
    }
}
