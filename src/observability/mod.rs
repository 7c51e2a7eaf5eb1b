//! Injected observability for the gateway and the credential store.
//!
//! Request-path code never logs directly; it reports [`ObserverEvent`]s and
//! [`ObserverMetric`]s to an [`Observer`]. The log sink, the Prometheus
//! registry and test recorders are all just implementations.

pub mod log;
pub mod multi;
pub mod noop;
pub mod prometheus;
#[cfg(test)]
pub mod recording;
pub mod traits;

pub use self::log::LogObserver;
pub use multi::MultiObserver;
pub use noop::NoopObserver;
pub use self::prometheus::PrometheusObserver;
pub use traits::{AuthFailure, Observer, ObserverEvent, ObserverMetric, StorageOp};

use std::sync::Arc;

/// The observer stack used by `serve`: logs always, Prometheus when enabled.
///
/// Returns the Prometheus handle separately so the gateway can expose it.
pub fn create_observer(
    metrics_enabled: bool,
) -> ::prometheus::Result<(Arc<dyn Observer>, Option<Arc<PrometheusObserver>>)> {
    let log: Arc<dyn Observer> = Arc::new(LogObserver::new());
    if !metrics_enabled {
        return Ok((log, None));
    }

    let metrics = Arc::new(PrometheusObserver::new()?);
    let observer: Arc<dyn Observer> = Arc::new(MultiObserver::new(vec![log, metrics.clone()]));
    Ok((observer, Some(metrics)))
}
