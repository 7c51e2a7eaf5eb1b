use std::time::Duration;

/// Storage operation an event or metric refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    EnsureSchema,
    Upsert,
    Lookup,
    Connectivity,
}

impl StorageOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnsureSchema => "ensure_schema",
            Self::Upsert => "upsert",
            Self::Lookup => "lookup",
            Self::Connectivity => "connectivity",
        }
    }
}

/// Why a request failed bearer authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingHeader,
    MalformedHeader,
    InvalidToken,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingHeader => "missing_header",
            Self::MalformedHeader => "malformed_header",
            Self::InvalidToken => "invalid_token",
        }
    }
}

/// Discrete things worth reporting from the request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    /// `token_hint` is a bounded prefix, never the full token.
    AuthRejected {
        reason: AuthFailure,
        token_hint: Option<String>,
    },
    ValidationRejected {
        detail: String,
    },
    CredentialsSaved {
        exchange: String,
        created: bool,
    },
    /// The write (if any) was rolled back before this was reported.
    StorageFailed {
        operation: StorageOp,
        detail: String,
    },
    StorageTimedOut {
        operation: StorageOp,
    },
    ConnectivityChecked {
        healthy: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverMetric {
    StorageLatency {
        operation: StorageOp,
        duration: Duration,
    },
}

/// Sink for gateway and store telemetry.
pub trait Observer: Send + Sync + 'static {
    fn record_event(&self, event: &ObserverEvent);

    fn record_metric(&self, metric: &ObserverMetric);

    fn name(&self) -> &str;
}
