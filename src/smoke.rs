//! End-to-end checks against a running gateway.
//!
//! Waits for the server to answer, then exercises the happy path, a
//! validation failure, and an auth failure. Used by `keyport smoke` after a
//! deploy.

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Token that must never authenticate.
pub const INVALID_TOKEN: &str = "keyport-smoke-invalid-token";

#[derive(Debug, Clone)]
pub struct SmokeOptions {
    /// Base URL without a trailing path, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    pub token: String,
    /// Readiness probes before giving up.
    pub attempts: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl SmokeOptions {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            attempts: 5,
            retry_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Outcome of one check.
#[derive(Debug, Clone)]
pub struct SmokeCheck {
    pub name: &'static str,
    pub expected: u16,
    /// Status returned by the server, `None` when the request itself failed.
    pub actual: Option<u16>,
    pub detail: String,
}

impl SmokeCheck {
    pub fn passed(&self) -> bool {
        self.actual == Some(self.expected)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SmokeReport {
    pub reachable: bool,
    pub checks: Vec<SmokeCheck>,
}

impl SmokeReport {
    pub fn passed(&self) -> bool {
        self.reachable && !self.checks.is_empty() && self.checks.iter().all(SmokeCheck::passed)
    }
}

/// Run every check. Transport failures are recorded in the report, not
/// returned as errors; only a client that cannot be built is an error.
pub async fn run_smoke(options: &SmokeOptions) -> Result<SmokeReport> {
    let client = Client::builder()
        .timeout(options.request_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let mut report = SmokeReport {
        reachable: wait_for_server(&client, options).await,
        checks: Vec::new(),
    };
    if !report.reachable {
        return Ok(report);
    }

    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");

    report.checks.push(
        check(
            "connection",
            StatusCode::OK,
            client
                .get(options.url("/api/test"))
                .bearer_auth(&options.token),
        )
        .await,
    );
    report.checks.push(
        check(
            "submit keys",
            StatusCode::OK,
            client
                .post(options.url("/api/keys"))
                .bearer_auth(&options.token)
                .json(&serde_json::json!({
                    "exchange": "binance",
                    "api_key": format!("smoke_key_{stamp}"),
                    "api_secret": format!("smoke_secret_{stamp}"),
                })),
        )
        .await,
    );
    report.checks.push(
        check(
            "missing api_secret",
            StatusCode::BAD_REQUEST,
            client
                .post(options.url("/api/keys"))
                .bearer_auth(&options.token)
                .json(&serde_json::json!({
                    "exchange": "binance",
                    "api_key": format!("smoke_key_{stamp}"),
                })),
        )
        .await,
    );
    report.checks.push(
        check(
            "wrong token",
            StatusCode::UNAUTHORIZED,
            client
                .get(options.url("/api/test"))
                .bearer_auth(INVALID_TOKEN),
        )
        .await,
    );

    Ok(report)
}

/// Any HTTP answer counts as up; only transport errors are retried.
async fn wait_for_server(client: &Client, options: &SmokeOptions) -> bool {
    for attempt in 1..=options.attempts {
        match client.get(options.url("/api/test")).send().await {
            Ok(_) => return true,
            Err(e) => {
                tracing::info!(attempt, max = options.attempts, "Server not reachable yet: {e}");
                if attempt < options.attempts {
                    tokio::time::sleep(options.retry_delay).await;
                }
            }
        }
    }
    false
}

async fn check(
    name: &'static str,
    expected: StatusCode,
    request: reqwest::RequestBuilder,
) -> SmokeCheck {
    let (actual, detail) = match request.send().await {
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            (Some(status.as_u16()), body)
        }
        Err(e) => (None, e.to_string()),
    };
    SmokeCheck {
        name,
        expected: expected.as_u16(),
        actual,
        detail,
    }
}
