use anyhow::{ensure, Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// File the configuration was read from, if any.
    #[serde(skip)]
    #[schemars(skip)]
    pub config_path: Option<PathBuf>,
    pub gateway: GatewayConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// HTTP gateway settings.
#[derive(Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Shared bearer secret. Required by `serve`; there is no built-in value.
    pub auth_token: Option<String>,
    /// Origins allowed by CORS. `"*"` allows any origin.
    pub allowed_origins: Vec<String>,
    /// Upper bound for a whole request, in seconds.
    pub request_timeout_secs: u64,
    /// Upper bound for a single storage operation, in seconds.
    pub storage_timeout_secs: u64,
    pub max_body_bytes: usize,
    /// Serve Prometheus counters on `GET /metrics`.
    pub metrics_enabled: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            auth_token: None,
            allowed_origins: vec!["http://localhost:3000".into()],
            request_timeout_secs: 30,
            storage_timeout_secs: 5,
            max_body_bytes: 65_536,
            metrics_enabled: true,
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("allowed_origins", &self.allowed_origins)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("storage_timeout_secs", &self.storage_timeout_secs)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("metrics_enabled", &self.metrics_enabled)
            .finish()
    }
}

/// SQLite storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Explicit database file. When unset, `<data dir>/<name>.db` is used.
    pub path: Option<PathBuf>,
    pub name: String,
    pub pool_size: u32,
    /// How long to wait for a pooled connection, in seconds.
    pub connect_timeout_secs: u64,
    /// SQLite busy handler timeout, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            name: "trading_system".into(),
            pool_size: 4,
            connect_timeout_secs: 5,
            busy_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    /// Database file the store should open.
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        let file_name = format!("{}.db", self.name);
        match directories::ProjectDirs::from("", "", "keyport") {
            Some(dirs) => dirs.data_dir().join(file_name),
            None => PathBuf::from(file_name),
        }
    }
}

/// Log sink settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    pub level: String,
    /// Optional file receiving a plain-text copy of every log line.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: None,
        }
    }
}

/// Location of the config file when `--config` is not given.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "keyport").map(|d| d.config_dir().join("config.toml"))
}

impl Config {
    /// Build the startup configuration.
    ///
    /// An explicit path must exist. Without one, the default location is used
    /// when present, otherwise built-in defaults. Environment overrides are
    /// applied last and the result is validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::from_toml_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `KEYPORT_*` overrides using `lookup` as the variable source.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = non_empty("KEYPORT_HOST") {
            self.gateway.host = host;
        }
        if let Some(port) = non_empty("KEYPORT_PORT") {
            self.gateway.port = port
                .trim()
                .parse()
                .with_context(|| format!("KEYPORT_PORT is not a valid port: {port}"))?;
        }
        if let Some(token) = non_empty("KEYPORT_AUTH_TOKEN") {
            self.gateway.auth_token = Some(token);
        }
        if let Some(origins) = non_empty("KEYPORT_ALLOWED_ORIGINS") {
            self.gateway.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(path) = non_empty("KEYPORT_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(name) = non_empty("KEYPORT_DB_NAME") {
            self.database.name = name;
        }
        if let Some(level) = non_empty("KEYPORT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(file) = non_empty("KEYPORT_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(file));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.gateway.request_timeout_secs > 0,
            "gateway.request_timeout_secs must be greater than zero"
        );
        ensure!(
            self.gateway.storage_timeout_secs > 0,
            "gateway.storage_timeout_secs must be greater than zero"
        );
        ensure!(
            self.gateway.max_body_bytes > 0,
            "gateway.max_body_bytes must be greater than zero"
        );
        ensure!(self.database.pool_size > 0, "database.pool_size must be greater than zero");
        ensure!(
            self.database.connect_timeout_secs > 0,
            "database.connect_timeout_secs must be greater than zero"
        );
        ensure!(
            self.database.path.is_some() || !self.database.name.trim().is_empty(),
            "database.name must not be empty when database.path is unset"
        );
        if let Some(token) = &self.gateway.auth_token {
            ensure!(!token.trim().is_empty(), "gateway.auth_token must not be blank");
        }
        Ok(())
    }

    /// The shared bearer secret, or an error explaining how to provide one.
    pub fn require_auth_token(&self) -> Result<&str> {
        self.gateway.auth_token.as_deref().context(
            "No auth token configured. Set gateway.auth_token in config.toml \
             or the KEYPORT_AUTH_TOKEN environment variable.",
        )
    }

    /// JSON schema of the configuration file.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(Config)).unwrap_or_default()
    }
}
