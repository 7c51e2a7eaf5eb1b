//! Runtime configuration.
//!
//! A single [`Config`] is built at startup (defaults, then the TOML file,
//! then `KEYPORT_*` environment overrides, then CLI flags) and handed by
//! reference to the gateway and the credential store. Nothing below this
//! module reads the environment.

pub mod schema;

pub use schema::{Config, DatabaseConfig, GatewayConfig, LoggingConfig};
