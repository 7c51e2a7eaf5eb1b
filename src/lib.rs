//! keyport: a small authenticated HTTP service that stores exchange API
//! credentials, one record per exchange, last write wins.

pub mod config;
pub mod credentials;
pub mod gateway;
pub mod logging;
pub mod observability;
pub mod smoke;
