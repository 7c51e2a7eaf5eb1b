//! Credential store: one row per exchange, last write wins.
//!
//! Provides:
//! - [`CredentialStore`], the async seam the gateway depends on
//! - [`SqliteCredentialStore`], the pooled rusqlite implementation
//! - schema inspection for operational tooling

pub mod error;
pub mod inspect;
pub mod models;
pub mod sqlite;
pub mod traits;

pub use error::StoreError;
pub use inspect::SchemaReport;
pub use models::{CredentialRecord, CredentialSubmission, UpsertOutcome};
pub use sqlite::SqliteCredentialStore;
pub use traits::CredentialStore;
