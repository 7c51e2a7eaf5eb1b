use super::error::StoreError;
use super::models::{CredentialRecord, CredentialSubmission, UpsertOutcome};
use async_trait::async_trait;

/// Durable, idempotent persistence of exchange credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Create the backing table and its unique index if absent.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Insert or overwrite the record for `submission.exchange`.
    ///
    /// Last writer wins. `created_at` is only ever set by the first insert.
    async fn upsert(&self, submission: &CredentialSubmission) -> Result<UpsertOutcome, StoreError>;

    async fn get(&self, exchange: &str) -> Result<Option<CredentialRecord>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    /// Acquire a connection, run a trivial query, release it.
    async fn check_connectivity(&self) -> Result<(), StoreError>;

    fn name(&self) -> &str;
}
