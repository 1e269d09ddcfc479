//! Durable token storage.
//!
//! Every mutation of a single record is one conditional write keyed by id or
//! hash. Implementations must never read a record, decide, and then write it
//! back in a separate step.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AccessError;
use crate::models::token::{AccessToken, RevocationPatch, RevokeOutcome, TokenFilter};

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn create(&self, token: &AccessToken) -> Result<(), AccessError>;

    /// Atomically match a usable record by hash, record one use against it,
    /// and return the updated record. `None` when nothing matched.
    async fn validate_and_consume(
        &self,
        secret_hash: &str,
        now: DateTime<Utc>,
        origin: Option<&str>,
    ) -> Result<Option<AccessToken>, AccessError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccessToken>, AccessError>;

    /// Read-only lookup. Used for rejection diagnostics, never for decisions.
    async fn find_by_hash(&self, secret_hash: &str) -> Result<Option<AccessToken>, AccessError>;

    /// Flip `active` to false and write the revocation fields, only if the
    /// record is still active.
    async fn revoke_if_active(
        &self,
        id: Uuid,
        patch: &RevocationPatch,
    ) -> Result<RevokeOutcome, AccessError>;

    /// Deactivate every active record with `expires_at <= now`. Returns the
    /// number of records changed.
    async fn bulk_deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64, AccessError>;

    /// Newest first.
    async fn list(&self, filter: &TokenFilter) -> Result<Vec<AccessToken>, AccessError>;
}

/// Store whose backend is always down. Every call fails the way an exhausted
/// Postgres pool does.
#[cfg(test)]
pub(crate) struct FailingStore;

#[cfg(test)]
#[async_trait]
impl TokenStore for FailingStore {
    async fn create(&self, _token: &AccessToken) -> Result<(), AccessError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }

    async fn validate_and_consume(
        &self,
        _secret_hash: &str,
        _now: DateTime<Utc>,
        _origin: Option<&str>,
    ) -> Result<Option<AccessToken>, AccessError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }

    async fn find_by_id(&self, _id: Uuid) -> Result<Option<AccessToken>, AccessError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }

    async fn find_by_hash(&self, _secret_hash: &str) -> Result<Option<AccessToken>, AccessError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }

    async fn revoke_if_active(
        &self,
        _id: Uuid,
        _patch: &RevocationPatch,
    ) -> Result<RevokeOutcome, AccessError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }

    async fn bulk_deactivate_expired(&self, _now: DateTime<Utc>) -> Result<u64, AccessError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }

    async fn list(&self, _filter: &TokenFilter) -> Result<Vec<AccessToken>, AccessError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }
}
