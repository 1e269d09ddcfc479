//! Auditor access token lifecycle: issue, validate, authorize, revoke, sweep.

pub mod issuer;
pub mod revocation;
pub mod scope;
pub mod validator;

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::errors::AccessError;
use crate::jobs::expiry::ExpirySweeper;
use crate::models::token::{AccessToken, TokenFilter, TokenSummary};
use crate::store::TokenStore;

pub use issuer::{IssueRequest, IssuedToken, TokenIssuer};
pub use revocation::RevocationManager;
pub use scope::{ResourceRef, ScopeDecision};
pub use validator::{TokenValidator, ValidatedToken};

pub const DEFAULT_MAX_LIFETIME_DAYS: i64 = 90;

/// Handle bundling every lifecycle component over one store and audit sink.
/// Cheap to clone; holds no per-request state.
#[derive(Clone)]
pub struct AccessTokens {
    store: Arc<dyn TokenStore>,
    issuer: Arc<TokenIssuer>,
    validator: Arc<TokenValidator>,
    revocation: Arc<RevocationManager>,
    sweeper: ExpirySweeper,
}

impl AccessTokens {
    pub fn new(store: Arc<dyn TokenStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self::with_max_lifetime(store, audit, Duration::days(DEFAULT_MAX_LIFETIME_DAYS))
    }

    pub fn with_max_lifetime(
        store: Arc<dyn TokenStore>,
        audit: Arc<dyn AuditSink>,
        max_lifetime: Duration,
    ) -> Self {
        Self {
            issuer: Arc::new(TokenIssuer::new(store.clone(), audit.clone(), max_lifetime)),
            validator: Arc::new(TokenValidator::new(store.clone())),
            revocation: Arc::new(RevocationManager::new(store.clone(), audit)),
            sweeper: ExpirySweeper::new(store.clone()),
            store,
        }
    }

    pub async fn issue(&self, request: IssueRequest) -> Result<IssuedToken, AccessError> {
        self.issuer.issue(request).await
    }

    pub async fn validate(
        &self,
        presented: &str,
        origin: Option<&str>,
    ) -> Result<ValidatedToken, AccessError> {
        self.validator.validate(presented, origin).await
    }

    pub async fn authorize(
        &self,
        presented: &str,
        origin: Option<&str>,
        resource: &ResourceRef,
    ) -> Result<ValidatedToken, AccessError> {
        self.validator.authorize(presented, origin, resource).await
    }

    pub async fn revoke(
        &self,
        token_id: Uuid,
        revoked_by: &str,
        reason: &str,
    ) -> Result<AccessToken, AccessError> {
        self.revocation.revoke(token_id, revoked_by, reason).await
    }

    pub async fn sweep_expired(&self) -> Result<u64, AccessError> {
        self.sweeper.sweep().await
    }

    pub fn sweeper(&self) -> ExpirySweeper {
        self.sweeper.clone()
    }

    pub async fn find(&self, token_id: Uuid) -> Result<AccessToken, AccessError> {
        self.store
            .find_by_id(token_id)
            .await?
            .ok_or(AccessError::NotFound)
    }

    /// Listing view: previews only, never hashes or secrets.
    pub async fn list(&self, include_inactive: bool) -> Result<Vec<TokenSummary>, AccessError> {
        let now = Utc::now();
        let tokens = self.store.list(&TokenFilter { include_inactive }).await?;
        Ok(tokens.iter().map(|t| t.summary_at(now)).collect())
    }
}
