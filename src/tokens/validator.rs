use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::crypto;
use crate::errors::AccessError;
use crate::models::token::{AccessToken, ScopeDescriptor};
use crate::store::TokenStore;
use crate::tokens::scope::{self, ResourceRef};

/// Outcome of a successful validation: enough to run scope checks and
/// attribute the access, nothing more.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedToken {
    pub token_id: Uuid,
    pub auditor_name: String,
    pub auditor_email: String,
    pub scope: ScopeDescriptor,
    pub current_uses: u32,
    pub max_uses: Option<u32>,
    pub expires_at: DateTime<Utc>,
}

impl From<AccessToken> for ValidatedToken {
    fn from(token: AccessToken) -> Self {
        Self {
            token_id: token.id,
            scope: token.scope(),
            auditor_name: token.auditor_name,
            auditor_email: token.auditor_email,
            current_uses: token.current_uses,
            max_uses: token.max_uses,
            expires_at: token.expires_at,
        }
    }
}

/// Why a presented secret was refused. Internal telemetry only; callers
/// always see [`AccessError::AuthenticationFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionCause {
    Malformed,
    Unknown,
    Revoked,
    Expired,
    Exhausted,
    /// Looked usable on the follow-up read; another request won the race.
    Contended,
}

impl fmt::Display for RejectionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectionCause::Malformed => "malformed",
            RejectionCause::Unknown => "unknown",
            RejectionCause::Revoked => "revoked",
            RejectionCause::Expired => "expired",
            RejectionCause::Exhausted => "exhausted",
            RejectionCause::Contended => "contended",
        };
        f.write_str(s)
    }
}

pub fn classify_rejection(record: Option<&AccessToken>, now: DateTime<Utc>) -> RejectionCause {
    match record {
        None => RejectionCause::Unknown,
        Some(t) if t.revoked_at.is_some() => RejectionCause::Revoked,
        Some(t) if !t.active || t.is_expired_at(now) => RejectionCause::Expired,
        Some(t) if t.is_exhausted() => RejectionCause::Exhausted,
        Some(_) => RejectionCause::Contended,
    }
}

pub struct TokenValidator {
    store: Arc<dyn TokenStore>,
}

impl TokenValidator {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Validate a presented secret and record one use of it.
    ///
    /// The match and the increment happen in a single conditional write in
    /// the store. Every disqualifying condition yields the same
    /// `AuthenticationFailure`; only store outages surface differently.
    pub async fn validate(
        &self,
        presented: &str,
        origin: Option<&str>,
    ) -> Result<ValidatedToken, AccessError> {
        // Hashed exactly as presented; surrounding whitespace is a different secret.
        if presented.is_empty() || presented.len() > crypto::MAX_PRESENTED_LEN {
            tracing::debug!(cause = %RejectionCause::Malformed, "access token rejected");
            return Err(AccessError::AuthenticationFailure);
        }

        let secret_hash = crypto::hash_secret(presented);
        let now = Utc::now();

        match self.store.validate_and_consume(&secret_hash, now, origin).await? {
            Some(token) => {
                tracing::debug!(
                    token_id = %token.id,
                    uses = token.current_uses,
                    max_uses = ?token.max_uses,
                    "access token validated"
                );
                Ok(token.into())
            }
            None => {
                self.log_rejection(&secret_hash, now).await;
                Err(AccessError::AuthenticationFailure)
            }
        }
    }

    /// Validate, then check the requested resource against the token scope.
    ///
    /// The use is recorded before the scope decision, so a request denied by
    /// scope still counts against `max_uses`.
    pub async fn authorize(
        &self,
        presented: &str,
        origin: Option<&str>,
        resource: &ResourceRef,
    ) -> Result<ValidatedToken, AccessError> {
        let validated = self.validate(presented, origin).await?;
        scope::require(&validated.scope, resource)?;
        Ok(validated)
    }

    async fn log_rejection(&self, secret_hash: &str, now: DateTime<Utc>) {
        match self.store.find_by_hash(secret_hash).await {
            Ok(record) => {
                let cause = classify_rejection(record.as_ref(), now);
                tracing::debug!(
                    token_id = ?record.as_ref().map(|t| t.id),
                    cause = %cause,
                    "access token rejected"
                );
            }
            Err(e) => {
                tracing::warn!("access token rejected; cause lookup failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::token::{sample_token, ScopeType};
    use crate::store::memory::MemoryStore;
    use crate::store::FailingStore;
    use chrono::Duration;

    async fn store_with(token: &AccessToken) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.create(token).await.unwrap();
        store
    }

    fn token_with_secret(secret: &str) -> AccessToken {
        let mut token = sample_token(Utc::now());
        token.secret_hash = crypto::hash_secret(secret);
        token
    }

    #[tokio::test]
    async fn test_valid_secret_returns_scope_and_counts_use() {
        let mut token = token_with_secret("aat_good");
        token.scope_type = ScopeType::SpecificDocument;
        token.scope_entity_id = Some("42".into());
        let store = store_with(&token).await;
        let validator = TokenValidator::new(store.clone());

        let validated = validator.validate("aat_good", Some("198.51.100.4")).await.unwrap();
        assert_eq!(validated.token_id, token.id);
        assert_eq!(validated.scope.scope_type, ScopeType::SpecificDocument);
        assert_eq!(validated.scope.scope_entity_id.as_deref(), Some("42"));
        assert_eq!(validated.current_uses, 1);

        let stored = store.find_by_id(token.id).await.unwrap().unwrap();
        assert_eq!(stored.last_used_from_address.as_deref(), Some("198.51.100.4"));
    }

    #[tokio::test]
    async fn test_altered_secret_fails() {
        let token = token_with_secret("aat_good");
        let validator = TokenValidator::new(store_with(&token).await);

        assert!(matches!(
            validator.validate("aat_goof", None).await,
            Err(AccessError::AuthenticationFailure)
        ));
    }

    #[tokio::test]
    async fn test_malformed_secret_fails_without_lookup() {
        let validator = TokenValidator::new(Arc::new(MemoryStore::new()));
        assert!(matches!(validator.validate("", None).await, Err(AccessError::AuthenticationFailure)));
        let huge = "a".repeat(crypto::MAX_PRESENTED_LEN + 1);
        assert!(matches!(validator.validate(&huge, None).await, Err(AccessError::AuthenticationFailure)));
    }

    #[tokio::test]
    async fn test_every_disqualifier_reports_the_same_error() {
        let mut expired = token_with_secret("aat_expired");
        expired.created_at = Utc::now() - Duration::hours(2);
        expired.expires_at = Utc::now() - Duration::hours(1);

        let mut revoked = token_with_secret("aat_revoked");
        revoked.active = false;
        revoked.revoked_at = Some(Utc::now());

        let mut exhausted = token_with_secret("aat_exhausted");
        exhausted.max_uses = Some(3);
        exhausted.current_uses = 3;

        let store = Arc::new(MemoryStore::new());
        for t in [&expired, &revoked, &exhausted] {
            store.create(t).await.unwrap();
        }
        let validator = TokenValidator::new(store.clone());

        for secret in ["aat_expired", "aat_revoked", "aat_exhausted", "aat_unknown"] {
            let err = validator.validate(secret, None).await.unwrap_err();
            assert_eq!(err.to_string(), "invalid or expired token", "{}", secret);
        }
        let stored = store.find_by_id(exhausted.id).await.unwrap().unwrap();
        assert_eq!(stored.current_uses, 3);
    }

    #[tokio::test]
    async fn test_authorize_consumes_use_even_when_scope_denies() {
        let mut token = token_with_secret("aat_doc");
        token.scope_type = ScopeType::SpecificDocument;
        token.scope_entity_id = Some("42".into());
        token.max_uses = Some(2);
        let store = store_with(&token).await;
        let validator = TokenValidator::new(store.clone());

        let denied = validator
            .authorize("aat_doc", None, &ResourceRef::new("document", "43"))
            .await;
        assert!(matches!(denied, Err(AccessError::ScopeDenied)));

        let allowed = validator
            .authorize("aat_doc", None, &ResourceRef::new("document", "42"))
            .await
            .unwrap();
        assert_eq!(allowed.current_uses, 2);

        assert!(matches!(
            validator.authorize("aat_doc", None, &ResourceRef::new("document", "42")).await,
            Err(AccessError::AuthenticationFailure)
        ));
    }

    #[tokio::test]
    async fn test_padded_secret_is_not_the_issued_secret() {
        let token = token_with_secret("aat_good");
        let store = store_with(&token).await;
        let validator = TokenValidator::new(store.clone());

        for padded in [" aat_good", "aat_good\n", "\taat_good "] {
            assert!(matches!(
                validator.validate(padded, None).await,
                Err(AccessError::AuthenticationFailure)
            ));
        }
        let stored = store.find_by_id(token.id).await.unwrap().unwrap();
        assert_eq!(stored.current_uses, 0);
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable_not_auth_failure() {
        let validator = TokenValidator::new(Arc::new(FailingStore));

        let err = validator.validate("aat_good", None).await.unwrap_err();
        assert!(matches!(err, AccessError::StoreUnavailable(_)));
        assert!(err.is_retryable());

        let err = validator
            .authorize("aat_good", None, &ResourceRef::new("document", "42"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!matches!(err, AccessError::AuthenticationFailure | AccessError::ScopeDenied));
    }

    #[test]
    fn test_classify_rejection() {
        let now = Utc::now();
        assert_eq!(classify_rejection(None, now), RejectionCause::Unknown);

        let mut t = sample_token(now);
        assert_eq!(classify_rejection(Some(&t), now), RejectionCause::Contended);

        t.max_uses = Some(1);
        t.current_uses = 1;
        assert_eq!(classify_rejection(Some(&t), now), RejectionCause::Exhausted);

        assert_eq!(classify_rejection(Some(&t), t.expires_at), RejectionCause::Expired);

        t.active = false;
        t.revoked_at = Some(now);
        assert_eq!(classify_rejection(Some(&t), now), RejectionCause::Revoked);
    }
}
