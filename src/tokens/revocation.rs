use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::errors::{AccessError, ValidationError};
use crate::models::audit::{AuditEvent, ACTION_REVOKED};
use crate::models::token::{AccessToken, RevocationPatch, RevokeOutcome};
use crate::store::TokenStore;

pub struct RevocationManager {
    store: Arc<dyn TokenStore>,
    audit: Arc<dyn AuditSink>,
}

impl RevocationManager {
    pub fn new(store: Arc<dyn TokenStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Deactivate an active token for good. Revoking a token that is already
    /// inactive is an error, not a no-op, and leaves its metadata untouched.
    pub async fn revoke(
        &self,
        token_id: Uuid,
        revoked_by: &str,
        reason: &str,
    ) -> Result<AccessToken, AccessError> {
        let revoked_by = revoked_by.trim();
        let reason = reason.trim();
        if revoked_by.is_empty() {
            return Err(ValidationError::BlankField("revoked_by").into());
        }
        if reason.is_empty() {
            return Err(ValidationError::BlankField("reason").into());
        }

        let patch = RevocationPatch {
            revoked_at: Utc::now(),
            revoked_by: revoked_by.to_string(),
            reason: reason.to_string(),
        };

        let revoked = match self.store.revoke_if_active(token_id, &patch).await? {
            RevokeOutcome::Revoked(token) => token,
            RevokeOutcome::AlreadyRevoked(existing) => {
                tracing::warn!(
                    token_id = %token_id,
                    revoked_at = ?existing.revoked_at,
                    "revocation requested for inactive access token"
                );
                return Err(AccessError::AlreadyRevoked);
            }
            RevokeOutcome::NotFound => return Err(AccessError::NotFound),
        };

        tracing::info!(
            token_id = %revoked.id,
            revoked_by = %patch.revoked_by,
            "revoked auditor access token"
        );

        // The conditional write only applies to an active, unrevoked record.
        let mut before = revoked.clone();
        before.active = true;
        before.revoked_at = None;
        before.revoked_by = None;
        before.revocation_reason = None;

        self.audit.record(AuditEvent::access_token(
            &patch.revoked_by,
            ACTION_REVOKED,
            revoked.id,
            serde_json::to_value(&before).ok(),
            serde_json::to_value(&revoked).ok(),
        ));

        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::models::token::sample_token;
    use crate::store::memory::MemoryStore;
    use crate::store::FailingStore;

    async fn setup() -> (Arc<MemoryStore>, Arc<MemoryAuditSink>, RevocationManager, AccessToken) {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let token = sample_token(Utc::now());
        store.create(&token).await.unwrap();
        let manager = RevocationManager::new(store.clone(), audit.clone());
        (store, audit, manager, token)
    }

    #[tokio::test]
    async fn test_revoke_sets_metadata_and_audits() {
        let (store, audit, manager, token) = setup().await;

        let revoked = manager.revoke(token.id, "qa-manager", "  engagement ended ").await.unwrap();
        assert!(!revoked.active);
        assert_eq!(revoked.revocation_reason.as_deref(), Some("engagement ended"));
        assert_eq!(revoked.revoked_by.as_deref(), Some("qa-manager"));

        let stored = store.find_by_id(token.id).await.unwrap().unwrap();
        assert_eq!(stored, revoked);

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, ACTION_REVOKED);
        assert_eq!(events[0].before.as_ref().unwrap()["active"], true);
        assert_eq!(events[0].after.as_ref().unwrap()["active"], false);
        assert_eq!(events[0].after.as_ref().unwrap()["revocation_reason"], "engagement ended");
    }

    #[tokio::test]
    async fn test_second_revoke_is_already_revoked_and_preserves_metadata() {
        let (store, audit, manager, token) = setup().await;
        let first = manager.revoke(token.id, "qa-manager", "engagement ended").await.unwrap();

        let err = manager.revoke(token.id, "someone-else", "oops").await.unwrap_err();
        assert!(matches!(err, AccessError::AlreadyRevoked));

        let stored = store.find_by_id(token.id).await.unwrap().unwrap();
        assert_eq!(stored.revoked_by, first.revoked_by);
        assert_eq!(stored.revoked_at, first.revoked_at);
        assert_eq!(stored.revocation_reason, first.revocation_reason);
        assert_eq!(audit.events().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let (_, _, manager, _) = setup().await;
        let err = manager.revoke(Uuid::new_v4(), "qa-manager", "cleanup").await.unwrap_err();
        assert!(matches!(err, AccessError::NotFound));
    }

    #[tokio::test]
    async fn test_swept_token_counts_as_already_revoked() {
        let (store, _, manager, token) = setup().await;
        store.bulk_deactivate_expired(token.expires_at).await.unwrap();

        let err = manager.revoke(token.id, "qa-manager", "late").await.unwrap_err();
        assert!(matches!(err, AccessError::AlreadyRevoked));
        let stored = store.find_by_id(token.id).await.unwrap().unwrap();
        assert!(stored.revocation_reason.is_none());
    }

    #[tokio::test]
    async fn test_blank_reason_rejected_before_store() {
        let (store, _, manager, token) = setup().await;
        let err = manager.revoke(token.id, "qa-manager", "   ").await.unwrap_err();
        assert!(matches!(err, AccessError::Validation(ValidationError::BlankField("reason"))));
        assert!(store.find_by_id(token.id).await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable_and_not_audited() {
        let audit = Arc::new(MemoryAuditSink::new());
        let manager = RevocationManager::new(Arc::new(FailingStore), audit.clone());

        let err = manager.revoke(Uuid::new_v4(), "qa-manager", "cleanup").await.unwrap_err();
        assert!(matches!(err, AccessError::StoreUnavailable(_)));
        assert!(err.is_retryable());
        assert!(audit.events().is_empty());
    }
}
