use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::audit::AuditSink;
use crate::crypto;
use crate::errors::{AccessError, ValidationError};
use crate::models::audit::{AuditEvent, ACTION_ISSUED};
use crate::models::token::{AccessToken, ScopeType, MAX_USE_COUNT};
use crate::store::TokenStore;
use crate::tokens::scope::normalize_kind;

/// Everything needed to issue a token to an external auditor.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueRequest {
    pub auditor_name: String,
    pub auditor_email: String,
    pub auditor_organization: Option<String>,
    pub purpose: String,
    pub notes: Option<String>,
    pub scope_type: ScopeType,
    pub scope_entity_id: Option<String>,
    pub allowed_resources: Option<Vec<String>>,
    pub expires_at: DateTime<Utc>,
    pub max_uses: Option<u32>,
    pub created_by: String,
}

/// Returned exactly once. The raw secret cannot be recovered afterwards.
pub struct IssuedToken {
    pub token_id: Uuid,
    pub raw_secret: Zeroizing<String>,
    pub secret_preview: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token_id", &self.token_id)
            .field("raw_secret", &"[REDACTED]")
            .field("secret_preview", &self.secret_preview)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct TokenIssuer {
    store: Arc<dyn TokenStore>,
    audit: Arc<dyn AuditSink>,
    max_lifetime: Duration,
}

impl TokenIssuer {
    pub fn new(store: Arc<dyn TokenStore>, audit: Arc<dyn AuditSink>, max_lifetime: Duration) -> Self {
        Self {
            store,
            audit,
            max_lifetime,
        }
    }

    pub async fn issue(&self, request: IssueRequest) -> Result<IssuedToken, AccessError> {
        let now = Utc::now();
        let request = validate_request(request, now, self.max_lifetime)?;

        let secret = crypto::generate_secret();
        let token = AccessToken {
            id: Uuid::new_v4(),
            secret_hash: crypto::hash_secret(&secret),
            secret_preview: crypto::preview(&secret),
            auditor_name: request.auditor_name,
            auditor_email: request.auditor_email,
            auditor_organization: request.auditor_organization,
            purpose: request.purpose,
            notes: request.notes,
            scope_type: request.scope_type,
            scope_entity_id: request.scope_entity_id,
            allowed_resources: request.allowed_resources,
            expires_at: request.expires_at,
            max_uses: request.max_uses,
            current_uses: 0,
            active: true,
            created_at: now,
            created_by: request.created_by,
            revoked_at: None,
            revoked_by: None,
            revocation_reason: None,
            last_used_at: None,
            last_used_from_address: None,
        };

        self.store.create(&token).await?;

        tracing::info!(
            token_id = %token.id,
            auditor = %token.auditor_email,
            scope_type = %token.scope_type,
            expires_at = %token.expires_at,
            "issued auditor access token"
        );

        self.audit.record(AuditEvent::access_token(
            &token.created_by,
            ACTION_ISSUED,
            token.id,
            None,
            Some(json!({
                "auditor_name": token.auditor_name,
                "auditor_email": token.auditor_email,
                "auditor_organization": token.auditor_organization,
                "purpose": token.purpose,
                "scope_type": token.scope_type,
                "scope_entity_id": token.scope_entity_id,
                "allowed_resources": token.allowed_resources,
                "expires_at": token.expires_at,
                "max_uses": token.max_uses,
                "secret_preview": token.secret_preview,
            })),
        ));

        Ok(IssuedToken {
            token_id: token.id,
            raw_secret: secret,
            secret_preview: token.secret_preview,
            expires_at: token.expires_at,
        })
    }
}

/// Check and normalize issuance input. Nothing is persisted if this fails.
pub fn validate_request(
    mut request: IssueRequest,
    now: DateTime<Utc>,
    max_lifetime: Duration,
) -> Result<IssueRequest, ValidationError> {
    request.auditor_name = required(request.auditor_name, "auditor_name")?;
    request.auditor_email = required(request.auditor_email, "auditor_email")?;
    request.purpose = required(request.purpose, "purpose")?;
    request.created_by = required(request.created_by, "created_by")?;
    request.auditor_organization = optional(request.auditor_organization);
    request.notes = optional(request.notes);
    request.scope_entity_id = optional(request.scope_entity_id);

    if !is_plausible_email(&request.auditor_email) {
        return Err(ValidationError::InvalidEmail(request.auditor_email));
    }

    if request.expires_at <= now {
        return Err(ValidationError::ExpiryNotInFuture);
    }
    if request.expires_at - now > max_lifetime {
        return Err(ValidationError::LifetimeTooLong {
            max_days: max_lifetime.num_days(),
        });
    }

    match (request.scope_type.requires_entity(), &request.scope_entity_id) {
        (true, None) => return Err(ValidationError::MissingScopeEntity(request.scope_type)),
        (false, Some(_)) => return Err(ValidationError::UnexpectedScopeEntity(request.scope_type)),
        _ => {}
    }

    match request.max_uses {
        Some(0) => return Err(ValidationError::InvalidMaxUses),
        Some(n) if n > MAX_USE_COUNT => {
            return Err(ValidationError::MaxUsesTooLarge { max: MAX_USE_COUNT })
        }
        _ => {}
    }

    if let Some(resources) = request.allowed_resources.take() {
        let mut normalized = Vec::with_capacity(resources.len());
        for r in resources {
            let kind = normalize_kind(&r);
            if kind.is_empty() {
                return Err(ValidationError::BlankResourceType);
            }
            if !normalized.contains(&kind) {
                normalized.push(kind);
            }
        }
        request.allowed_resources = Some(normalized);
    }

    Ok(request)
}

fn required(value: String, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::BlankField(field));
    }
    Ok(trimmed.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_plausible_email(email: &str) -> bool {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty() && !domain.is_empty() && !email.contains(char::is_whitespace)
        }
        _ => false,
    }
}

#[cfg(test)]
pub(crate) fn sample_request(now: DateTime<Utc>) -> IssueRequest {
    IssueRequest {
        auditor_name: "Dana Reyes".into(),
        auditor_email: "dana@external-audit.example".into(),
        auditor_organization: Some("External Audit LLP".into()),
        purpose: "ISO 9001 surveillance audit".into(),
        notes: None,
        scope_type: ScopeType::FullReadOnly,
        scope_entity_id: None,
        allowed_resources: None,
        expires_at: now + Duration::hours(1),
        max_uses: None,
        created_by: "qa-manager".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::store::memory::MemoryStore;

    const LIFETIME: i64 = 90;

    fn check(request: IssueRequest) -> Result<IssueRequest, ValidationError> {
        validate_request(request, Utc::now(), Duration::days(LIFETIME))
    }

    #[test]
    fn test_rejects_past_and_present_expiry() {
        let now = Utc::now();
        let mut req = sample_request(now);
        req.expires_at = now;
        assert_eq!(
            validate_request(req, now, Duration::days(LIFETIME)).unwrap_err(),
            ValidationError::ExpiryNotInFuture
        );

        let mut req = sample_request(now);
        req.expires_at = now - Duration::seconds(1);
        assert_eq!(check(req).unwrap_err(), ValidationError::ExpiryNotInFuture);
    }

    #[test]
    fn test_rejects_lifetime_over_maximum() {
        let now = Utc::now();
        let mut req = sample_request(now);
        req.expires_at = now + Duration::days(LIFETIME + 1);
        assert_eq!(check(req).unwrap_err(), ValidationError::LifetimeTooLong { max_days: LIFETIME });
    }

    #[test]
    fn test_entity_scope_requires_entity_id() {
        let mut req = sample_request(Utc::now());
        req.scope_type = ScopeType::SpecificNcr;
        req.scope_entity_id = Some("   ".into());
        assert_eq!(
            check(req).unwrap_err(),
            ValidationError::MissingScopeEntity(ScopeType::SpecificNcr)
        );
    }

    #[test]
    fn test_full_scope_rejects_entity_id() {
        let mut req = sample_request(Utc::now());
        req.scope_entity_id = Some("42".into());
        assert_eq!(
            check(req).unwrap_err(),
            ValidationError::UnexpectedScopeEntity(ScopeType::FullReadOnly)
        );
    }

    #[test]
    fn test_rejects_blank_fields_and_bad_email() {
        let mut req = sample_request(Utc::now());
        req.purpose = " ".into();
        assert_eq!(check(req).unwrap_err(), ValidationError::BlankField("purpose"));

        let mut req = sample_request(Utc::now());
        req.auditor_email = "dana.example".into();
        assert!(matches!(check(req).unwrap_err(), ValidationError::InvalidEmail(_)));

        let mut req = sample_request(Utc::now());
        req.auditor_email = "a@b@c".into();
        assert!(matches!(check(req).unwrap_err(), ValidationError::InvalidEmail(_)));
    }

    #[test]
    fn test_rejects_zero_max_uses() {
        let mut req = sample_request(Utc::now());
        req.max_uses = Some(0);
        assert_eq!(check(req).unwrap_err(), ValidationError::InvalidMaxUses);
    }

    #[test]
    fn test_rejects_max_uses_beyond_counter_range() {
        let mut req = sample_request(Utc::now());
        req.max_uses = Some(MAX_USE_COUNT + 1);
        assert_eq!(
            check(req).unwrap_err(),
            ValidationError::MaxUsesTooLarge { max: MAX_USE_COUNT }
        );

        let mut req = sample_request(Utc::now());
        req.max_uses = Some(u32::MAX);
        assert!(matches!(check(req).unwrap_err(), ValidationError::MaxUsesTooLarge { .. }));

        let mut req = sample_request(Utc::now());
        req.max_uses = Some(MAX_USE_COUNT);
        assert_eq!(check(req).unwrap().max_uses, Some(MAX_USE_COUNT));
    }

    #[tokio::test]
    async fn test_oversized_max_uses_is_a_client_error() {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let issuer = TokenIssuer::new(store.clone(), audit.clone(), Duration::days(LIFETIME));
        let mut req = sample_request(Utc::now());
        req.max_uses = Some(u32::MAX);

        let err = issuer.issue(req).await.unwrap_err();
        assert!(matches!(err, AccessError::Validation(ValidationError::MaxUsesTooLarge { .. })));
        assert!(!err.is_retryable());
        assert!(store.is_empty());
        assert!(audit.events().is_empty());
    }

    #[test]
    fn test_normalizes_allowed_resources() {
        let mut req = sample_request(Utc::now());
        req.allowed_resources = Some(vec![" Document".into(), "NCR".into(), "document".into()]);
        let req = check(req).unwrap();
        assert_eq!(req.allowed_resources, Some(vec!["document".to_string(), "ncr".to_string()]));

        let mut req = sample_request(Utc::now());
        req.allowed_resources = Some(vec!["".into()]);
        assert_eq!(check(req).unwrap_err(), ValidationError::BlankResourceType);
    }

    #[tokio::test]
    async fn test_issue_persists_hash_not_secret() {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let issuer = TokenIssuer::new(store.clone(), audit.clone(), Duration::days(LIFETIME));

        let issued = issuer.issue(sample_request(Utc::now())).await.unwrap();
        let stored = store.find_by_id(issued.token_id).await.unwrap().unwrap();

        assert_eq!(stored.secret_hash, crypto::hash_secret(&issued.raw_secret));
        assert_ne!(stored.secret_hash, *issued.raw_secret);
        assert_eq!(stored.secret_preview, crypto::preview(&issued.raw_secret));
        assert!(stored.active);
        assert_eq!(stored.current_uses, 0);
        assert!(!format!("{:?}", issued).contains(issued.raw_secret.as_str()));
    }

    #[tokio::test]
    async fn test_issue_audits_without_secret() {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let issuer = TokenIssuer::new(store, audit.clone(), Duration::days(LIFETIME));

        let issued = issuer.issue(sample_request(Utc::now())).await.unwrap();
        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, ACTION_ISSUED);
        assert_eq!(events[0].actor, "qa-manager");
        assert_eq!(events[0].entity_id, issued.token_id);

        let payload = serde_json::to_string(&events[0].after).unwrap();
        assert!(!payload.contains(issued.raw_secret.as_str()));
        assert!(!payload.contains(&crypto::hash_secret(&issued.raw_secret)));
    }

    #[tokio::test]
    async fn test_invalid_request_persists_nothing() {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let issuer = TokenIssuer::new(store.clone(), audit.clone(), Duration::days(LIFETIME));

        let mut req = sample_request(Utc::now());
        req.scope_type = ScopeType::SpecificAudit;
        let err = issuer.issue(req).await.unwrap_err();

        assert!(matches!(err, AccessError::Validation(ValidationError::MissingScopeEntity(_))));
        assert!(store.is_empty());
        assert!(audit.events().is_empty());
    }
}
