use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ValidationError;

/// Ceiling for `max_uses` and `current_uses`. Counters are stored as
/// Postgres `INTEGER`.
pub const MAX_USE_COUNT: u32 = i32::MAX as u32;

/// What a token may read. Closed set: anything that does not parse is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    FullReadOnly,
    SpecificAudit,
    SpecificDocument,
    SpecificNcr,
    SpecificCapa,
}

impl ScopeType {
    pub const ALL: [ScopeType; 5] = [
        ScopeType::FullReadOnly,
        ScopeType::SpecificAudit,
        ScopeType::SpecificDocument,
        ScopeType::SpecificNcr,
        ScopeType::SpecificCapa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::FullReadOnly => "full_read_only",
            ScopeType::SpecificAudit => "specific_audit",
            ScopeType::SpecificDocument => "specific_document",
            ScopeType::SpecificNcr => "specific_ncr",
            ScopeType::SpecificCapa => "specific_capa",
        }
    }

    /// The single resource kind an entity-bound scope grants, or `None` for
    /// scopes that are not tied to one entity.
    pub fn resource_kind(&self) -> Option<&'static str> {
        match self {
            ScopeType::FullReadOnly => None,
            ScopeType::SpecificAudit => Some("audit"),
            ScopeType::SpecificDocument => Some("document"),
            ScopeType::SpecificNcr => Some("ncr"),
            ScopeType::SpecificCapa => Some("capa"),
        }
    }

    /// Whether `scope_entity_id` is mandatory for this scope type.
    pub fn requires_entity(&self) -> bool {
        self.resource_kind().is_some()
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeType {
    type Err = ValidationError;

    /// Accepts both `full_read_only` and `full-read-only` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ScopeType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ValidationError::UnknownScopeType(s.to_string()))
    }
}

/// The part of a token the scope authorizer needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDescriptor {
    pub scope_type: ScopeType,
    pub scope_entity_id: Option<String>,
    pub allowed_resources: Option<Vec<String>>,
}

/// Reporting view of where a token sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Expired,
    Exhausted,
    Revoked,
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenStatus::Active => "active",
            TokenStatus::Expired => "expired",
            TokenStatus::Exhausted => "exhausted",
            TokenStatus::Revoked => "revoked",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: Uuid,
    #[serde(skip_serializing, default)]
    pub secret_hash: String,
    pub secret_preview: String,
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
    pub current_uses: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
    pub revocation_reason: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_used_from_address: Option<String>,
}

impl AccessToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.current_uses >= max)
    }

    /// The single predicate every store uses to decide whether a use may be
    /// recorded.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired_at(now) && !self.is_exhausted()
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> TokenStatus {
        if self.revoked_at.is_some() {
            TokenStatus::Revoked
        } else if !self.active || self.is_expired_at(now) {
            // Inactive without revocation metadata means the sweeper got it.
            TokenStatus::Expired
        } else if self.is_exhausted() {
            TokenStatus::Exhausted
        } else {
            TokenStatus::Active
        }
    }

    pub fn scope(&self) -> ScopeDescriptor {
        ScopeDescriptor {
            scope_type: self.scope_type,
            scope_entity_id: self.scope_entity_id.clone(),
            allowed_resources: self.allowed_resources.clone(),
        }
    }

    pub fn summary_at(&self, now: DateTime<Utc>) -> TokenSummary {
        TokenSummary {
            id: self.id,
            secret_preview: self.secret_preview.clone(),
            auditor_name: self.auditor_name.clone(),
            auditor_email: self.auditor_email.clone(),
            auditor_organization: self.auditor_organization.clone(),
            purpose: self.purpose.clone(),
            scope_type: self.scope_type,
            scope_entity_id: self.scope_entity_id.clone(),
            allowed_resources: self.allowed_resources.clone(),
            expires_at: self.expires_at,
            max_uses: self.max_uses,
            current_uses: self.current_uses,
            status: self.status_at(now),
            created_at: self.created_at,
            created_by: self.created_by.clone(),
            revoked_at: self.revoked_at,
            revoked_by: self.revoked_by.clone(),
            revocation_reason: self.revocation_reason.clone(),
            last_used_at: self.last_used_at,
        }
    }
}

/// Listing row. Carries the preview in place of the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSummary {
    pub id: Uuid,
    pub secret_preview: String,
    pub auditor_name: String,
    pub auditor_email: String,
    pub auditor_organization: Option<String>,
    pub purpose: String,
    pub scope_type: ScopeType,
    pub scope_entity_id: Option<String>,
    pub allowed_resources: Option<Vec<String>>,
    pub expires_at: DateTime<Utc>,
    pub max_uses: Option<u32>,
    pub current_uses: u32,
    pub status: TokenStatus,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
    pub revocation_reason: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Fields written together with the `active = false` flip.
#[derive(Debug, Clone)]
pub struct RevocationPatch {
    pub revoked_at: DateTime<Utc>,
    pub revoked_by: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum RevokeOutcome {
    Revoked(AccessToken),
    /// Carries the record as stored, untouched.
    AlreadyRevoked(AccessToken),
    NotFound,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenFilter {
    pub include_inactive: bool,
}

#[cfg(test)]
pub(crate) fn sample_token(now: DateTime<Utc>) -> AccessToken {
    AccessToken {
        id: Uuid::new_v4(),
        secret_hash: crate::crypto::hash_secret(&format!("aat_{}", Uuid::new_v4().simple())),
        secret_preview: "aat_0123…cdef".into(),
        auditor_name: "Dana Reyes".into(),
        auditor_email: "dana@external-audit.example".into(),
        auditor_organization: Some("External Audit LLP".into()),
        purpose: "ISO 9001 surveillance audit".into(),
        notes: None,
        scope_type: ScopeType::FullReadOnly,
        scope_entity_id: None,
        allowed_resources: None,
        expires_at: now + chrono::Duration::hours(1),
        max_uses: None,
        current_uses: 0,
        active: true,
        created_at: now,
        created_by: "qa-manager".into(),
        revoked_at: None,
        revoked_by: None,
        revocation_reason: None,
        last_used_at: None,
        last_used_from_address: None,
    }
}
