//! Scope authorization: does a validated token's scope cover a resource?
//!
//! Pure decision logic, no I/O. Anything the rules do not explicitly allow
//! is denied.

use serde::{Deserialize, Serialize};

use crate::errors::AccessError;
use crate::models::token::{ScopeDescriptor, ScopeType};

/// A concrete resource an auditor is asking to read, e.g. `document/42`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeDecision {
    Allow,
    Deny,
}

impl ScopeDecision {
    pub fn is_allowed(self) -> bool {
        self == ScopeDecision::Allow
    }
}

/// Normalize a resource-type name for comparison.
pub fn normalize_kind(kind: &str) -> String {
    kind.trim().to_ascii_lowercase()
}

pub fn authorize(scope: &ScopeDescriptor, resource: &ResourceRef) -> ScopeDecision {
    let kind = normalize_kind(&resource.kind);
    if kind.is_empty() {
        return ScopeDecision::Deny;
    }

    // An allowlist narrows every scope type. Present but empty denies all.
    if let Some(allowed) = &scope.allowed_resources {
        if !allowed.iter().any(|a| normalize_kind(a) == kind) {
            return ScopeDecision::Deny;
        }
    }

    match scope.scope_type {
        ScopeType::FullReadOnly => ScopeDecision::Allow,
        specific => {
            let (Some(scope_kind), Some(entity_id)) =
                (specific.resource_kind(), scope.scope_entity_id.as_deref())
            else {
                return ScopeDecision::Deny;
            };
            if scope_kind == kind && entity_id == resource.id.trim() {
                ScopeDecision::Allow
            } else {
                ScopeDecision::Deny
            }
        }
    }
}

/// Like [`authorize`] but as an error the HTTP layer turns into a 403.
pub fn require(scope: &ScopeDescriptor, resource: &ResourceRef) -> Result<(), AccessError> {
    match authorize(scope, resource) {
        ScopeDecision::Allow => Ok(()),
        ScopeDecision::Deny => {
            tracing::debug!(
                scope_type = %scope.scope_type,
                resource_kind = %resource.kind,
                resource_id = %resource.id,
                "scope denied resource"
            );
            Err(AccessError::ScopeDenied)
        }
    }
}
