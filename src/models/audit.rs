use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ENTITY_ACCESS_TOKEN: &str = "AccessToken";

pub const ACTION_ISSUED: &str = "access_token.issued";
pub const ACTION_REVOKED: &str = "access_token.revoked";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn access_token(
        actor: &str,
        action: &str,
        entity_id: Uuid,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor: actor.to_string(),
            action: action.to_string(),
            entity_type: ENTITY_ACCESS_TOKEN.to_string(),
            entity_id,
            before,
            after,
            timestamp: Utc::now(),
        }
    }
}
