use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::TokenStore;
use crate::errors::AccessError;
use crate::models::token::{
    AccessToken, RevocationPatch, RevokeOutcome, TokenFilter, MAX_USE_COUNT,
};

/// In-process token store.
///
/// Records live in a `DashMap` keyed by id with a secondary hash index. Each
/// mutation happens while holding the write guard of that record's shard, so
/// check-and-increment and check-and-flip are atomic per token without a lock
/// spanning unrelated tokens.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<Uuid, AccessToken>>,
    by_hash: Arc<DashMap<String, Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn id_for_hash(&self, secret_hash: &str) -> Option<Uuid> {
        self.by_hash.get(secret_hash).map(|r| *r.value())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn create(&self, token: &AccessToken) -> Result<(), AccessError> {
        if self.records.contains_key(&token.id) {
            return Err(anyhow!("access token id {} already exists", token.id).into());
        }
        match self.by_hash.entry(token.secret_hash.clone()) {
            Entry::Occupied(_) => Err(anyhow!("secret hash collision").into()),
            Entry::Vacant(slot) => {
                self.records.insert(token.id, token.clone());
                slot.insert(token.id);
                Ok(())
            }
        }
    }

    async fn validate_and_consume(
        &self,
        secret_hash: &str,
        now: DateTime<Utc>,
        origin: Option<&str>,
    ) -> Result<Option<AccessToken>, AccessError> {
        let Some(id) = self.id_for_hash(secret_hash) else {
            return Ok(None);
        };
        let Some(mut record) = self.records.get_mut(&id) else {
            return Ok(None);
        };
        if !record.is_usable_at(now) {
            return Ok(None);
        }
        // Fail closed rather than wrap once the counter reaches the column limit.
        let Some(next) = record
            .current_uses
            .checked_add(1)
            .filter(|n| *n <= MAX_USE_COUNT)
        else {
            return Ok(None);
        };
        record.current_uses = next;
        record.last_used_at = Some(now);
        record.last_used_from_address = origin.map(str::to_string);
        Ok(Some(record.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccessToken>, AccessError> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_hash(&self, secret_hash: &str) -> Result<Option<AccessToken>, AccessError> {
        let Some(id) = self.id_for_hash(secret_hash) else {
            return Ok(None);
        };
        self.find_by_id(id).await
    }

    async fn revoke_if_active(
        &self,
        id: Uuid,
        patch: &RevocationPatch,
    ) -> Result<RevokeOutcome, AccessError> {
        let Some(mut record) = self.records.get_mut(&id) else {
            return Ok(RevokeOutcome::NotFound);
        };
        if !record.active {
            return Ok(RevokeOutcome::AlreadyRevoked(record.clone()));
        }
        record.active = false;
        record.revoked_at = Some(patch.revoked_at);
        record.revoked_by = Some(patch.revoked_by.clone());
        record.revocation_reason = Some(patch.reason.clone());
        Ok(RevokeOutcome::Revoked(record.clone()))
    }

    async fn bulk_deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64, AccessError> {
        let mut updated = 0;
        for mut record in self.records.iter_mut() {
            if record.active && record.is_expired_at(now) {
                record.active = false;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn list(&self, filter: &TokenFilter) -> Result<Vec<AccessToken>, AccessError> {
        let mut tokens: Vec<AccessToken> = self
            .records
            .iter()
            .filter(|r| filter.include_inactive || r.active)
            .map(|r| r.value().clone())
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tokens)
    }
}
