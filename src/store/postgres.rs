use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::TokenStore;
use crate::errors::AccessError;
use crate::models::token::{
    AccessToken, RevocationPatch, RevokeOutcome, ScopeType, TokenFilter, MAX_USE_COUNT,
};

const TOKEN_COLUMNS: &str = "id, secret_hash, secret_preview, auditor_name, auditor_email, \
     auditor_organization, purpose, notes, scope_type, scope_entity_id, allowed_resources, \
     expires_at, max_uses, current_uses, active, created_at, created_by, revoked_at, revoked_by, \
     revocation_reason, last_used_at, last_used_from_address";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn create(&self, token: &AccessToken) -> Result<(), AccessError> {
        let max_uses = token.max_uses.map(to_db_count).transpose()?;
        let result = sqlx::query(
            r#"INSERT INTO auditor_access_tokens (
                   id, secret_hash, secret_preview, auditor_name, auditor_email,
                   auditor_organization, purpose, notes, scope_type, scope_entity_id,
                   allowed_resources, expires_at, max_uses, current_uses, active,
                   created_at, created_by
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"#,
        )
        .bind(token.id)
        .bind(&token.secret_hash)
        .bind(&token.secret_preview)
        .bind(&token.auditor_name)
        .bind(&token.auditor_email)
        .bind(&token.auditor_organization)
        .bind(&token.purpose)
        .bind(&token.notes)
        .bind(token.scope_type.as_str())
        .bind(&token.scope_entity_id)
        .bind(&token.allowed_resources)
        .bind(token.expires_at)
        .bind(max_uses)
        .bind(to_db_count(token.current_uses)?)
        .bind(token.active)
        .bind(token.created_at)
        .bind(&token.created_by)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                tracing::error!(token_id = %token.id, "access token insert hit a unique constraint");
                Err(anyhow::anyhow!("access token id or secret hash already exists").into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn validate_and_consume(
        &self,
        secret_hash: &str,
        now: DateTime<Utc>,
        origin: Option<&str>,
    ) -> Result<Option<AccessToken>, AccessError> {
        // Postgres re-checks the WHERE clause against the latest row version
        // after acquiring the row lock, so concurrent callers cannot push
        // current_uses past max_uses. Unlimited tokens stop at the INTEGER
        // ceiling instead of raising an overflow error.
        let sql = format!(
            r#"UPDATE auditor_access_tokens
               SET current_uses = current_uses + 1,
                   last_used_at = $2,
                   last_used_from_address = $3
               WHERE secret_hash = $1
                 AND active = true
                 AND expires_at > $2
                 AND (max_uses IS NULL OR current_uses < max_uses)
                 AND current_uses < $4
               RETURNING {TOKEN_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, AccessTokenRow>(&sql)
            .bind(secret_hash)
            .bind(now)
            .bind(origin)
            .bind(to_db_count(MAX_USE_COUNT)?)
            .fetch_optional(&self.pool)
            .await?;

        row.map(AccessToken::try_from).transpose().map_err(Into::into)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccessToken>, AccessError> {
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM auditor_access_tokens WHERE id = $1");
        let row = sqlx::query_as::<_, AccessTokenRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(AccessToken::try_from).transpose().map_err(Into::into)
    }

    async fn find_by_hash(&self, secret_hash: &str) -> Result<Option<AccessToken>, AccessError> {
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM auditor_access_tokens WHERE secret_hash = $1");
        let row = sqlx::query_as::<_, AccessTokenRow>(&sql)
            .bind(secret_hash)
            .fetch_optional(&self.pool)
            .await?;

        row.map(AccessToken::try_from).transpose().map_err(Into::into)
    }

    async fn revoke_if_active(
        &self,
        id: Uuid,
        patch: &RevocationPatch,
    ) -> Result<RevokeOutcome, AccessError> {
        let sql = format!(
            r#"UPDATE auditor_access_tokens
               SET active = false,
                   revoked_at = $2,
                   revoked_by = $3,
                   revocation_reason = $4
               WHERE id = $1 AND active = true
               RETURNING {TOKEN_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, AccessTokenRow>(&sql)
            .bind(id)
            .bind(patch.revoked_at)
            .bind(&patch.revoked_by)
            .bind(&patch.reason)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return Ok(RevokeOutcome::Revoked(row.try_into()?));
        }

        // The write did not apply. Inactive is terminal, so whatever we find
        // now is the state that blocked it.
        Ok(match self.find_by_id(id).await? {
            Some(existing) => RevokeOutcome::AlreadyRevoked(existing),
            None => RevokeOutcome::NotFound,
        })
    }

    async fn bulk_deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64, AccessError> {
        let result = sqlx::query(
            "UPDATE auditor_access_tokens SET active = false WHERE active = true AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list(&self, filter: &TokenFilter) -> Result<Vec<AccessToken>, AccessError> {
        let sql = format!(
            "SELECT {TOKEN_COLUMNS} FROM auditor_access_tokens WHERE ($1 OR active = true) ORDER BY created_at DESC"
        );
        let rows = sqlx::query_as::<_, AccessTokenRow>(&sql)
            .bind(filter.include_inactive)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|r| AccessToken::try_from(r).map_err(AccessError::from))
            .collect()
    }
}

fn to_db_count(value: u32) -> Result<i32, AccessError> {
    i32::try_from(value)
        .with_context(|| format!("use count {} does not fit the store", value))
        .map_err(Into::into)
}

#[derive(Debug, sqlx::FromRow)]
pub struct AccessTokenRow {
    pub id: Uuid,
    pub secret_hash: String,
    pub secret_preview: String,
    pub auditor_name: String,
    pub auditor_email: String,
    pub auditor_organization: Option<String>,
    pub purpose: String,
    pub notes: Option<String>,
    pub scope_type: String,
    pub scope_entity_id: Option<String>,
    pub allowed_resources: Option<Vec<String>>,
    pub expires_at: DateTime<Utc>,
    pub max_uses: Option<i32>,
    pub current_uses: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
    pub revocation_reason: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_used_from_address: Option<String>,
}

impl TryFrom<AccessTokenRow> for AccessToken {
    type Error = anyhow::Error;

    fn try_from(row: AccessTokenRow) -> Result<Self, Self::Error> {
        let scope_type = row
            .scope_type
            .parse::<ScopeType>()
            .with_context(|| format!("access token {} has unreadable scope type", row.id))?;
        let max_uses = row
            .max_uses
            .map(u32::try_from)
            .transpose()
            .with_context(|| format!("access token {} has negative max_uses", row.id))?;
        let current_uses = u32::try_from(row.current_uses)
            .with_context(|| format!("access token {} has negative current_uses", row.id))?;

        Ok(AccessToken {
            id: row.id,
            secret_hash: row.secret_hash,
            secret_preview: row.secret_preview,
            auditor_name: row.auditor_name,
            auditor_email: row.auditor_email,
            auditor_organization: row.auditor_organization,
            purpose: row.purpose,
            notes: row.notes,
            scope_type,
            scope_entity_id: row.scope_entity_id,
            allowed_resources: row.allowed_resources,
            expires_at: row.expires_at,
            max_uses,
            current_uses,
            active: row.active,
            created_at: row.created_at,
            created_by: row.created_by,
            revoked_at: row.revoked_at,
            revoked_by: row.revoked_by,
            revocation_reason: row.revocation_reason,
            last_used_at: row.last_used_at,
            last_used_from_address: row.last_used_from_address,
        })
    }
}
