//! Audit-log sinks. Recording is fire-and-forget: a sink failure is logged
//! locally and never surfaces to the operation that produced the event.

use std::sync::{Arc, Mutex};

use sqlx::PgPool;
use tokio::task::JoinHandle;

use crate::models::audit::AuditEvent;

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events to the `audit_logs` table from a spawned Tokio task
/// so the caller never waits on the insert. Short-lived processes must call
/// [`PgAuditSink::flush`] before the runtime shuts down, or pending inserts
/// are cancelled.
#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of inserts spawned and not yet reaped.
    pub fn pending(&self) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.len()
    }

    /// Wait for every insert spawned so far. Failures were already logged by
    /// the task itself.
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            pending.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("audit log task did not complete: {}", e);
            }
        }
    }
}

impl AuditSink for PgAuditSink {
    fn record(&self, event: AuditEvent) {
        let pool = self.pool.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = insert_audit_event(&pool, &event).await {
                tracing::error!(
                    audit_id = %event.id,
                    action = %event.action,
                    entity_id = %event.entity_id,
                    "failed to write audit log: {}",
                    e
                );
            } else {
                tracing::debug!(audit_id = %event.id, action = %event.action, "audit log recorded");
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}

async fn insert_audit_event(pool: &PgPool, event: &AuditEvent) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (
            id, created_at, actor, action, entity_type, entity_id, before_state, after_state
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(event.id)
    .bind(event.timestamp)
    .bind(&event.actor)
    .bind(&event.action)
    .bind(&event.entity_type)
    .bind(event.entity_id)
    .bind(&event.before)
    .bind(&event.after)
    .execute(pool)
    .await?;

    Ok(())
}

/// Emits audit events as structured log lines. Used by the CLI when no
/// database-backed sink is wanted.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            actor = %event.actor,
            action = %event.action,
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            after = ?event.after,
            "audit event"
        );
    }
}

/// Keeps events in memory for inspection.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
