//! Background job: deactivate access tokens whose expiry has passed.
//!
//! Validation already refuses expired tokens on its own; the sweep only keeps
//! the `active` flag honest for listings and reports. Swept tokens keep empty
//! revocation fields so they stay distinguishable from explicit revocations.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time;

use crate::errors::AccessError;
use crate::store::TokenStore;

#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn TokenStore>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// One pass. Returns how many tokens were deactivated; zero when nothing
    /// was eligible.
    pub async fn sweep(&self) -> Result<u64, AccessError> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<u64, AccessError> {
        let updated = self.store.bulk_deactivate_expired(now).await?;
        if updated > 0 {
            tracing::info!(rows = updated, "deactivated expired access tokens");
        } else {
            tracing::debug!("expiry sweep found nothing to deactivate");
        }
        Ok(updated)
    }
}

/// Spawn the periodic sweep. Call this once at startup.
pub fn spawn(sweeper: ExpirySweeper, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.sweep().await {
                tracing::error!(retryable = e.is_retryable(), "expiry sweep failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::token::sample_token;
    use crate::store::memory::MemoryStore;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_sweep_deactivates_only_expired_active_tokens() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        let mut expired = sample_token(now - ChronoDuration::hours(2));
        expired.expires_at = now - ChronoDuration::hours(1);
        let fresh = sample_token(now);
        let mut already_inactive = sample_token(now - ChronoDuration::hours(2));
        already_inactive.expires_at = now - ChronoDuration::hours(1);
        already_inactive.active = false;

        for t in [&expired, &fresh, &already_inactive] {
            store.create(t).await.unwrap();
        }

        let sweeper = ExpirySweeper::new(store.clone());
        assert_eq!(sweeper.sweep_at(now).await.unwrap(), 1);
        assert_eq!(sweeper.sweep_at(now).await.unwrap(), 0);

        let swept = store.find_by_id(expired.id).await.unwrap().unwrap();
        assert!(!swept.active);
        assert!(swept.revoked_at.is_none());
        assert!(swept.revoked_by.is_none());
        assert!(swept.revocation_reason.is_none());
        assert!(store.find_by_id(fresh.id).await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn test_spawned_job_sweeps_on_interval() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let mut expired = sample_token(now - ChronoDuration::hours(2));
        expired.expires_at = now - ChronoDuration::minutes(1);
        store.create(&expired).await.unwrap();

        let handle = spawn(ExpirySweeper::new(store.clone()), Duration::from_secs(60));
        // First tick fires immediately.
        time::sleep(Duration::from_millis(50)).await;
        assert!(!store.find_by_id(expired.id).await.unwrap().unwrap().active);
        handle.abort();
    }
}
