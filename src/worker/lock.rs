use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{CronfleetError, Result};
use crate::model::lock_key;
use crate::store::KvGateway;

/// One worker's claim on one job's distributed lock.
///
/// `try_lock` creates `/cron/lock/<job>` bound to a fresh lease via a single
/// CAS transaction, then renews the lease in a background task until
/// `unlock` (or drop of the renewal on failure). The lock serializes the
/// decision to dispatch, not the run itself; callers release it immediately
/// after dispatch.
pub struct JobLock {
    kv: KvGateway,
    job_name: String,
    lock_key: String,
    ttl: i64,
    lease_id: Option<i64>,
    held: Arc<AtomicBool>,
    renew_cancel: Option<CancellationToken>,
}

impl JobLock {
    pub fn new(kv: KvGateway, job_name: &str, ttl: i64) -> Self {
        Self {
            kv,
            job_name: job_name.to_string(),
            lock_key: lock_key(job_name),
            ttl,
            lease_id: None,
            held: Arc::new(AtomicBool::new(false)),
            renew_cancel: None,
        }
    }

    /// Single acquisition attempt. `LockAlreadyHeld` means another worker
    /// won this tick; there is no blocking retry.
    pub async fn try_lock(&mut self) -> Result<()> {
        let lease_id = match self.kv.try_acquire(&self.lock_key, self.ttl).await {
            Ok(id) => id,
            Err(CronfleetError::LockAlreadyHeld(_)) => {
                return Err(CronfleetError::LockAlreadyHeld(self.job_name.clone()));
            }
            Err(e) => return Err(e),
        };

        self.lease_id = Some(lease_id);
        self.held.store(true, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        self.renew_cancel = Some(cancel.clone());
        self.spawn_renewal(lease_id, cancel);

        Ok(())
    }

    /// Single attempt bounded by `timeout`.
    pub async fn lock_with_timeout(&mut self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.try_lock()).await {
            Ok(result) => result,
            Err(_) => Err(CronfleetError::LockTimeout(self.job_name.clone(), timeout)),
        }
    }

    /// Cancel renewal and revoke the lease, deleting the lock key.
    /// Safe to call repeatedly.
    pub async fn unlock(&mut self) {
        if !self.held.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(cancel) = self.renew_cancel.take() {
            cancel.cancel();
        }

        if let Some(lease_id) = self.lease_id.take() {
            if let Err(e) = self.kv.revoke_lease(lease_id).await {
                // The lease still expires by TTL; the lock is merely slower
                // to release.
                tracing::warn!(job_name = %self.job_name, error = %e, "Failed to revoke lock lease");
            }
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Renew the lease at a third of its TTL until cancelled. Any renewal
    /// failure clears the held flag: the lock is considered lost.
    fn spawn_renewal(&self, lease_id: i64, cancel: CancellationToken) {
        let kv = self.kv.clone();
        let held = self.held.clone();
        let job_name = self.job_name.clone();
        let period = Duration::from_secs((self.ttl as u64 / 3).max(1));

        tokio::spawn(async move {
            let (mut keeper, mut stream) = match kv.keep_alive(lease_id).await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(job_name = %job_name, error = %e, "Failed to open lock keep-alive");
                    held.store(false, Ordering::SeqCst);
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(period) => {
                        if keeper.keep_alive().await.is_err() {
                            held.store(false, Ordering::SeqCst);
                            return;
                        }
                        match stream.message().await {
                            Ok(Some(_)) => {}
                            _ => {
                                held.store(false, Ordering::SeqCst);
                                return;
                            }
                        }
                    }
                }
            }
        });
    }
}
