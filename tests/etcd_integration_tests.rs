//! Integration coverage against a real etcd.
//!
//! These tests are ignored by default; run them with a local etcd:
//!
//! ```sh
//! cargo test -- --ignored
//! ```

use std::time::Duration;

use cronfleet::error::CronfleetError;
use cronfleet::model::{job_key, Job, JobEventKind};
use cronfleet::store::KvGateway;
use cronfleet::worker::cache::JobCache;
use cronfleet::worker::lock::JobLock;
use tokio_util::sync::CancellationToken;

async fn gateway() -> KvGateway {
    KvGateway::connect(&["localhost:2379".to_string()], 5000)
        .await
        .expect("requires a running etcd at localhost:2379")
}

fn unique(name: &str) -> String {
    format!("{name}-{}", std::process::id())
}

#[tokio::test]
#[ignore = "requires a running etcd at localhost:2379"]
async fn put_get_delete_roundtrip() {
    let kv = gateway().await;
    let key = format!("/cronfleet-test/{}", unique("roundtrip"));

    kv.put(&key, "value-1").await.unwrap();
    let (value, mod_revision) = kv.get(&key).await.unwrap().unwrap();
    assert_eq!(value, b"value-1");
    assert!(mod_revision > 0);

    assert_eq!(kv.delete(&key).await.unwrap(), 1);
    assert!(kv.get(&key).await.unwrap().is_none());
    assert_eq!(kv.delete(&key).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires a running etcd at localhost:2379"]
async fn try_acquire_is_mutually_exclusive() {
    let kv = gateway().await;
    let key = format!("/cronfleet-test/{}", unique("acquire"));

    let lease_id = kv.try_acquire(&key, 5).await.unwrap();

    match kv.try_acquire(&key, 5).await {
        Err(CronfleetError::LockAlreadyHeld(_)) => {}
        other => panic!("expected LockAlreadyHeld, got {other:?}"),
    }

    kv.revoke_lease(lease_id).await.unwrap();
    // Revoking the lease removes the key; the lock is free again.
    let lease_id = kv.try_acquire(&key, 5).await.unwrap();
    kv.revoke_lease(lease_id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running etcd at localhost:2379"]
async fn job_lock_unlock_is_idempotent() {
    let kv = gateway().await;
    let job_name = unique("lock-job");

    let mut first = JobLock::new(kv.clone(), &job_name, 5);
    first.try_lock().await.unwrap();
    assert!(first.is_held());

    let mut second = JobLock::new(kv.clone(), &job_name, 5);
    assert!(matches!(
        second.try_lock().await,
        Err(CronfleetError::LockAlreadyHeld(_))
    ));

    first.unlock().await;
    first.unlock().await;
    assert!(!first.is_held());

    second.try_lock().await.unwrap();
    second.unlock().await;
}

#[tokio::test]
#[ignore = "requires a running etcd at localhost:2379"]
async fn expired_lock_lease_frees_the_key() {
    let kv = gateway().await;
    let job_name = unique("expiry-job");

    // Acquire with the minimum TTL and never renew.
    let key = cronfleet::model::lock_key(&job_name);
    kv.try_acquire(&key, 1).await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;

    let lease_id = kv.try_acquire(&key, 5).await.unwrap();
    kv.revoke_lease(lease_id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running etcd at localhost:2379"]
async fn cache_observes_saves_and_deletes() {
    let kv = gateway().await;
    let job_name = unique("cache-job");
    let shutdown = CancellationToken::new();

    let (cache, mut events) = JobCache::new(kv.clone()).await.unwrap();
    cache.start_watch(shutdown.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;

    let job = Job {
        name: job_name.clone(),
        command: "echo hi".to_string(),
        cron_expr: "* * * * * *".to_string(),
        timeout: 0,
        disabled: false,
        created_at: 1,
        updated_at: 1,
    };
    kv.put(&job_key(&job_name), &serde_json::to_string(&job).unwrap())
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("save event should arrive")
        .unwrap();
    assert_eq!(event.kind, JobEventKind::Save);
    assert_eq!(event.job.name, job_name);
    assert!(cache.get(&job_name).is_some());

    kv.delete(&job_key(&job_name)).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("delete event should arrive")
        .unwrap();
    assert_eq!(event.kind, JobEventKind::Delete);
    // The delete event carries the previously cached job.
    assert_eq!(event.job.command, "echo hi");
    assert!(cache.get(&job_name).is_none());

    shutdown.cancel();
}
