use std::time::Duration;

use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, DeleteOptions, GetOptions, LeaseKeepAliveStream,
    LeaseKeeper, PutOptions, Txn, TxnOp, WatchOptions, WatchStream, Watcher,
};

use crate::error::{CronfleetError, Result};

/// Budget for every individual KV operation.
const OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Thin gateway over etcd: Get/Put/Delete, prefix scans and watches, leases,
/// and the single-key compare-and-swap that backs distributed locks.
///
/// Cloning is cheap; all clones share one underlying connection.
#[derive(Clone)]
pub struct KvGateway {
    client: Client,
}

impl KvGateway {
    /// Connect to the etcd cluster. Fails fast; callers treat a connect
    /// error as fatal at startup.
    pub async fn connect(endpoints: &[String], dial_timeout_ms: u64) -> Result<Self> {
        let options = ConnectOptions::new().with_connect_timeout(Duration::from_millis(dial_timeout_ms));
        let client = Client::connect(endpoints, Some(options))
            .await
            .map_err(|e| CronfleetError::Etcd {
                op: "connect",
                key: String::new(),
                source: e,
            })?;

        Ok(Self { client })
    }

    /// Fetch a single key. Returns the value and its mod revision, or `None`
    /// when the key does not exist.
    pub async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, i64)>> {
        let mut kv = self.client.kv_client();
        let resp = tokio::time::timeout(OP_TIMEOUT, kv.get(key, None))
            .await
            .map_err(|_| timeout_err("get", key))?
            .map_err(|e| op_err("get", key, e))?;

        Ok(resp
            .kvs()
            .first()
            .map(|kv| (kv.value().to_vec(), kv.mod_revision())))
    }

    /// Scan all keys under a prefix.
    pub async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut kv = self.client.kv_client();
        let options = GetOptions::new().with_prefix();
        let resp = tokio::time::timeout(OP_TIMEOUT, kv.get(prefix, Some(options)))
            .await
            .map_err(|_| timeout_err("get_prefix", prefix))?
            .map_err(|e| op_err("get_prefix", prefix, e))?;

        resp.kvs()
            .iter()
            .map(|kv| {
                let key = kv
                    .key_str()
                    .map_err(|e| op_err("get_prefix", prefix, e))?
                    .to_string();
                Ok((key, kv.value().to_vec()))
            })
            .collect()
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut kv = self.client.kv_client();
        tokio::time::timeout(OP_TIMEOUT, kv.put(key, value, None))
            .await
            .map_err(|_| timeout_err("put", key))?
            .map_err(|e| op_err("put", key, e))?;
        Ok(())
    }

    /// Grant a fresh lease of `ttl` seconds and bind `key` to it in one call.
    /// Returns the lease id. The key vanishes when the lease expires.
    pub async fn put_with_lease(&self, key: &str, value: &str, ttl: i64) -> Result<i64> {
        let lease_id = self.grant_lease(ttl).await?;

        let mut kv = self.client.kv_client();
        let options = PutOptions::new().with_lease(lease_id);
        tokio::time::timeout(OP_TIMEOUT, kv.put(key, value, Some(options)))
            .await
            .map_err(|_| timeout_err("put_with_lease", key))?
            .map_err(|e| op_err("put_with_lease", key, e))?;

        Ok(lease_id)
    }

    /// Delete a key; returns the number of keys removed.
    pub async fn delete(&self, key: &str) -> Result<i64> {
        let mut kv = self.client.kv_client();
        let resp = tokio::time::timeout(OP_TIMEOUT, kv.delete(key, None))
            .await
            .map_err(|_| timeout_err("delete", key))?
            .map_err(|e| op_err("delete", key, e))?;
        Ok(resp.deleted())
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<i64> {
        let mut kv = self.client.kv_client();
        let options = DeleteOptions::new().with_prefix();
        let resp = tokio::time::timeout(OP_TIMEOUT, kv.delete(prefix, Some(options)))
            .await
            .map_err(|_| timeout_err("delete_prefix", prefix))?
            .map_err(|e| op_err("delete_prefix", prefix, e))?;
        Ok(resp.deleted())
    }

    pub async fn grant_lease(&self, ttl: i64) -> Result<i64> {
        let mut lease = self.client.lease_client();
        let resp = tokio::time::timeout(OP_TIMEOUT, lease.grant(ttl, None))
            .await
            .map_err(|_| timeout_err("lease_grant", ""))?
            .map_err(|e| op_err("lease_grant", "", e))?;
        Ok(resp.id())
    }

    /// Open a keep-alive stream for a lease. The keeper sends renewal
    /// requests; the stream yields acknowledgements. The lease expires once
    /// the caller stops renewing.
    pub async fn keep_alive(&self, lease_id: i64) -> Result<(LeaseKeeper, LeaseKeepAliveStream)> {
        let mut lease = self.client.lease_client();
        lease
            .keep_alive(lease_id)
            .await
            .map_err(|e| op_err("lease_keep_alive", "", e))
    }

    pub async fn revoke_lease(&self, lease_id: i64) -> Result<()> {
        let mut lease = self.client.lease_client();
        tokio::time::timeout(OP_TIMEOUT, lease.revoke(lease_id))
            .await
            .map_err(|_| timeout_err("lease_revoke", ""))?
            .map_err(|e| op_err("lease_revoke", "", e))?;
        Ok(())
    }

    /// Atomically create `key` bound to a fresh lease of `ttl` seconds, but
    /// only if the key does not already exist (`create_revision == 0`).
    /// Returns the lease id on success and `LockAlreadyHeld` on contention.
    ///
    /// On contention the just-granted lease is left to expire on its own,
    /// which keeps the acquire path a single round-trip beyond the grant.
    pub async fn try_acquire(&self, key: &str, ttl: i64) -> Result<i64> {
        let lease_id = self.grant_lease(ttl).await?;

        let txn = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                key,
                "",
                Some(PutOptions::new().with_lease(lease_id)),
            )])
            .or_else(vec![TxnOp::get(key, None)]);

        let mut kv = self.client.kv_client();
        let resp = tokio::time::timeout(OP_TIMEOUT, kv.txn(txn))
            .await
            .map_err(|_| timeout_err("txn", key))?
            .map_err(|e| op_err("txn", key, e))?;

        if !resp.succeeded() {
            return Err(CronfleetError::LockAlreadyHeld(key.to_string()));
        }

        Ok(lease_id)
    }

    /// Watch all keys under a prefix. The stream delivers every Put and
    /// Delete under the prefix in commit order. Dropping the watcher ends
    /// the stream.
    pub async fn watch_prefix(&self, prefix: &str) -> Result<(Watcher, WatchStream)> {
        let mut watch = self.client.watch_client();
        let options = WatchOptions::new().with_prefix();
        watch
            .watch(prefix, Some(options))
            .await
            .map_err(|e| op_err("watch", prefix, e))
    }
}

fn op_err(op: &'static str, key: &str, source: etcd_client::Error) -> CronfleetError {
    CronfleetError::Etcd {
        op,
        key: key.to_string(),
        source,
    }
}

fn timeout_err(op: &'static str, key: &str) -> CronfleetError {
    CronfleetError::EtcdTimeout {
        op,
        key: key.to_string(),
    }
}
