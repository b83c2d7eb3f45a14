use std::collections::HashMap;
use std::io::Write;

use cronfleet::config::{Config, ConfigOverrides};

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn defaults_match_documented_values() {
    let config = Config::default();

    assert_eq!(config.etcd_endpoints, vec!["localhost:2379".to_string()]);
    assert_eq!(config.etcd_dial_timeout, 5000);
    assert_eq!(config.heartbeat_interval, 5000);
    assert_eq!(config.log_batch_size, 100);
    assert_eq!(config.log_commit_timeout, 1000);
    assert_eq!(config.executor_threads, 10);
    assert_eq!(config.job_lock_ttl, 5);
    assert_eq!(config.log_retention_days, 30);
    assert_eq!(config.api_port, 8070);
    assert_eq!(config.mongo_uri, "mongodb://localhost:27017");
    assert_eq!(config.mongo_connect_timeout, 5000);
    assert!(config.worker_id.is_empty());
}

#[test]
fn register_ttl_is_twice_heartbeat_with_floor() {
    let mut config = Config::default();
    assert_eq!(config.register_ttl_secs(), 10);

    config.heartbeat_interval = 1000;
    assert_eq!(config.register_ttl_secs(), 5);

    config.heartbeat_interval = 30_000;
    assert_eq!(config.register_ttl_secs(), 60);
}

#[test]
fn partial_file_merges_over_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"etcdEndpoints": ["etcd-a:2379", "etcd-b:2379"], "apiPort": 9000}}"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(
        config.etcd_endpoints,
        vec!["etcd-a:2379".to_string(), "etcd-b:2379".to_string()]
    );
    assert_eq!(config.api_port, 9000);
    // Untouched keys keep their defaults.
    assert_eq!(config.log_batch_size, 100);
}

#[test]
fn malformed_file_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "not json").unwrap();

    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn env_overrides_file_values() {
    let vars = env(&[
        ("ETCD_ENDPOINTS", "etcd-1:2379, etcd-2:2379"),
        ("WORKER_ID", "worker-env"),
        ("LOG_BATCH_SIZE", "25"),
        ("API_PORT", "9100"),
    ]);

    let mut config = Config::default();
    config.apply_env(|name| vars.get(name).cloned());

    assert_eq!(
        config.etcd_endpoints,
        vec!["etcd-1:2379".to_string(), "etcd-2:2379".to_string()]
    );
    assert_eq!(config.worker_id, "worker-env");
    assert_eq!(config.log_batch_size, 25);
    assert_eq!(config.api_port, 9100);
}

#[test]
fn unparseable_env_values_are_ignored() {
    let vars = env(&[("LOG_BATCH_SIZE", "lots"), ("API_PORT", "-1")]);

    let mut config = Config::default();
    config.apply_env(|name| vars.get(name).cloned());

    assert_eq!(config.log_batch_size, 100);
    assert_eq!(config.api_port, 8070);
}

#[test]
fn flags_override_env() {
    let vars = env(&[("WORKER_ID", "worker-env"), ("MONGO_URI", "mongodb://env:27017")]);

    let mut config = Config::default();
    config.apply_env(|name| vars.get(name).cloned());
    config.apply_overrides(&ConfigOverrides {
        worker_id: Some("worker-flag".to_string()),
        mongo_uri: Some("mongodb://flag:27017".to_string()),
        ..Default::default()
    });

    assert_eq!(config.worker_id, "worker-flag");
    assert_eq!(config.mongo_uri, "mongodb://flag:27017");
}
