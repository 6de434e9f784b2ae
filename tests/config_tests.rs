//! Unit tests for orchestrator configuration.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use flotilla::test_support::{FakeCloud, TEST_ZONE};
use flotilla::{
    ComputeConfig, ComputeError, ComputeService, CredentialStore, FileCredentialStore,
    TemplateBuilder, config::ConfigError, credential_key,
};
use rstest::*;
use tempfile::TempDir;

#[fixture]
fn valid_config() -> ComputeConfig {
    ComputeConfig {
        pool_size: 4,
        queue_capacity: 16,
        queue_wait_ms: 500,
        poll_interval_ms: 10,
        node_running_timeout_ms: 2_000,
        node_terminated_timeout_ms: 1_000,
        node_suspended_timeout_ms: 1_000,
        cleanup_timeout_ms: 500,
        resource_prefix: String::from("flotilla"),
        auto_allocate_addresses: false,
        default_location: None,
        credential_store_path: None,
    }
}

#[rstest]
#[case::pool_size(
    |cfg: &mut ComputeConfig| cfg.pool_size = 0,
    "FLOTILLA_POOL_SIZE",
    "pool_size"
)]
#[case::poll_interval(
    |cfg: &mut ComputeConfig| cfg.poll_interval_ms = 0,
    "FLOTILLA_POLL_INTERVAL_MS",
    "poll_interval_ms"
)]
#[case::running_timeout(
    |cfg: &mut ComputeConfig| cfg.node_running_timeout_ms = 0,
    "FLOTILLA_NODE_RUNNING_TIMEOUT_MS",
    "node_running_timeout_ms"
)]
#[case::terminated_timeout(
    |cfg: &mut ComputeConfig| cfg.node_terminated_timeout_ms = 0,
    "FLOTILLA_NODE_TERMINATED_TIMEOUT_MS",
    "node_terminated_timeout_ms"
)]
#[case::suspended_timeout(
    |cfg: &mut ComputeConfig| cfg.node_suspended_timeout_ms = 0,
    "FLOTILLA_NODE_SUSPENDED_TIMEOUT_MS",
    "node_suspended_timeout_ms"
)]
#[case::resource_prefix(
    |cfg: &mut ComputeConfig| cfg.resource_prefix = String::from("bad#prefix"),
    "FLOTILLA_RESOURCE_PREFIX",
    "resource_prefix"
)]
#[case::credential_store_path(
    |cfg: &mut ComputeConfig| cfg.credential_store_path = Some(String::from("  ")),
    "FLOTILLA_CREDENTIAL_STORE_PATH",
    "credential_store_path"
)]
fn validation_errors_name_env_var_and_toml_key(
    valid_config: ComputeConfig,
    #[case] mutate: fn(&mut ComputeConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_config;
    mutate(&mut cfg);

    let error = cfg.validate().expect_err("validation should fail");
    let ConfigError::InvalidField(ref message) = error else {
        panic!("expected InvalidField error, got {error:?}");
    };
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("flotilla.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn valid_config_passes_validation(valid_config: ComputeConfig) {
    valid_config
        .validate()
        .unwrap_or_else(|err| panic!("valid config should pass: {err}"));
}

#[rstest]
fn config_converts_into_pool_and_timeouts(valid_config: ComputeConfig) {
    let pool = valid_config.pool();
    assert_eq!(pool.workers, 4);
    assert_eq!(pool.queue_capacity, 16);
    assert_eq!(pool.queue_wait, Duration::from_millis(500));

    let timeouts = valid_config.timeouts();
    assert_eq!(timeouts.poll_interval, Duration::from_millis(10));
    assert_eq!(timeouts.node_running, Duration::from_secs(2));
    assert_eq!(timeouts.cleanup, Duration::from_millis(500));

    let creation = valid_config.creation();
    assert_eq!(creation.resource_prefix, "flotilla");
    assert!(!creation.auto_allocate_addresses);
    assert_eq!(creation.running, timeouts.running());
}

#[rstest]
fn invalid_config_is_rejected_by_the_service(valid_config: ComputeConfig) {
    let cfg = ComputeConfig {
        pool_size: 0,
        ..valid_config
    };
    let cloud = Arc::new(FakeCloud::new());

    let Err(err) = ComputeService::from_config(FakeCloud::provider(&cloud), &cfg) else {
        panic!("zero workers should be rejected");
    };
    assert!(
        matches!(err, ComputeError::Config(ConfigError::InvalidField(_))),
        "unexpected error: {err}"
    );
}

#[rstest]
#[tokio::test]
async fn service_from_config_persists_credentials_to_file(valid_config: ComputeConfig) {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    let path = root.join("credentials.json");
    let cfg = ComputeConfig {
        credential_store_path: Some(path.to_string()),
        default_location: Some(String::from(TEST_ZONE)),
        ..valid_config
    };
    let cloud = Arc::new(FakeCloud::new());
    let service = ComputeService::from_config(FakeCloud::provider(&cloud), &cfg)
        .unwrap_or_else(|err| panic!("service should build: {err}"));

    let created = service
        .create_nodes_in_group_matching("web", 2, TemplateBuilder::new())
        .await
        .unwrap_or_else(|err| panic!("creation should succeed: {err}"));

    let mut expected: Vec<String> = created
        .nodes
        .iter()
        .map(|node| credential_key(&node.id))
        .collect();
    expected.sort();
    let reopened = FileCredentialStore::new(path);
    let keys = reopened
        .keys()
        .unwrap_or_else(|err| panic!("store should be readable: {err}"));
    assert_eq!(keys, expected);
    assert!(
        created
            .nodes
            .iter()
            .all(|node| node.location.id == TEST_ZONE),
        "default location should apply: {:?}",
        created.nodes
    );
}
