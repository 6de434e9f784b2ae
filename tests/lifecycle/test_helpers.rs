//! Shared fixtures for lifecycle BDD scenarios.

use std::sync::Arc;
use std::time::Duration;

use flotilla::test_support::FakeCloud;
use flotilla::{
    ComputeError, ComputeService, CreationSettings, CredentialStore, InMemoryCredentialStore,
    NodeMetadata, PoolConfig, TaskPool, Timeouts,
};
use rstest::fixture;

/// Result of the last `When` step, reduced to what the assertions need.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OperationOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub error: Option<String>,
}

impl OperationOutcome {
    pub fn from_nodes(nodes: &[NodeMetadata]) -> Self {
        Self {
            succeeded: nodes.len(),
            ..Self::default()
        }
    }

    pub fn from_error(err: &ComputeError) -> Self {
        let (succeeded, failed) = if let Some(aggregate) = err.as_run_nodes() {
            (aggregate.good_nodes.len(), aggregate.bad_nodes.len())
        } else if let Some(aggregate) = err.as_node_operation() {
            (aggregate.succeeded.len(), aggregate.bad_nodes.len())
        } else if let Some(aggregate) = err.as_run_script() {
            (aggregate.good_nodes.len(), aggregate.bad_nodes.len())
        } else {
            (0, 0)
        };
        Self {
            succeeded,
            failed,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct LifecycleContext {
    pub cloud: Arc<FakeCloud>,
    pub store: Arc<InMemoryCredentialStore>,
    pub service: ComputeService,
    pub outcome: Option<OperationOutcome>,
}

#[fixture]
pub fn lifecycle_context() -> LifecycleContext {
    let timeouts = Timeouts {
        poll_interval: Duration::from_millis(10),
        node_running: Duration::from_secs(2),
        node_terminated: Duration::from_secs(2),
        node_suspended: Duration::from_secs(2),
        cleanup: Duration::from_secs(1),
    };
    let cloud = Arc::new(FakeCloud::new());
    let store = Arc::new(InMemoryCredentialStore::new());
    let pool = TaskPool::new(PoolConfig {
        workers: 4,
        ..PoolConfig::default()
    })
    .unwrap_or_else(|err| panic!("pool should build: {err}"));
    let service = ComputeService::new(
        FakeCloud::provider(&cloud),
        Arc::clone(&store) as Arc<dyn CredentialStore>,
        pool,
        timeouts,
        CreationSettings {
            resource_prefix: String::from("flotilla"),
            auto_allocate_addresses: false,
            running: timeouts.running(),
        },
    );
    LifecycleContext {
        cloud,
        store,
        service,
        outcome: None,
    }
}
