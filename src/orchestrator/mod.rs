//! Lifecycle orchestration across many nodes.
//!
//! [`ComputeService`] is the public entry point. Every fan-out it performs
//! (creation, destroy, reboot, resume, suspend, script execution) runs on one
//! shared [`TaskPool`], and every batch is awaited in full before a result is
//! assembled. Callers receive either the complete success set or a single
//! aggregate [`ComputeError`] describing each partial success and failure.

mod cleanup;
mod filter;
mod lifecycle;
mod remote;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::ComputeConfig;
use crate::credential_store::{
    CredentialStore, FileCredentialStore, InMemoryCredentialStore, credential_key, save,
};
use crate::domain::{Hardware, Image, Location, NodeMetadata, split_node_id};
use crate::error::{ComputeError, FailedNode, RunNodesError};
use crate::pool::{Completion, TaskError, TaskPool};
use crate::provider::{Provider, ProviderError};
use crate::retry::RetryPolicy;
use crate::script::ExecResponse;
use crate::strategy::{CreationSettings, NodeCreationStrategy, NodeOutcome};
use crate::template::{Template, TemplateBuilder};

pub use filter::NodeFilter;

/// Budgets of the state transitions the orchestrator waits for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeouts {
    /// Pause between polls.
    pub poll_interval: Duration,
    /// Budget for reaching RUNNING after launch, reboot or resume.
    pub node_running: Duration,
    /// Budget for reaching TERMINATED after destroy.
    pub node_terminated: Duration,
    /// Budget for reaching SUSPENDED after suspend.
    pub node_suspended: Duration,
    /// Budget for deleting group resources once a group is empty.
    pub cleanup: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            node_running: Duration::from_secs(1_200),
            node_terminated: Duration::from_secs(30),
            node_suspended: Duration::from_secs(30),
            cleanup: Duration::from_secs(3),
        }
    }
}

impl Timeouts {
    /// Polling used while waiting for RUNNING.
    #[must_use]
    pub const fn running(&self) -> RetryPolicy {
        RetryPolicy::new(self.poll_interval, self.node_running)
    }

    /// Polling used while waiting for TERMINATED.
    #[must_use]
    pub const fn terminated(&self) -> RetryPolicy {
        RetryPolicy::new(self.poll_interval, self.node_terminated)
    }

    /// Polling used while waiting for SUSPENDED.
    #[must_use]
    pub const fn suspended(&self) -> RetryPolicy {
        RetryPolicy::new(self.poll_interval, self.node_suspended)
    }

    /// Polling used while deleting group resources.
    #[must_use]
    pub const fn cleanup(&self) -> RetryPolicy {
        RetryPolicy::new(self.poll_interval, self.cleanup)
    }
}

/// Nodes created by a fully successful batch.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreatedNodes {
    /// Nodes in id order.
    pub nodes: Vec<NodeMetadata>,
    /// Customization responses keyed by node id.
    pub customizations: BTreeMap<String, ExecResponse>,
}

/// Provisions and drives nodes through their lifecycle.
///
/// Cloning is cheap; clones share the pool, caches and credential store.
#[derive(Clone)]
pub struct ComputeService {
    provider: Provider,
    strategy: NodeCreationStrategy,
    credentials: Arc<dyn CredentialStore>,
    pool: TaskPool,
    timeouts: Timeouts,
    default_location: Option<String>,
}

impl ComputeService {
    /// Assembles a service from its parts.
    #[must_use]
    pub fn new(
        provider: Provider,
        credentials: Arc<dyn CredentialStore>,
        pool: TaskPool,
        timeouts: Timeouts,
        creation: CreationSettings,
    ) -> Self {
        let strategy =
            NodeCreationStrategy::new(provider.clone(), Arc::clone(&credentials), creation);
        Self {
            provider,
            strategy,
            credentials,
            pool,
            timeouts,
            default_location: None,
        }
    }

    /// Builds a service from validated configuration. A file-backed
    /// credential store is used when `credential_store_path` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Config`] when validation fails and
    /// [`ComputeError::Pool`] when the pool cannot be built.
    pub fn from_config(provider: Provider, config: &ComputeConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        let credentials: Arc<dyn CredentialStore> = match &config.credential_store_path {
            Some(path) => Arc::new(FileCredentialStore::new(path.as_str())),
            None => Arc::new(InMemoryCredentialStore::new()),
        };
        let pool = TaskPool::new(config.pool())?;
        let mut service = Self::new(
            provider,
            credentials,
            pool,
            config.timeouts(),
            config.creation(),
        );
        service.default_location.clone_from(&config.default_location);
        Ok(service)
    }

    /// Location applied to builders that constrain none.
    #[must_use]
    pub fn with_default_location(mut self, location: impl Into<String>) -> Self {
        self.default_location = Some(location.into());
        self
    }

    /// Collaborator bundle.
    #[must_use]
    pub const fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Creation strategy, including its shared resource caches.
    #[must_use]
    pub const fn strategy(&self) -> &NodeCreationStrategy {
        &self.strategy
    }

    /// Credential store.
    #[must_use]
    pub fn credentials(&self) -> &dyn CredentialStore {
        self.credentials.as_ref()
    }

    /// Shared task pool.
    #[must_use]
    pub const fn pool(&self) -> &TaskPool {
        &self.pool
    }

    /// Transition budgets.
    #[must_use]
    pub const fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Lists every node the provider reports, terminated ones included.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Provider`] when listing fails.
    pub async fn list_nodes(&self) -> Result<Vec<NodeMetadata>, ComputeError> {
        Ok(self.provider.controller.list_nodes().await?)
    }

    /// Lists live nodes selected by `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Provider`] when listing fails.
    pub async fn list_nodes_matching(
        &self,
        filter: &NodeFilter,
    ) -> Result<Vec<NodeMetadata>, ComputeError> {
        let mut nodes: Vec<NodeMetadata> = self
            .list_nodes()
            .await?
            .into_iter()
            .filter(|node| node.is_live() && filter.matches(node))
            .collect();
        nodes.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(nodes)
    }

    /// Describes one node.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::InvalidNodeId`] for malformed ids and
    /// [`ComputeError::Provider`] when the lookup fails.
    pub async fn node_metadata(&self, id: &str) -> Result<Option<NodeMetadata>, ComputeError> {
        parse_node_id(id)?;
        Ok(self.provider.controller.describe(id).await?)
    }

    /// Images offered by the provider.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Provider`] when the catalog cannot be read.
    pub async fn list_images(&self) -> Result<Vec<Image>, ComputeError> {
        Ok(self.provider.catalog.catalog().await?.images)
    }

    /// Hardware profiles offered by the provider.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Provider`] when the catalog cannot be read.
    pub async fn list_hardware_profiles(&self) -> Result<Vec<Hardware>, ComputeError> {
        Ok(self.provider.catalog.catalog().await?.hardware)
    }

    /// Locations nodes can be placed in.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Provider`] when the catalog cannot be read.
    pub async fn list_assignable_locations(&self) -> Result<Vec<Location>, ComputeError> {
        Ok(self.provider.catalog.catalog().await?.locations)
    }

    /// Looks up one image by id.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Provider`] when the catalog cannot be read.
    pub async fn image(&self, id: &str) -> Result<Option<Image>, ComputeError> {
        Ok(self
            .list_images()
            .await?
            .into_iter()
            .find(|image| image.id == id))
    }

    /// Creates `count` nodes in `group` from the template an unconstrained
    /// builder resolves to.
    ///
    /// # Errors
    ///
    /// As for [`Self::create_nodes_in_group_matching`].
    pub async fn create_nodes_in_group_with_defaults(
        &self,
        group: &str,
        count: u32,
    ) -> Result<CreatedNodes, ComputeError> {
        self.create_nodes_in_group_matching(group, count, TemplateBuilder::new())
            .await
    }

    /// Resolves `builder` against the provider catalog and creates `count`
    /// nodes in `group`.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::Resolve`] before any work starts when no
    /// template matches, and otherwise the errors of
    /// [`Self::create_nodes_in_group`].
    pub async fn create_nodes_in_group_matching(
        &self,
        group: &str,
        count: u32,
        mut builder: TemplateBuilder,
    ) -> Result<CreatedNodes, ComputeError> {
        if let Some(location) = &self.default_location {
            builder.default_location(location.clone());
        }
        let catalog = self.provider.catalog.catalog().await?;
        let template = builder.resolve(&catalog)?;
        info!(
            group,
            image = %template.image.id,
            hardware = %template.hardware.id,
            location = %template.location,
            "resolved template"
        );
        self.create_nodes_in_group(group, count, &template).await
    }

    /// Creates `count` nodes in `group` from `template`.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::InvalidArgument`] for an unusable group name
    /// and [`ComputeError::RunNodes`] when any node failed or any work could
    /// not be scheduled. The aggregate carries the nodes that did succeed.
    pub async fn create_nodes_in_group(
        &self,
        group: &str,
        count: u32,
        template: &Template,
    ) -> Result<CreatedNodes, ComputeError> {
        validate_group(group)?;
        let dispatch = self
            .strategy
            .create(&self.pool, group, count, template)
            .await;
        let completion = dispatch.batch.await_completion().await;

        let mut created = CreatedNodes::default();
        let mut bad_nodes = BTreeMap::new();
        let mut execution_exceptions = dispatch.exceptions;
        for (id, outcome) in completion.results {
            self.persist_credentials(outcome.node(), &mut execution_exceptions)
                .await;
            match outcome {
                NodeOutcome::Ok {
                    node,
                    customization,
                } => {
                    if let Some(response) = customization {
                        created.customizations.insert(id, response);
                    }
                    created.nodes.push(node);
                }
                NodeOutcome::Failed { node, error } => {
                    bad_nodes.insert(id, FailedNode { node, error });
                }
            }
        }
        record_task_errors(completion.exceptions, &mut execution_exceptions);

        info!(
            group,
            requested = count,
            good = created.nodes.len(),
            bad = bad_nodes.len(),
            exceptions = execution_exceptions.len(),
            "node creation finished"
        );
        if bad_nodes.is_empty() && execution_exceptions.is_empty() {
            return Ok(created);
        }
        Err(ComputeError::RunNodes(Box::new(RunNodesError {
            group: group.to_owned(),
            count,
            good_nodes: created.nodes,
            bad_nodes,
            execution_exceptions,
            customizations: created.customizations,
        })))
    }

    async fn persist_credentials(
        &self,
        node: &NodeMetadata,
        exceptions: &mut BTreeMap<String, ComputeError>,
    ) {
        let Some(credentials) = &node.credentials else {
            return;
        };
        let key = credential_key(&node.id);
        if let Err(err) = save(&self.credentials, key.clone(), credentials.clone()).await {
            warn!(node_id = %node.id, error = %err, "failed to persist credentials");
            exceptions.insert(key, err.into());
        }
    }
}

/// Splits a qualified id or reports it as invalid.
fn parse_node_id(id: &str) -> Result<(&str, &str), ComputeError> {
    split_node_id(id).ok_or_else(|| ComputeError::InvalidNodeId { id: id.to_owned() })
}

fn validate_group(group: &str) -> Result<(), ComputeError> {
    if group.trim().is_empty() || group.contains('#') || group.contains('/') {
        return Err(ComputeError::InvalidArgument {
            message: format!("group name {group:?} must be non-empty without '#' or '/'"),
        });
    }
    Ok(())
}

/// Maps a provider "not found" on `id` to [`ComputeError::NodeNotFound`].
fn node_error(id: &str, err: ProviderError) -> ComputeError {
    match err {
        ProviderError::NotFound { .. } => ComputeError::NodeNotFound { id: id.to_owned() },
        other => other.into(),
    }
}

fn record_task_errors(
    errors: BTreeMap<String, TaskError>,
    exceptions: &mut BTreeMap<String, ComputeError>,
) {
    exceptions.extend(errors.into_iter().map(|(key, err)| (key, err.into())));
}

/// Per-node results of a fan-out keyed by node id.
struct Partition<T> {
    succeeded: BTreeMap<String, T>,
    bad_nodes: BTreeMap<String, FailedNode>,
    execution_exceptions: BTreeMap<String, ComputeError>,
}

impl<T> Partition<T> {
    /// Splits a completion into successes, node failures and execution
    /// failures. Results for ids missing from `nodes` become execution
    /// failures so every bad node carries a snapshot.
    fn of(
        completion: Completion<Result<T, ComputeError>>,
        nodes: &BTreeMap<String, NodeMetadata>,
    ) -> Self {
        let mut partition = Self {
            succeeded: BTreeMap::new(),
            bad_nodes: BTreeMap::new(),
            execution_exceptions: BTreeMap::new(),
        };
        for (id, result) in completion.results {
            match (result, nodes.get(&id)) {
                (Ok(value), _) => {
                    partition.succeeded.insert(id, value);
                }
                (Err(error), Some(node)) => {
                    partition.bad_nodes.insert(
                        id,
                        FailedNode {
                            node: node.clone(),
                            error,
                        },
                    );
                }
                (Err(error), None) => {
                    partition.execution_exceptions.insert(id, error);
                }
            }
        }
        record_task_errors(completion.exceptions, &mut partition.execution_exceptions);
        partition
    }

    fn is_clean(&self) -> bool {
        self.bad_nodes.is_empty() && self.execution_exceptions.is_empty()
    }
}
