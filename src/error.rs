//! Errors raised by compute operations, including the aggregate failures that
//! report partial batch outcomes.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::credential_store::CredentialStoreError;
use crate::domain::{NodeMetadata, NodeStatus};
use crate::pool::{PoolError, TaskError};
use crate::provider::ProviderError;
use crate::script::ExecResponse;
use crate::strategy::SharedResourceError;
use crate::template::ResolveError;

/// Errors raised by the creation strategy and the compute service.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// A filter selected no live nodes.
    #[error("no nodes matched {filter}")]
    NoMatch {
        /// Rendered filter.
        filter: String,
    },
    /// A node id is not known to the provider.
    #[error("node {id} not found")]
    NodeNotFound {
        /// Requested id.
        id: String,
    },
    /// A precondition of the operation does not hold.
    #[error("{message}")]
    IllegalState {
        /// Description of the violated precondition.
        message: String,
    },
    /// A node id is not of the form `{region}/{provider_id}`.
    #[error("invalid node id {id}: expected region/provider-id")]
    InvalidNodeId {
        /// Offending id.
        id: String,
    },
    /// A caller supplied argument is unusable.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },
    /// A node did not reach the expected state in time.
    #[error("node {node_id} did not reach {expected} within {timeout:?} (last status: {last_status})")]
    Timeout {
        /// Node id.
        node_id: String,
        /// Awaited state.
        expected: NodeStatus,
        /// Budget that expired.
        timeout: Duration,
        /// Last observed state, if any.
        last_status: LastStatus,
    },
    /// A post-boot or ad hoc script exited non-zero.
    #[error("script on node {node_id} exited with status {exit_status}")]
    ScriptFailed {
        /// Node id.
        node_id: String,
        /// Exit status.
        exit_status: i32,
    },
    /// A collaborator call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Shared resource setup failed.
    #[error(transparent)]
    SharedResource(#[from] SharedResourceError),
    /// Template resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The credential store failed.
    #[error(transparent)]
    Credentials(#[from] CredentialStoreError),
    /// The service configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The task pool could not be built or refused work.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// A pooled task failed outside its own result.
    #[error(transparent)]
    Task(#[from] TaskError),
    /// Some nodes of a creation batch failed.
    #[error(transparent)]
    RunNodes(Box<RunNodesError>),
    /// Some nodes of a script batch failed.
    #[error(transparent)]
    RunScriptOnNodes(Box<RunScriptOnNodesError>),
    /// Some nodes of a destroy, reboot, resume or suspend batch failed.
    #[error(transparent)]
    NodeOperation(Box<NodeOperationError>),
}

impl ComputeError {
    /// Returns the aggregate creation failure, if this is one.
    #[must_use]
    pub fn as_run_nodes(&self) -> Option<&RunNodesError> {
        match self {
            Self::RunNodes(inner) => Some(inner),
            _ => None,
        }
    }

    /// Returns the aggregate script failure, if this is one.
    #[must_use]
    pub fn as_run_script(&self) -> Option<&RunScriptOnNodesError> {
        match self {
            Self::RunScriptOnNodes(inner) => Some(inner),
            _ => None,
        }
    }

    /// Returns the aggregate node operation failure, if this is one.
    #[must_use]
    pub fn as_node_operation(&self) -> Option<&NodeOperationError> {
        match self {
            Self::NodeOperation(inner) => Some(inner),
            _ => None,
        }
    }
}

/// Last observed state carried by [`ComputeError::Timeout`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LastStatus(pub Option<NodeStatus>);

impl fmt::Display for LastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(status) => status.fmt(f),
            None => f.write_str("unknown"),
        }
    }
}

/// A node together with the reason it failed.
#[derive(Debug)]
pub struct FailedNode {
    /// Last known snapshot.
    pub node: NodeMetadata,
    /// Cause.
    pub error: ComputeError,
}

/// A script execution on one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeExecution {
    /// Node the script ran on.
    pub node: NodeMetadata,
    /// Execution result.
    pub response: ExecResponse,
}

/// Partial failure of a creation batch.
#[derive(Debug, Error)]
#[error(
    "error running {count} nodes in group {group}: {} succeeded, {} failed, {} execution errors",
    .good_nodes.len(),
    .bad_nodes.len(),
    .execution_exceptions.len()
)]
pub struct RunNodesError {
    /// Group the nodes were created in.
    pub group: String,
    /// Number of nodes requested.
    pub count: u32,
    /// Nodes that completed every step.
    pub good_nodes: Vec<NodeMetadata>,
    /// Nodes that failed, keyed by node id.
    pub bad_nodes: BTreeMap<String, FailedNode>,
    /// Failures not attributable to one node, keyed by task key.
    pub execution_exceptions: BTreeMap<String, ComputeError>,
    /// Customization responses of good nodes, keyed by node id.
    pub customizations: BTreeMap<String, ExecResponse>,
}

/// Partial failure of a script batch.
#[derive(Debug, Error)]
#[error(
    "error running script {script} on nodes matching {filter}: {} succeeded, {} failed, {} execution errors",
    .good_nodes.len(),
    .bad_nodes.len(),
    .execution_exceptions.len()
)]
pub struct RunScriptOnNodesError {
    /// Script name.
    pub script: String,
    /// Rendered node filter.
    pub filter: String,
    /// Executions that completed, keyed by node id.
    pub good_nodes: BTreeMap<String, NodeExecution>,
    /// Nodes that failed, keyed by node id.
    pub bad_nodes: BTreeMap<String, FailedNode>,
    /// Failures not attributable to one node, keyed by task key.
    pub execution_exceptions: BTreeMap<String, ComputeError>,
}

/// Single-node operation fanned out over a filtered node set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeAction {
    /// Terminate.
    Destroy,
    /// Reboot and await RUNNING.
    Reboot,
    /// Start and await RUNNING.
    Resume,
    /// Stop and await SUSPENDED.
    Suspend,
}

impl fmt::Display for NodeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Destroy => "destroy",
            Self::Reboot => "reboot",
            Self::Resume => "resume",
            Self::Suspend => "suspend",
        };
        f.write_str(name)
    }
}

/// Partial failure of a destroy, reboot, resume or suspend batch.
#[derive(Debug, Error)]
#[error(
    "error running {action} on nodes matching {filter}: {} succeeded, {} failed, {} execution errors",
    .succeeded.len(),
    .bad_nodes.len(),
    .execution_exceptions.len()
)]
pub struct NodeOperationError {
    /// Operation applied.
    pub action: NodeAction,
    /// Rendered node filter.
    pub filter: String,
    /// Nodes the operation completed on.
    pub succeeded: Vec<NodeMetadata>,
    /// Nodes that failed, keyed by node id.
    pub bad_nodes: BTreeMap<String, FailedNode>,
    /// Failures not attributable to one node, keyed by task key.
    pub execution_exceptions: BTreeMap<String, ComputeError>,
}
