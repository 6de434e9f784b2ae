//! Destroy, reboot, resume and suspend, for one node or a filtered set.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::credential_store::{credential_key, discard};
use crate::domain::{NodeMetadata, NodeStatus};
use crate::error::{ComputeError, LastStatus, NodeAction, NodeOperationError};
use crate::pool::Batch;
use crate::provider::{InstanceController, ProviderError};
use crate::retry::{Attempt, RetryPolicy, poll_until};

use super::{ComputeService, NodeFilter, Partition, node_error, parse_node_id};

impl ComputeService {
    /// Destroys one node and then deletes group resources left unused.
    ///
    /// Returns the node's last snapshot, or `None` when the provider no
    /// longer reported it.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::InvalidNodeId`] for malformed ids,
    /// [`ComputeError::Timeout`] when the node never reaches TERMINATED and
    /// [`ComputeError::Provider`] for non-retryable provider failures.
    pub async fn destroy_node(&self, id: &str) -> Result<Option<NodeMetadata>, ComputeError> {
        let destroyed = self.destroy_one(id).await?;
        if let Some(node) = &destroyed {
            self.cleanup_incidental(std::slice::from_ref(node)).await;
        }
        Ok(destroyed)
    }

    /// Destroys every live node selected by `filter` and returns them.
    ///
    /// Selecting nothing is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::NodeOperation`] when any node failed; the
    /// aggregate lists the nodes that were destroyed.
    pub async fn destroy_nodes_matching(
        &self,
        filter: &NodeFilter,
    ) -> Result<Vec<NodeMetadata>, ComputeError> {
        let nodes = self.list_nodes_matching(filter).await?;
        if nodes.is_empty() {
            debug!(filter = %filter, "no nodes to destroy");
            return Ok(Vec::new());
        }
        let targets = index_by_id(nodes);

        let mut batch = Batch::new();
        for key in targets.keys() {
            let service = self.clone();
            let id = key.clone();
            batch
                .submit(&self.pool, key.clone(), async move { service.destroy_one(&id).await })
                .await;
        }
        let partition = Partition::of(batch.await_completion().await, &targets);

        let destroyed: Vec<NodeMetadata> = partition
            .succeeded
            .iter()
            .filter_map(|(id, snapshot)| snapshot.clone().or_else(|| targets.get(id).cloned()))
            .collect();
        self.cleanup_incidental(&destroyed).await;
        info!(filter = %filter, destroyed = destroyed.len(), "destroy finished");
        finish(NodeAction::Destroy, filter, destroyed, partition)
    }

    /// Reboots one node and waits until it is RUNNING again.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::NodeNotFound`] when the node is unknown,
    /// [`ComputeError::Timeout`] when it does not come back in time and
    /// [`ComputeError::IllegalState`] when it enters ERROR.
    pub async fn reboot_node(&self, id: &str) -> Result<NodeMetadata, ComputeError> {
        self.transition(id, NodeAction::Reboot).await
    }

    /// Starts one suspended node and waits until it is RUNNING.
    ///
    /// # Errors
    ///
    /// As for [`Self::reboot_node`].
    pub async fn resume_node(&self, id: &str) -> Result<NodeMetadata, ComputeError> {
        self.transition(id, NodeAction::Resume).await
    }

    /// Stops one node and waits until it is SUSPENDED.
    ///
    /// # Errors
    ///
    /// As for [`Self::reboot_node`].
    pub async fn suspend_node(&self, id: &str) -> Result<NodeMetadata, ComputeError> {
        self.transition(id, NodeAction::Suspend).await
    }

    /// Reboots every live node selected by `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::NoMatch`] when nothing is selected and
    /// [`ComputeError::NodeOperation`] when any node failed.
    pub async fn reboot_nodes_matching(
        &self,
        filter: &NodeFilter,
    ) -> Result<Vec<NodeMetadata>, ComputeError> {
        self.transition_matching(filter, NodeAction::Reboot).await
    }

    /// Resumes every live node selected by `filter`.
    ///
    /// # Errors
    ///
    /// As for [`Self::reboot_nodes_matching`].
    pub async fn resume_nodes_matching(
        &self,
        filter: &NodeFilter,
    ) -> Result<Vec<NodeMetadata>, ComputeError> {
        self.transition_matching(filter, NodeAction::Resume).await
    }

    /// Suspends every live node selected by `filter`.
    ///
    /// # Errors
    ///
    /// As for [`Self::reboot_nodes_matching`].
    pub async fn suspend_nodes_matching(
        &self,
        filter: &NodeFilter,
    ) -> Result<Vec<NodeMetadata>, ComputeError> {
        self.transition_matching(filter, NodeAction::Suspend).await
    }

    /// Terminates one node, retrying while the provider reports it busy,
    /// then releases its address and forgets its credentials.
    pub(super) async fn destroy_one(&self, id: &str) -> Result<Option<NodeMetadata>, ComputeError> {
        let (region, provider_id) = parse_node_id(id)?;
        let policy = self.timeouts.terminated();

        let terminated = poll_until(policy, || {
            let controller = Arc::clone(&self.provider.controller);
            let (region_name, instance_id) = (region.to_owned(), provider_id.to_owned());
            async move {
                match controller.terminate(&region_name, &instance_id).await {
                    Ok(snapshot) => Ok(Attempt::Ready(snapshot)),
                    Err(ProviderError::IllegalState(reason)) => {
                        debug!(region = %region_name, provider_id = %instance_id, reason = %reason, "terminate deferred");
                        Ok(Attempt::Pending(None))
                    }
                    Err(err) => Err(ComputeError::from(err)),
                }
            }
        })
        .await?;
        if !terminated.satisfied {
            return Err(timeout(id, NodeStatus::Terminated, policy, None));
        }
        let snapshot = terminated.last.flatten();

        let confirmed = poll_until(policy, || {
            let controller = Arc::clone(&self.provider.controller);
            let node_id = id.to_owned();
            async move {
                match controller.describe(&node_id).await {
                    Ok(None) => Ok(Attempt::Ready(None)),
                    Ok(Some(observed)) if observed.status == NodeStatus::Terminated => {
                        Ok(Attempt::Ready(Some(observed)))
                    }
                    Ok(Some(observed)) => Ok(Attempt::Pending(Some(Some(observed)))),
                    Err(err) => Err(ComputeError::from(err)),
                }
            }
        })
        .await?;
        if !confirmed.satisfied {
            let last = confirmed.last.flatten().map(|observed| observed.status);
            return Err(timeout(id, NodeStatus::Terminated, policy, last));
        }

        self.release_address(region, provider_id).await;
        discard(&self.credentials, credential_key(id)).await?;
        info!(node_id = id, "node destroyed");
        Ok(snapshot
            .or_else(|| confirmed.last.flatten())
            .map(|node| node.with_status(NodeStatus::Terminated)))
    }

    async fn release_address(&self, region: &str, provider_id: &str) {
        let Some(address) = self.strategy.addresses().remove(region, provider_id) else {
            return;
        };
        let manager = &self.provider.addresses;
        if let Err(err) = manager.disassociate(region, &address).await {
            warn!(region, address = %address, error = %err, "failed to disassociate address");
        }
        match manager.release(region, &address).await {
            Ok(()) => debug!(region, address = %address, "released address"),
            Err(err) => warn!(region, address = %address, error = %err, "failed to release address"),
        }
    }

    async fn transition(&self, id: &str, action: NodeAction) -> Result<NodeMetadata, ComputeError> {
        let (region, provider_id) = parse_node_id(id)?;
        let controller = &self.provider.controller;
        let requested = match action {
            NodeAction::Reboot => controller.reboot(region, provider_id).await,
            NodeAction::Resume => controller.resume(region, provider_id).await,
            NodeAction::Suspend => controller.suspend(region, provider_id).await,
            NodeAction::Destroy => {
                return Err(ComputeError::InvalidArgument {
                    message: String::from("destroy is not a state transition"),
                });
            }
        };
        requested.map_err(|err| node_error(id, err))?;
        let (target, policy) = target_of(action, self.timeouts);

        let node = await_status(controller, id, target, policy).await?;
        info!(node_id = id, action = %action, status = %node.status, "node transition finished");
        Ok(node)
    }

    async fn transition_matching(
        &self,
        filter: &NodeFilter,
        action: NodeAction,
    ) -> Result<Vec<NodeMetadata>, ComputeError> {
        let nodes = self.list_nodes_matching(filter).await?;
        if nodes.is_empty() {
            return Err(ComputeError::NoMatch {
                filter: filter.to_string(),
            });
        }
        let targets = index_by_id(nodes);

        let mut batch = Batch::new();
        for key in targets.keys() {
            let service = self.clone();
            let id = key.clone();
            batch
                .submit(&self.pool, key.clone(), async move {
                    service.transition(&id, action).await
                })
                .await;
        }
        let partition = Partition::of(batch.await_completion().await, &targets);
        let succeeded: Vec<NodeMetadata> = partition.succeeded.values().cloned().collect();
        info!(filter = %filter, action = %action, succeeded = succeeded.len(), "batch transition finished");
        finish(action, filter, succeeded, partition)
    }
}

/// State and budget awaited after `action`.
const fn target_of(action: NodeAction, timeouts: super::Timeouts) -> (NodeStatus, RetryPolicy) {
    match action {
        NodeAction::Suspend => (NodeStatus::Suspended, timeouts.suspended()),
        NodeAction::Destroy => (NodeStatus::Terminated, timeouts.terminated()),
        NodeAction::Reboot | NodeAction::Resume => (NodeStatus::Running, timeouts.running()),
    }
}

/// Polls `id` until it reports `target`.
async fn await_status(
    controller: &Arc<dyn InstanceController>,
    id: &str,
    target: NodeStatus,
    policy: RetryPolicy,
) -> Result<NodeMetadata, ComputeError> {
    let outcome = poll_until(policy, || {
        let instances = Arc::clone(controller);
        let node_id = id.to_owned();
        async move {
            match instances.describe(&node_id).await {
                Ok(Some(observed)) if observed.status == target => Ok(Attempt::Ready(observed)),
                Ok(Some(observed)) if observed.status == NodeStatus::Error => {
                    Err(ComputeError::IllegalState {
                        message: format!("node {node_id} entered ERROR while waiting for {target}"),
                    })
                }
                Ok(Some(observed)) => Ok(Attempt::Pending(Some(observed))),
                Ok(None) => Err(ComputeError::NodeNotFound { id: node_id }),
                Err(ProviderError::IllegalState(_)) => Ok(Attempt::Pending(None)),
                Err(err) => Err(err.into()),
            }
        }
    })
    .await?;
    match outcome.last {
        Some(node) if outcome.satisfied => Ok(node),
        last => Err(timeout(
            id,
            target,
            policy,
            last.map(|observed| observed.status),
        )),
    }
}

fn timeout(
    id: &str,
    expected: NodeStatus,
    policy: RetryPolicy,
    last_status: Option<NodeStatus>,
) -> ComputeError {
    ComputeError::Timeout {
        node_id: id.to_owned(),
        expected,
        timeout: policy.timeout,
        last_status: LastStatus(last_status),
    }
}

fn index_by_id(nodes: Vec<NodeMetadata>) -> BTreeMap<String, NodeMetadata> {
    nodes.into_iter().map(|node| (node.id.clone(), node)).collect()
}

fn finish<T>(
    action: NodeAction,
    filter: &NodeFilter,
    succeeded: Vec<NodeMetadata>,
    partition: Partition<T>,
) -> Result<Vec<NodeMetadata>, ComputeError> {
    if partition.is_clean() {
        return Ok(succeeded);
    }
    Err(ComputeError::NodeOperation(Box::new(NodeOperationError {
        action,
        filter: filter.to_string(),
        succeeded,
        bad_nodes: partition.bad_nodes,
        execution_exceptions: partition.execution_exceptions,
    })))
}
