//! Deletes group resources once the last node of a group is gone.
//!
//! Cleanup is best effort: every failure is logged and swallowed so a
//! successful destroy is never reported as failed because of it.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::NodeMetadata;
use crate::provider::ProviderError;
use crate::retry::{Attempt, poll_until};

use super::ComputeService;

impl ComputeService {
    /// Deletes the marker security group and auto-created key pairs of every
    /// (region, group) among `destroyed` that has no live node left.
    pub(super) async fn cleanup_incidental(&self, destroyed: &[NodeMetadata]) {
        let scopes: BTreeSet<(String, String)> = destroyed
            .iter()
            .filter_map(|node| Some((node.region()?.to_owned(), node.group.clone()?)))
            .collect();
        if scopes.is_empty() {
            return;
        }
        let live: Vec<NodeMetadata> = match self.provider.controller.list_nodes().await {
            Ok(nodes) => nodes.into_iter().filter(NodeMetadata::is_live).collect(),
            Err(err) => {
                warn!(error = %err, "skipping group cleanup: cannot list nodes");
                return;
            }
        };

        for (region, group) in scopes {
            let occupied = live.iter().any(|node| {
                node.region() == Some(region.as_str()) && node.group.as_deref() == Some(group.as_str())
            });
            if occupied {
                debug!(region = %region, group = %group, "group still has live nodes");
                continue;
            }
            self.delete_marker_group(&region, &group).await;
            self.delete_group_key_pairs(&region, &group, &live).await;
        }
    }

    async fn delete_marker_group(&self, region: &str, group: &str) {
        let policy = self.strategy.security_groups();
        let name = policy.marker_name(group, region);
        let manager = &self.provider.security_groups;
        let marker = match manager.describe(region, &name).await {
            Ok(Some(marker)) => marker,
            Ok(None) => {
                policy.forget(region, group);
                return;
            }
            Err(err) => {
                warn!(region, security_group = %name, error = %err, "cannot look up marker group");
                return;
            }
        };

        let deleted = poll_until(self.timeouts.cleanup(), || {
            let groups = Arc::clone(manager);
            let (region_name, group_id) = (region.to_owned(), marker.id.clone());
            async move {
                match groups.delete(&region_name, &group_id).await {
                    Ok(()) => Ok(Attempt::Ready(())),
                    Err(ProviderError::IllegalState(reason)) => {
                        debug!(region = %region_name, security_group = %group_id, reason = %reason, "marker group still in use");
                        Ok(Attempt::Pending(None))
                    }
                    Err(err) => Err(err),
                }
            }
        })
        .await;
        match deleted {
            Ok(outcome) if outcome.satisfied => {
                policy.forget(region, group);
                info!(region, security_group = %name, "deleted marker group");
            }
            Ok(_) => warn!(region, security_group = %name, "marker group still in use after cleanup timeout"),
            Err(err) => warn!(region, security_group = %name, error = %err, "failed to delete marker group"),
        }
    }

    async fn delete_group_key_pairs(&self, region: &str, group: &str, live: &[NodeMetadata]) {
        let policy = self.strategy.key_pairs();
        let manager = &self.provider.key_pairs;
        let prefix = policy.group_prefix(group);
        let key_pairs = match manager.list(region).await {
            Ok(key_pairs) => key_pairs,
            Err(err) => {
                warn!(region, group, error = %err, "cannot list key pairs");
                return;
            }
        };
        for key_pair in key_pairs.iter().filter(|key_pair| key_pair.name.starts_with(&prefix)) {
            let in_use = live
                .iter()
                .any(|node| node.key_name.as_deref() == Some(key_pair.name.as_str()));
            if in_use {
                debug!(region, key_pair = %key_pair.name, "key pair still in use");
                continue;
            }
            match manager.delete(region, &key_pair.name).await {
                Ok(()) => {
                    policy.forget(region, group, &key_pair.name);
                    info!(region, key_pair = %key_pair.name, "deleted key pair");
                }
                Err(err) => warn!(region, key_pair = %key_pair.name, error = %err, "failed to delete key pair"),
            }
        }
    }
}
