//! Node creation: shared resource setup, one launch per batch, then pooled
//! per-instance provisioning.
//!
//! [`NodeCreationStrategy::create`] resolves the group's key pair and security
//! groups once, issues a single launch for the whole batch and then submits
//! one task per launched instance. Each task tags the instance, optionally
//! associates a public address, records credentials, waits for `RUNNING` and
//! runs the template's customization script. Failures never escape a task as
//! panics or early returns; they are folded into [`NodeOutcome::Failed`] so the
//! caller can partition good and bad nodes after the batch completes.

mod address;
mod key_pair;
mod provision;
mod security_group;

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::credential_store::CredentialStore;
use crate::domain::{NodeMetadata, qualified_node_id};
use crate::error::ComputeError;
use crate::pool::{Batch, TaskPool};
use crate::provider::{LaunchSpec, Provider, ProviderError};
use crate::retry::RetryPolicy;
use crate::script::ExecResponse;
use crate::template::Template;

pub use address::AddressCache;
pub use key_pair::{KeyPairCache, KeyPairPolicy};
pub use security_group::{SecurityGroupCache, SecurityGroupPolicy, marker_group_name};

use provision::Provisioner;

/// Errors raised while preparing shared resources.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SharedResourceError {
    /// A provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// A named key pair is required for a post-boot script but its private
    /// material is unknown.
    #[error(
        "key pair {key_name} in {region} has no private key available; supply one via the login credential overrides"
    )]
    MissingPrivateKey {
        /// Region of the key pair.
        region: String,
        /// Key pair name.
        key_name: String,
    },
}

/// Tunables of the creation strategy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreationSettings {
    /// Prefix of auto-created key pair and security group names.
    pub resource_prefix: String,
    /// Allocate and associate a public address for every node.
    pub auto_allocate_addresses: bool,
    /// Polling used while waiting for nodes to run.
    pub running: RetryPolicy,
}

/// Result of provisioning one launched instance.
#[derive(Debug)]
pub enum NodeOutcome {
    /// Every provisioning step succeeded.
    Ok {
        /// Final node snapshot.
        node: NodeMetadata,
        /// Response of the customization script, when one ran.
        customization: Option<ExecResponse>,
    },
    /// A provisioning step failed.
    Failed {
        /// Node snapshot at the time of failure.
        node: NodeMetadata,
        /// Cause.
        error: ComputeError,
    },
}

impl NodeOutcome {
    /// Node the outcome describes.
    #[must_use]
    pub const fn node(&self) -> &NodeMetadata {
        match self {
            Self::Ok { node, .. } | Self::Failed { node, .. } => node,
        }
    }
}

/// Work scheduled by one call to [`NodeCreationStrategy::create`].
#[derive(Debug, Default)]
pub struct Dispatch {
    /// One task per launched instance, keyed by node id.
    pub batch: Batch<NodeOutcome>,
    /// Failures that happened before or instead of per-node work, keyed by
    /// `launch#{group}` or `launch#{group}#{index}`.
    pub exceptions: BTreeMap<String, ComputeError>,
}

/// Key under which launch-level failures are reported.
#[must_use]
pub fn launch_key(group: &str) -> String {
    format!("launch#{group}")
}

/// Key under which a missing instance of a short reservation is reported.
#[must_use]
pub fn shortfall_key(group: &str, index: u32) -> String {
    format!("launch#{group}#{index}")
}

/// Creates nodes for a group from a resolved template.
#[derive(Clone)]
pub struct NodeCreationStrategy {
    provider: Provider,
    key_pairs: KeyPairPolicy,
    security_groups: SecurityGroupPolicy,
    addresses: Arc<AddressCache>,
    credentials: Arc<dyn CredentialStore>,
    settings: CreationSettings,
}

impl NodeCreationStrategy {
    /// Creates a strategy with fresh shared resource caches.
    #[must_use]
    pub fn new(
        provider: Provider,
        credentials: Arc<dyn CredentialStore>,
        settings: CreationSettings,
    ) -> Self {
        let key_pairs = KeyPairPolicy::new(
            Arc::clone(&provider.key_pairs),
            Arc::new(KeyPairCache::new("key-pairs")),
            settings.resource_prefix.clone(),
        );
        let security_groups = SecurityGroupPolicy::new(
            Arc::clone(&provider.security_groups),
            Arc::new(SecurityGroupCache::new("security-groups")),
            settings.resource_prefix.clone(),
        );
        Self {
            provider,
            key_pairs,
            security_groups,
            addresses: Arc::new(AddressCache::default()),
            credentials,
            settings,
        }
    }

    /// Key pair policy shared with cleanup.
    #[must_use]
    pub const fn key_pairs(&self) -> &KeyPairPolicy {
        &self.key_pairs
    }

    /// Security group policy shared with cleanup.
    #[must_use]
    pub const fn security_groups(&self) -> &SecurityGroupPolicy {
        &self.security_groups
    }

    /// Addresses associated by this strategy, consulted on destroy.
    #[must_use]
    pub fn addresses(&self) -> &AddressCache {
        &self.addresses
    }

    /// Strategy settings.
    #[must_use]
    pub const fn settings(&self) -> &CreationSettings {
        &self.settings
    }

    /// Launches `count` nodes of `group` and schedules their provisioning.
    ///
    /// Shared resources are prepared and the launch call is issued before
    /// this returns; per-node work runs on `pool`. Failures that prevent
    /// scheduling are reported through [`Dispatch::exceptions`] rather than
    /// as an `Err`, so the caller always receives a batch to await.
    pub async fn create(
        &self,
        pool: &TaskPool,
        group: &str,
        count: u32,
        template: &Template,
    ) -> Dispatch {
        let mut dispatch = Dispatch::default();
        let Some(region) = template.location.region_id().map(str::to_owned) else {
            dispatch.exceptions.insert(
                launch_key(group),
                ComputeError::InvalidArgument {
                    message: format!("location {} is not within a region", template.location),
                },
            );
            return dispatch;
        };

        let spec = match self.launch_spec(&region, group, count, template).await {
            Ok(spec) => spec,
            Err(err) => {
                warn!(group, region = %region, error = %err, "shared resource setup failed");
                dispatch.exceptions.insert(launch_key(group), err);
                return dispatch;
            }
        };

        let reservation = match self.provider.launcher.launch(&spec).await {
            Ok(reservation) => reservation,
            Err(err) => {
                warn!(group, region = %region, error = %err, "launch failed");
                dispatch.exceptions.insert(launch_key(group), err.into());
                return dispatch;
            }
        };
        let launched = u32::try_from(reservation.instances.len()).unwrap_or(u32::MAX);
        info!(
            group,
            region = %region,
            requested = count,
            launched,
            reservation = %reservation.reservation_id,
            "launched reservation"
        );

        for index in launched..count {
            dispatch.exceptions.insert(
                shortfall_key(group, index),
                ComputeError::Provider(ProviderError::Remote {
                    operation: String::from("launch"),
                    message: format!(
                        "reservation {} started {launched} of {count} requested instances",
                        reservation.reservation_id
                    ),
                }),
            );
        }

        let provisioner = Arc::new(Provisioner {
            provider: self.provider.clone(),
            key_pairs: self.key_pairs.clone(),
            addresses: Arc::clone(&self.addresses),
            credentials: Arc::clone(&self.credentials),
            settings: self.settings.clone(),
            template: template.clone(),
            group: group.to_owned(),
            region: region.clone(),
            key_name: spec.key_name.clone(),
        });
        for instance in reservation.instances {
            let key = qualified_node_id(&region, &instance.provider_id);
            let provisioner = Arc::clone(&provisioner);
            dispatch
                .batch
                .submit(pool, key, async move { provisioner.provision(instance).await })
                .await;
        }
        dispatch
    }

    async fn launch_spec(
        &self,
        region: &str,
        group: &str,
        count: u32,
        template: &Template,
    ) -> Result<LaunchSpec, ComputeError> {
        let key_name = self
            .key_pairs
            .resolve(region, group, &template.options)
            .await?;
        let security_group_ids = self
            .security_groups
            .resolve(region, group, &template.options)
            .await?;
        Ok(LaunchSpec {
            region: region.to_owned(),
            zone: template.location.zone_id().map(str::to_owned),
            image_id: template.image.provider_id.clone(),
            hardware_id: template.hardware.provider_id.clone(),
            min_count: count,
            max_count: count,
            group: group.to_owned(),
            key_name,
            security_group_ids,
            user_data: template.options.user_data.clone(),
        })
    }
}
