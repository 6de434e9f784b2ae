//! Per-instance provisioning run on the task pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::credential_store::{CredentialStore, credential_key, save};
use crate::domain::{Location, LoginCredentials, NodeMetadata, NodeStatus, qualified_node_id};
use crate::error::{ComputeError, LastStatus};
use crate::provider::{LaunchedInstance, Provider, ProviderError};
use crate::retry::{Attempt, poll_until};
use crate::script::{ExecResponse, RunScriptOptions};
use crate::template::Template;

use super::{AddressCache, CreationSettings, KeyPairPolicy, NodeOutcome};

/// Tag carrying the node's display name.
pub(super) const NAME_TAG: &str = "Name";
/// Tag carrying the node's group.
pub(super) const GROUP_TAG: &str = "group";

/// State shared by every task of one batch.
pub(super) struct Provisioner {
    pub(super) provider: Provider,
    pub(super) key_pairs: KeyPairPolicy,
    pub(super) addresses: Arc<AddressCache>,
    pub(super) credentials: Arc<dyn CredentialStore>,
    pub(super) settings: CreationSettings,
    pub(super) template: Template,
    pub(super) group: String,
    pub(super) region: String,
    pub(super) key_name: Option<String>,
}

impl Provisioner {
    pub(super) async fn provision(&self, instance: LaunchedInstance) -> NodeOutcome {
        let mut node = self.node_from(&instance);
        match self.bring_up(&mut node, instance.credentials).await {
            Ok(customization) => {
                info!(node_id = %node.id, group = %self.group, "node provisioned");
                NodeOutcome::Ok {
                    node,
                    customization,
                }
            }
            Err(error) => {
                warn!(node_id = %node.id, group = %self.group, error = %error, "node provisioning failed");
                NodeOutcome::Failed { node, error }
            }
        }
    }

    fn node_from(&self, instance: &LaunchedInstance) -> NodeMetadata {
        let location = instance.zone.as_ref().map_or_else(
            || self.template.location.clone(),
            |zone| Location::zone(zone, Location::region(&self.region)),
        );
        NodeMetadata {
            id: qualified_node_id(&self.region, &instance.provider_id),
            provider_id: instance.provider_id.clone(),
            name: Some(format!("{}-{}", self.group, instance.provider_id)),
            group: Some(self.group.clone()),
            status: instance.status,
            location,
            hardware_id: Some(self.template.hardware.id.clone()),
            image_id: Some(self.template.image.id.clone()),
            key_name: self.key_name.clone(),
            public_addresses: instance.public_addresses.clone(),
            private_addresses: instance.private_addresses.clone(),
            credentials: None,
        }
    }

    async fn bring_up(
        &self,
        node: &mut NodeMetadata,
        launched_credentials: Option<LoginCredentials>,
    ) -> Result<Option<ExecResponse>, ComputeError> {
        self.tag(node).await?;
        if self.settings.auto_allocate_addresses {
            self.assign_address(node).await?;
        }
        if let Some(credentials) = self.login_credentials(launched_credentials) {
            save(&self.credentials, credential_key(&node.id), credentials.clone()).await?;
            node.credentials = Some(credentials);
        }
        self.await_running(node).await?;
        self.customize(node).await
    }

    async fn tag(&self, node: &NodeMetadata) -> Result<(), ComputeError> {
        let mut tags = BTreeMap::new();
        if let Some(name) = &node.name {
            tags.insert(String::from(NAME_TAG), name.clone());
        }
        tags.insert(String::from(GROUP_TAG), self.group.clone());
        self.provider
            .controller
            .tag(&self.region, &node.provider_id, &tags)
            .await?;
        Ok(())
    }

    async fn assign_address(&self, node: &mut NodeMetadata) -> Result<(), ComputeError> {
        let addresses = &self.provider.addresses;
        let address = addresses.allocate(&self.region).await?;
        if let Err(err) = addresses
            .associate(&self.region, &address, &node.provider_id)
            .await
        {
            if let Err(release_err) = addresses.release(&self.region, &address).await {
                warn!(address = %address, error = %release_err, "failed to release unassociated address");
            }
            return Err(err.into());
        }
        self.addresses
            .insert(&self.region, &node.provider_id, address.clone());
        info!(node_id = %node.id, address = %address, "associated public address");
        node.public_addresses.insert(0, address);
        Ok(())
    }

    /// Credentials from the launch response, or built from the cached key
    /// pair, with the template's overrides applied on top.
    fn login_credentials(&self, launched: Option<LoginCredentials>) -> Option<LoginCredentials> {
        let base = launched.or_else(|| {
            self.key_name.as_deref().and_then(|name| {
                self.key_pairs.credentials_for(
                    &self.region,
                    name,
                    &self.template.image.default_login_user,
                )
            })
        });
        match &self.template.options.login_overrides {
            Some(overrides) => Some(overlay(base, overrides)),
            None => base,
        }
    }

    async fn await_running(&self, node: &mut NodeMetadata) -> Result<(), ComputeError> {
        let policy = self.settings.running;
        let outcome = poll_until(policy, || {
            let controller = Arc::clone(&self.provider.controller);
            let id = node.id.clone();
            async move {
                match controller.describe(&id).await {
                    Ok(Some(observed)) if observed.status == NodeStatus::Running => {
                        Ok(Attempt::Ready(observed))
                    }
                    Ok(Some(observed)) if observed.status == NodeStatus::Error => {
                        Err(ComputeError::IllegalState {
                            message: format!("node {id} entered {} while starting", observed.status),
                        })
                    }
                    Ok(observed) => Ok(Attempt::Pending(observed)),
                    Err(ProviderError::IllegalState(reason)) => {
                        debug!(node_id = %id, reason = %reason, "node not yet visible");
                        Ok(Attempt::Pending(None))
                    }
                    Err(err) => Err(err.into()),
                }
            }
        })
        .await?;

        if !outcome.satisfied {
            return Err(ComputeError::Timeout {
                node_id: node.id.clone(),
                expected: NodeStatus::Running,
                timeout: policy.timeout,
                last_status: LastStatus(outcome.last.map(|observed| observed.status)),
            });
        }
        node.status = NodeStatus::Running;
        if let Some(observed) = outcome.last {
            if node.public_addresses.is_empty() {
                node.public_addresses = observed.public_addresses;
            }
            if node.private_addresses.is_empty() {
                node.private_addresses = observed.private_addresses;
            }
        }
        Ok(())
    }

    async fn customize(&self, node: &mut NodeMetadata) -> Result<Option<ExecResponse>, ComputeError> {
        let Some(script) = &self.template.options.run_script else {
            return Ok(None);
        };
        let options = RunScriptOptions::new().name_task(format!("customize-{}", node.id));
        let runner = self.provider.scripts.init(node, script, &options).await?;
        let response = runner.call().await?;
        let admin_login = runner
            .negotiated_credentials()
            .filter(|_| script.grants_admin_access);
        if let Some(negotiated) = admin_login {
            save(&self.credentials, credential_key(&node.id), negotiated.clone()).await?;
            node.credentials = Some(negotiated);
        }
        if !response.is_success() {
            return Err(ComputeError::ScriptFailed {
                node_id: node.id.clone(),
                exit_status: response.exit_status,
            });
        }
        debug!(node_id = %node.id, "customization script succeeded");
        Ok(Some(response))
    }
}

/// Replaces the user and any secret present in `overrides`.
fn overlay(base: Option<LoginCredentials>, overrides: &LoginCredentials) -> LoginCredentials {
    let Some(mut credentials) = base else {
        return overrides.clone();
    };
    credentials.user.clone_from(&overrides.user);
    if overrides.password.is_some() {
        credentials.password.clone_from(&overrides.password);
    }
    if overrides.private_key.is_some() {
        credentials.private_key.clone_from(&overrides.private_key);
    }
    credentials.authenticate_sudo = overrides.authenticate_sudo;
    credentials
}
