//! Collaborator interfaces implemented by provider bindings.
//!
//! The orchestrator never talks to a cloud API directly. Each concern (launch,
//! control, addresses, key pairs, security groups, script execution, catalog
//! listing) is a small trait returning boxed futures so implementations can be
//! shared behind `Arc<dyn ...>` handles and driven from pooled tasks.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::{Catalog, LoginCredentials, NodeMetadata, NodeStatus};
use crate::script::{ExecResponse, RunScriptOptions, Script};

/// Errors raised by provider collaborators.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// The resource is not yet in a state that permits the call. Callers that
    /// poll treat this as "retry later".
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// The addressed resource does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Resource kind (for example `key pair`).
        kind: String,
        /// Identifier that was looked up.
        id: String,
    },
    /// The provider rejected or failed the call.
    #[error("provider call {operation} failed: {message}")]
    Remote {
        /// Operation that failed.
        operation: String,
        /// Provider supplied message.
        message: String,
    },
    /// The provider does not implement the operation.
    #[error("operation {0} is not supported by this provider")]
    Unsupported(String),
}

impl ProviderError {
    /// Returns `true` for [`ProviderError::IllegalState`].
    #[must_use]
    pub const fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState(_))
    }
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Parameters of a single launch call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchSpec {
    /// Region to launch in.
    pub region: String,
    /// Zone to pin instances to, when the template named one.
    pub zone: Option<String>,
    /// Provider id of the boot image.
    pub image_id: String,
    /// Provider id of the hardware profile.
    pub hardware_id: String,
    /// Minimum number of instances the provider must start.
    pub min_count: u32,
    /// Maximum number of instances the provider may start.
    pub max_count: u32,
    /// Group the instances belong to.
    pub group: String,
    /// Key pair to install, if any.
    pub key_name: Option<String>,
    /// Security groups to attach.
    pub security_group_ids: BTreeSet<String>,
    /// Opaque user data passed to the instance.
    pub user_data: Option<Vec<u8>>,
}

/// One instance returned in a [`Reservation`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchedInstance {
    /// Provider instance id.
    pub provider_id: String,
    /// Zone the instance landed in.
    pub zone: Option<String>,
    /// State at launch.
    pub status: NodeStatus,
    /// Credentials returned by the launch call, if the provider supplies them.
    pub credentials: Option<LoginCredentials>,
    /// Public addresses known at launch.
    pub public_addresses: Vec<String>,
    /// Private addresses known at launch.
    pub private_addresses: Vec<String>,
}

impl LaunchedInstance {
    /// Creates a pending instance with no addresses or credentials.
    #[must_use]
    pub fn pending(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            zone: None,
            status: NodeStatus::Pending,
            credentials: None,
            public_addresses: Vec::new(),
            private_addresses: Vec::new(),
        }
    }
}

/// Instances started by one launch call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reservation {
    /// Region of the reservation.
    pub region: String,
    /// Provider reservation id.
    pub reservation_id: String,
    /// Instances started.
    pub instances: Vec<LaunchedInstance>,
}

/// A provider key pair.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPair {
    /// Region the key is registered in.
    pub region: String,
    /// Key name.
    pub name: String,
    /// Fingerprint reported by the provider.
    pub fingerprint: Option<String>,
    /// Private key material; only known for keys created or supplied locally.
    pub private_key: Option<String>,
}

/// A provider security group.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SecurityGroup {
    /// Region of the group.
    pub region: String,
    /// Provider id.
    pub id: String,
    /// Group name.
    pub name: String,
}

/// IP protocol of an ingress rule.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum IpProtocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

/// Origin of traffic permitted by an ingress rule.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum IngressSource {
    /// An address range in CIDR notation.
    Cidr(String),
    /// Members of a security group.
    Group(String),
}

/// One inbound permission.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct IngressRule {
    /// Protocol.
    pub protocol: IpProtocol,
    /// First port of the range.
    pub from_port: u16,
    /// Last port of the range.
    pub to_port: u16,
    /// Permitted origin.
    pub source: IngressSource,
}

impl IngressRule {
    /// Opens one TCP port to every address.
    #[must_use]
    pub fn tcp_from_anywhere(port: u16) -> Self {
        Self {
            protocol: IpProtocol::Tcp,
            from_port: port,
            to_port: port,
            source: IngressSource::Cidr(String::from("0.0.0.0/0")),
        }
    }

    /// Opens every port of `protocol` to members of `group_id`.
    #[must_use]
    pub fn from_group(protocol: IpProtocol, group_id: impl Into<String>) -> Self {
        Self {
            protocol,
            from_port: 0,
            to_port: u16::MAX,
            source: IngressSource::Group(group_id.into()),
        }
    }
}

/// Launches instances.
pub trait InstanceLauncher: Send + Sync {
    /// Starts between `min_count` and `max_count` instances in one reservation.
    fn launch<'a>(&'a self, spec: &'a LaunchSpec) -> ProviderFuture<'a, Reservation>;
}

/// Observes and drives existing instances.
pub trait InstanceController: Send + Sync {
    /// Lists every node the provider knows about, including terminated ones.
    fn list_nodes(&self) -> ProviderFuture<'_, Vec<NodeMetadata>>;

    /// Describes a node by qualified id; `None` when the provider no longer
    /// reports it.
    fn describe<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, Option<NodeMetadata>>;

    /// Terminates an instance, returning its last snapshot if still reported.
    fn terminate<'a>(
        &'a self,
        region: &'a str,
        provider_id: &'a str,
    ) -> ProviderFuture<'a, Option<NodeMetadata>>;

    /// Reboots an instance.
    fn reboot<'a>(&'a self, region: &'a str, provider_id: &'a str) -> ProviderFuture<'a, ()>;

    /// Starts a suspended instance.
    fn resume<'a>(&'a self, region: &'a str, provider_id: &'a str) -> ProviderFuture<'a, ()>;

    /// Stops a running instance without destroying it.
    fn suspend<'a>(&'a self, region: &'a str, provider_id: &'a str) -> ProviderFuture<'a, ()>;

    /// Applies tags to an instance.
    fn tag<'a>(
        &'a self,
        region: &'a str,
        provider_id: &'a str,
        tags: &'a BTreeMap<String, String>,
    ) -> ProviderFuture<'a, ()>;
}

/// Manages public addresses.
pub trait AddressManager: Send + Sync {
    /// Allocates a new address in `region`.
    fn allocate<'a>(&'a self, region: &'a str) -> ProviderFuture<'a, String>;

    /// Associates `address` with an instance.
    fn associate<'a>(
        &'a self,
        region: &'a str,
        address: &'a str,
        provider_id: &'a str,
    ) -> ProviderFuture<'a, ()>;

    /// Detaches `address` from whatever instance holds it.
    fn disassociate<'a>(&'a self, region: &'a str, address: &'a str) -> ProviderFuture<'a, ()>;

    /// Returns `address` to the provider.
    fn release<'a>(&'a self, region: &'a str, address: &'a str) -> ProviderFuture<'a, ()>;
}

/// Manages key pairs.
pub trait KeyPairManager: Send + Sync {
    /// Creates a key pair, returning its private material.
    fn create<'a>(&'a self, region: &'a str, name: &'a str) -> ProviderFuture<'a, KeyPair>;

    /// Looks up a key pair by name.
    fn describe<'a>(&'a self, region: &'a str, name: &'a str)
    -> ProviderFuture<'a, Option<KeyPair>>;

    /// Lists key pairs in a region.
    fn list<'a>(&'a self, region: &'a str) -> ProviderFuture<'a, Vec<KeyPair>>;

    /// Deletes a key pair.
    fn delete<'a>(&'a self, region: &'a str, name: &'a str) -> ProviderFuture<'a, ()>;
}

/// Manages security groups.
pub trait SecurityGroupManager: Send + Sync {
    /// Looks up a group by name.
    fn describe<'a>(
        &'a self,
        region: &'a str,
        name: &'a str,
    ) -> ProviderFuture<'a, Option<SecurityGroup>>;

    /// Creates an empty group.
    fn create<'a>(
        &'a self,
        region: &'a str,
        name: &'a str,
        description: &'a str,
    ) -> ProviderFuture<'a, SecurityGroup>;

    /// Adds an ingress rule to a group.
    fn authorize<'a>(
        &'a self,
        region: &'a str,
        group_id: &'a str,
        rule: &'a IngressRule,
    ) -> ProviderFuture<'a, ()>;

    /// Deletes a group. Providers report [`ProviderError::IllegalState`]
    /// while instances still reference it.
    fn delete<'a>(&'a self, region: &'a str, group_id: &'a str) -> ProviderFuture<'a, ()>;
}

/// A prepared remote execution for one node.
pub trait ScriptRunner: Send + Sync {
    /// Node the runner targets.
    fn node(&self) -> &NodeMetadata;

    /// Executes the script.
    fn call(&self) -> ProviderFuture<'_, ExecResponse>;

    /// Credentials established by the script, if it provisioned a login.
    fn negotiated_credentials(&self) -> Option<LoginCredentials>;
}

/// Builds [`ScriptRunner`]s.
pub trait ScriptRunnerFactory: Send + Sync {
    /// Prepares a runner for `script` on `node`, establishing whatever remote
    /// channel the provider needs.
    fn init<'a>(
        &'a self,
        node: &'a NodeMetadata,
        script: &'a Script,
        options: &'a RunScriptOptions,
    ) -> ProviderFuture<'a, Box<dyn ScriptRunner>>;
}

/// Lists what can be provisioned.
pub trait CatalogSource: Send + Sync {
    /// Returns the current images, hardware profiles and locations.
    fn catalog(&self) -> ProviderFuture<'_, Catalog>;
}

/// Bundle of collaborator handles used by the strategy and orchestrator.
#[derive(Clone)]
pub struct Provider {
    /// Launch collaborator.
    pub launcher: Arc<dyn InstanceLauncher>,
    /// Control collaborator.
    pub controller: Arc<dyn InstanceController>,
    /// Address collaborator.
    pub addresses: Arc<dyn AddressManager>,
    /// Key pair collaborator.
    pub key_pairs: Arc<dyn KeyPairManager>,
    /// Security group collaborator.
    pub security_groups: Arc<dyn SecurityGroupManager>,
    /// Script execution collaborator.
    pub scripts: Arc<dyn ScriptRunnerFactory>,
    /// Catalog collaborator.
    pub catalog: Arc<dyn CatalogSource>,
}

impl Provider {
    /// Builds a bundle from one value implementing every collaborator.
    #[must_use]
    pub fn from_shared<P>(provider: &Arc<P>) -> Self
    where
        P: InstanceLauncher
            + InstanceController
            + AddressManager
            + KeyPairManager
            + SecurityGroupManager
            + ScriptRunnerFactory
            + CatalogSource
            + 'static,
    {
        Self {
            launcher: Arc::clone(provider) as Arc<dyn InstanceLauncher>,
            controller: Arc::clone(provider) as Arc<dyn InstanceController>,
            addresses: Arc::clone(provider) as Arc<dyn AddressManager>,
            key_pairs: Arc::clone(provider) as Arc<dyn KeyPairManager>,
            security_groups: Arc::clone(provider) as Arc<dyn SecurityGroupManager>,
            scripts: Arc::clone(provider) as Arc<dyn ScriptRunnerFactory>,
            catalog: Arc::clone(provider) as Arc<dyn CatalogSource>,
        }
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider").finish_non_exhaustive()
    }
}
