//! Node snapshots, credentials and cache keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Location;

/// Separator between the region and provider id of a qualified node id.
pub const NODE_ID_SEPARATOR: char = '/';

/// Lifecycle state of a node.
///
/// `Pending -> Running -> {Suspended <-> Running} -> Terminated`; `Error` may
/// be entered from any non-terminal state and is never left automatically.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    /// Launched but not yet running.
    Pending,
    /// Running and reachable.
    Running,
    /// Stopped but resumable.
    Suspended,
    /// Destroyed.
    Terminated,
    /// Failed in a provider-specific way.
    Error,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Suspended => "SUSPENDED",
            Self::Terminated => "TERMINATED",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Login details for a node.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct LoginCredentials {
    /// Login user.
    pub user: String,
    /// Password, when password login is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// PEM encoded private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// Whether `sudo` prompts for the password.
    #[serde(default)]
    pub authenticate_sudo: bool,
}

impl LoginCredentials {
    /// Creates credentials for `user` with no secrets attached.
    #[must_use]
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::default()
        }
    }

    /// Attaches a private key.
    #[must_use]
    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    /// Attaches a password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// One provisioned unit as last observed.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeMetadata {
    /// Qualified identifier, `{region}/{provider_id}`.
    pub id: String,
    /// Identifier assigned by the provider.
    pub provider_id: String,
    /// Display name.
    pub name: Option<String>,
    /// Group the node belongs to.
    pub group: Option<String>,
    /// Last confirmed state.
    pub status: NodeStatus,
    /// Where the node runs.
    pub location: Location,
    /// Hardware profile id.
    pub hardware_id: Option<String>,
    /// Image id.
    pub image_id: Option<String>,
    /// Key pair the node was launched with.
    pub key_name: Option<String>,
    /// Public addresses.
    #[serde(default)]
    pub public_addresses: Vec<String>,
    /// Private addresses.
    #[serde(default)]
    pub private_addresses: Vec<String>,
    /// Login credentials, filled in lazily.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<LoginCredentials>,
}

impl NodeMetadata {
    /// Creates a pending node at `location` with a qualified id derived from
    /// `region` and `provider_id`.
    #[must_use]
    pub fn new(region: &str, provider_id: impl Into<String>, location: Location) -> Self {
        let provider_id = provider_id.into();
        Self {
            id: qualified_node_id(region, &provider_id),
            provider_id,
            name: None,
            group: None,
            status: NodeStatus::Pending,
            location,
            hardware_id: None,
            image_id: None,
            key_name: None,
            public_addresses: Vec::new(),
            private_addresses: Vec::new(),
            credentials: None,
        }
    }

    /// Sets the group.
    #[must_use]
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Sets the status.
    #[must_use]
    pub const fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns the region encoded in the node id.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        split_node_id(&self.id).map(|(region, _)| region)
    }

    /// Returns `true` unless the node has been terminated.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status != NodeStatus::Terminated
    }
}

/// Builds the qualified id of a node.
#[must_use]
pub fn qualified_node_id(region: &str, provider_id: &str) -> String {
    format!("{region}{NODE_ID_SEPARATOR}{provider_id}")
}

/// Splits a qualified node id into `(region, provider_id)`.
///
/// Returns `None` when either half is empty or the separator is missing.
#[must_use]
pub fn split_node_id(id: &str) -> Option<(&str, &str)> {
    id.split_once(NODE_ID_SEPARATOR)
        .filter(|(region, provider_id)| !region.is_empty() && !provider_id.is_empty())
}

/// Cache key scoping a shared resource name to a region.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct RegionAndName {
    /// Region scope.
    pub region: String,
    /// Logical name within the region.
    pub name: String,
}

impl RegionAndName {
    /// Creates a key.
    #[must_use]
    pub fn new(region: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RegionAndName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.name)
    }
}
