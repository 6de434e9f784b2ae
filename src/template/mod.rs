//! Concrete provisioning templates and the resolver that produces them.

mod builder;
mod error;
mod ordering;

use std::collections::BTreeSet;

use crate::domain::{Hardware, Image, Location, LoginCredentials};
use crate::script::Script;

pub use builder::TemplateBuilder;
pub use error::ResolveError;

/// Port opened on auto-created security groups unless overridden.
pub const DEFAULT_INBOUND_PORT: u16 = 22;

/// An image, hardware profile and location that can be provisioned together.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Template {
    /// Boot image.
    pub image: Image,
    /// Hardware profile.
    pub hardware: Hardware,
    /// Target location.
    pub location: Location,
    /// Creation options.
    pub options: TemplateOptions,
}

/// Options consumed by the node creation strategy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TemplateOptions {
    /// Script to run once a node is running.
    pub run_script: Option<Script>,
    /// Ports opened on the group's marker security group.
    pub inbound_ports: Vec<u16>,
    /// Existing key pair to install.
    pub key_pair_name: Option<String>,
    /// Create a key pair for the group when none is named.
    pub auto_create_key_pair: bool,
    /// Pre-existing security group ids attached alongside the marker group.
    pub security_groups: BTreeSet<String>,
    /// Opaque user data passed to the instance.
    pub user_data: Option<Vec<u8>>,
    /// Credentials that replace whatever the provider or key pair supplies.
    pub login_overrides: Option<LoginCredentials>,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            run_script: None,
            inbound_ports: vec![DEFAULT_INBOUND_PORT],
            key_pair_name: None,
            auto_create_key_pair: true,
            security_groups: BTreeSet::new(),
            user_data: None,
            login_overrides: None,
        }
    }
}

impl TemplateOptions {
    /// Sets the post-boot script.
    #[must_use]
    pub fn run_script(mut self, script: Script) -> Self {
        self.run_script = Some(script);
        self
    }

    /// Replaces the inbound ports.
    #[must_use]
    pub fn inbound_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.inbound_ports = ports.into_iter().collect();
        self
    }

    /// Names an existing key pair.
    #[must_use]
    pub fn key_pair(mut self, name: impl Into<String>) -> Self {
        self.key_pair_name = Some(name.into());
        self
    }

    /// Disables or enables key pair creation.
    #[must_use]
    pub const fn auto_create_key_pair(mut self, value: bool) -> Self {
        self.auto_create_key_pair = value;
        self
    }

    /// Adds pre-existing security group ids.
    #[must_use]
    pub fn security_groups(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.security_groups.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Sets user data.
    #[must_use]
    pub fn user_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.user_data = Some(data.into());
        self
    }

    /// Overrides login credentials.
    #[must_use]
    pub fn override_login_credentials(mut self, credentials: LoginCredentials) -> Self {
        self.login_overrides = Some(credentials);
        self
    }

    /// Returns the overriding private key, if any.
    #[must_use]
    pub fn override_private_key(&self) -> Option<&str> {
        self.login_overrides
            .as_ref()
            .and_then(|credentials| credentials.private_key.as_deref())
    }
}
