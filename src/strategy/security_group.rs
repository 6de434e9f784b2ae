//! Marker security group setup for a creation batch.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::dedup::SharedResourceCache;
use crate::domain::RegionAndName;
use crate::provider::{IngressRule, IpProtocol, SecurityGroup, SecurityGroupManager};
use crate::template::TemplateOptions;

use super::SharedResourceError;

/// Cache of marker groups keyed by `(region, marker name)`.
pub type SecurityGroupCache = SharedResourceCache<RegionAndName, SecurityGroup, SharedResourceError>;

/// Name of the security group identifying members of `group` in `region`.
#[must_use]
pub fn marker_group_name(prefix: &str, group: &str, region: &str) -> String {
    format!("{prefix}#{group}#{region}")
}

/// Ensures every node of a group shares a marker security group.
///
/// The marker group opens the template's inbound ports to everyone and all
/// traffic between its own members.
#[derive(Clone)]
pub struct SecurityGroupPolicy {
    manager: Arc<dyn SecurityGroupManager>,
    cache: Arc<SecurityGroupCache>,
    prefix: String,
}

impl SecurityGroupPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(
        manager: Arc<dyn SecurityGroupManager>,
        cache: Arc<SecurityGroupCache>,
        prefix: String,
    ) -> Self {
        Self {
            manager,
            cache,
            prefix,
        }
    }

    /// Marker group name for `group` in `region`.
    #[must_use]
    pub fn marker_name(&self, group: &str, region: &str) -> String {
        marker_group_name(&self.prefix, group, region)
    }

    /// Returns the user supplied group ids plus the marker group id.
    ///
    /// # Errors
    ///
    /// Returns [`SharedResourceError::Provider`] when the marker group cannot
    /// be found, created or authorized.
    pub async fn resolve(
        &self,
        region: &str,
        group: &str,
        options: &TemplateOptions,
    ) -> Result<BTreeSet<String>, SharedResourceError> {
        let name = self.marker_name(group, region);
        let marker = self
            .cache
            .get_or_create(&RegionAndName::new(region, &name), || {
                self.ensure_marker(region, &name, &options.inbound_ports)
            })
            .await?;
        let mut ids = options.security_groups.clone();
        ids.insert(marker.id);
        Ok(ids)
    }

    /// Forgets the cached marker group of `group` in `region`.
    pub fn forget(&self, region: &str, group: &str) -> bool {
        self.cache
            .invalidate(&RegionAndName::new(region, self.marker_name(group, region)))
    }

    async fn ensure_marker(
        &self,
        region: &str,
        name: &str,
        ports: &[u16],
    ) -> Result<SecurityGroup, SharedResourceError> {
        if let Some(existing) = self.manager.describe(region, name).await? {
            debug!(region, security_group = name, "reusing marker security group");
            return Ok(existing);
        }

        let created = self
            .manager
            .create(region, name, "marker group for nodes created by flotilla")
            .await?;
        let mut rules: Vec<IngressRule> = ports
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(IngressRule::tcp_from_anywhere)
            .collect();
        rules.push(IngressRule::from_group(IpProtocol::Tcp, &created.id));
        rules.push(IngressRule::from_group(IpProtocol::Udp, &created.id));
        for rule in &rules {
            self.manager.authorize(region, &created.id, rule).await?;
        }
        info!(
            region,
            security_group = name,
            id = %created.id,
            rules = rules.len(),
            "created marker security group"
        );
        Ok(created)
    }
}
