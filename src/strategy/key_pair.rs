//! Key pair selection for a creation batch.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::dedup::SharedResourceCache;
use crate::domain::{LoginCredentials, RegionAndName};
use crate::provider::{KeyPair, KeyPairManager};
use crate::template::TemplateOptions;

use super::SharedResourceError;

/// Cache of key pairs keyed by `(region, group)` for auto-created keys and by
/// `(region, key name)` for keys whose private material is known.
pub type KeyPairCache = SharedResourceCache<RegionAndName, KeyPair, SharedResourceError>;

/// Decides which key pair a batch launches with, creating one per group when
/// asked to.
#[derive(Clone)]
pub struct KeyPairPolicy {
    manager: Arc<dyn KeyPairManager>,
    cache: Arc<KeyPairCache>,
    prefix: String,
}

impl KeyPairPolicy {
    /// Creates a policy naming auto-created keys `{prefix}#{group}#...`.
    #[must_use]
    pub fn new(manager: Arc<dyn KeyPairManager>, cache: Arc<KeyPairCache>, prefix: String) -> Self {
        Self {
            manager,
            cache,
            prefix,
        }
    }

    /// Returns the key pair name to launch with, if any.
    ///
    /// A named key pair is used as is. When the template also carries a
    /// post-boot script, its private key must come from the login overrides
    /// or an earlier registration; otherwise the script could never log in.
    /// Without a name, one key pair per `(region, group)` is created and
    /// shared by every batch of that group.
    ///
    /// # Errors
    ///
    /// Returns [`SharedResourceError::MissingPrivateKey`] when a script needs
    /// a named key whose private material is unknown, and
    /// [`SharedResourceError::Provider`] when creation fails.
    pub async fn resolve(
        &self,
        region: &str,
        group: &str,
        options: &TemplateOptions,
    ) -> Result<Option<String>, SharedResourceError> {
        if let Some(name) = &options.key_pair_name {
            self.resolve_named(region, name, options).await?;
            return Ok(Some(name.clone()));
        }
        if !options.auto_create_key_pair {
            return Ok(None);
        }

        let group_key = RegionAndName::new(region, group);
        let key_pair = self
            .cache
            .get_or_create(&group_key, || self.create_for_group(region, group))
            .await?;
        self.cache
            .put(RegionAndName::new(region, &key_pair.name), key_pair.clone());
        Ok(Some(key_pair.name))
    }

    /// Returns the key pair registered under `(region, name)`, if its
    /// material is known.
    #[must_use]
    pub fn cached(&self, region: &str, name: &str) -> Option<KeyPair> {
        self.cache.get_if_present(&RegionAndName::new(region, name))
    }

    /// Builds login credentials from a cached private key.
    #[must_use]
    pub fn credentials_for(&self, region: &str, name: &str, user: &str) -> Option<LoginCredentials> {
        self.cached(region, name)
            .and_then(|key_pair| key_pair.private_key)
            .map(|key| LoginCredentials::for_user(user).with_private_key(key))
    }

    /// Prefix shared by the names of every key pair created for `group`.
    #[must_use]
    pub fn group_prefix(&self, group: &str) -> String {
        format!("{}#{group}#", self.prefix)
    }

    /// Forgets every cache entry pointing at the key pair `name`.
    pub fn forget(&self, region: &str, group: &str, name: &str) {
        self.cache.invalidate(&RegionAndName::new(region, name));
        let group_key = RegionAndName::new(region, group);
        if self
            .cache
            .get_if_present(&group_key)
            .is_some_and(|key_pair| key_pair.name == name)
        {
            self.cache.invalidate(&group_key);
        }
    }

    async fn resolve_named(
        &self,
        region: &str,
        name: &str,
        options: &TemplateOptions,
    ) -> Result<(), SharedResourceError> {
        let key = RegionAndName::new(region, name);
        if let Some(private_key) = options.override_private_key() {
            self.cache.put(
                key,
                KeyPair {
                    region: region.to_owned(),
                    name: name.to_owned(),
                    fingerprint: None,
                    private_key: Some(private_key.to_owned()),
                },
            );
            return Ok(());
        }
        if options.run_script.is_none() {
            return Ok(());
        }
        self.cache
            .get_or_create(&key, || async {
                Err(SharedResourceError::MissingPrivateKey {
                    region: region.to_owned(),
                    key_name: name.to_owned(),
                })
            })
            .await
            .map(drop)
    }

    async fn create_for_group(&self, region: &str, group: &str) -> Result<KeyPair, SharedResourceError> {
        let name = format!("{}{}", self.group_prefix(group), Uuid::new_v4().simple());
        let key_pair = self.manager.create(region, &name).await?;
        info!(region, group, key_pair = %key_pair.name, "created key pair");
        Ok(key_pair)
    }
}
