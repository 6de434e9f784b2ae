//! Public addresses associated during creation.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::domain::RegionAndName;

/// Addresses this process associated, keyed by `(region, provider id)`.
///
/// Destroying a node releases its address only when an entry exists here.
#[derive(Debug, Default)]
pub struct AddressCache {
    entries: Mutex<HashMap<RegionAndName, String>>,
}

impl AddressCache {
    /// Records that `address` was associated with the instance.
    pub fn insert(&self, region: &str, provider_id: &str, address: impl Into<String>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(RegionAndName::new(region, provider_id), address.into());
    }

    /// Returns the address associated with the instance.
    #[must_use]
    pub fn get(&self, region: &str, provider_id: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&RegionAndName::new(region, provider_id))
            .cloned()
    }

    /// Forgets the instance's address.
    pub fn remove(&self, region: &str, provider_id: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&RegionAndName::new(region, provider_id))
    }

    /// Number of tracked addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when no address is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
