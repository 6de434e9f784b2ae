//! Provider locations and their region/zone hierarchy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Granularity of a [`Location`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationScope {
    /// The provider as a whole.
    Provider,
    /// A geographic region (for example `us-east-1`).
    Region,
    /// An availability zone nested inside a region.
    Zone,
}

/// A place where images, hardware and nodes may live.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Location {
    /// Provider identifier (for example `us-east-1a`).
    pub id: String,
    /// Granularity of this location.
    pub scope: LocationScope,
    /// Human readable description.
    pub description: String,
    /// Enclosing location, if any.
    pub parent: Option<Box<Location>>,
}

impl Location {
    /// Creates a region-scoped location with no parent.
    #[must_use]
    pub fn region(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            description: id.clone(),
            id,
            scope: LocationScope::Region,
            parent: None,
        }
    }

    /// Creates a zone nested inside `region`.
    #[must_use]
    pub fn zone(id: impl Into<String>, region: Self) -> Self {
        let id = id.into();
        Self {
            description: id.clone(),
            id,
            scope: LocationScope::Zone,
            parent: Some(Box::new(region)),
        }
    }

    /// Replaces the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Returns the region this location belongs to, if it has one.
    ///
    /// A zone yields its region parent and a region yields itself.
    #[must_use]
    pub fn region_id(&self) -> Option<&str> {
        match self.scope {
            LocationScope::Region => Some(self.id.as_str()),
            LocationScope::Zone => self
                .ancestors()
                .find(|ancestor| ancestor.scope == LocationScope::Region)
                .map(|region| region.id.as_str()),
            LocationScope::Provider => None,
        }
    }

    /// Returns the zone identifier when this location is a zone.
    #[must_use]
    pub fn zone_id(&self) -> Option<&str> {
        (self.scope == LocationScope::Zone).then_some(self.id.as_str())
    }

    /// Iterates over enclosing locations, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(self.parent.as_deref(), |location| {
            location.parent.as_deref()
        })
    }

    /// Returns `true` when `self` is `other` or is nested anywhere inside it.
    #[must_use]
    pub fn is_within(&self, other: &Self) -> bool {
        self.id == other.id || self.ancestors().any(|ancestor| ancestor.id == other.id)
    }

    /// Returns `true` when a resource placed at `candidate` can be used at
    /// `target`.
    ///
    /// Resources without a location are available everywhere; a resource
    /// bound to a region is usable in every zone of that region.
    #[must_use]
    pub fn accepts(candidate: Option<&Self>, target: &Self) -> bool {
        candidate.is_none_or(|location| target.is_within(location))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
