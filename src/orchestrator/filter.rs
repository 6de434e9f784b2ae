//! Predicates selecting the nodes a batch operation applies to.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::domain::{NodeMetadata, NodeStatus};

type Predicate = Arc<dyn Fn(&NodeMetadata) -> bool + Send + Sync>;

/// A described node predicate.
///
/// The description is what error messages and logs show, so custom filters
/// should say what they select.
#[derive(Clone)]
pub struct NodeFilter {
    description: String,
    predicate: Predicate,
}

impl NodeFilter {
    /// Selects every node.
    #[must_use]
    pub fn all() -> Self {
        Self::custom("all nodes", |_| true)
    }

    /// Selects nodes of `group`.
    #[must_use]
    pub fn in_group(group: impl Into<String>) -> Self {
        let group = group.into();
        Self {
            description: format!("group {group}"),
            predicate: Arc::new(move |node| node.group.as_deref() == Some(group.as_str())),
        }
    }

    /// Selects nodes by qualified id.
    #[must_use]
    pub fn with_ids(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let ids: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
        let listed = ids.iter().map(String::as_str).collect::<Vec<_>>().join(", ");
        Self {
            description: format!("ids [{listed}]"),
            predicate: Arc::new(move |node| ids.contains(&node.id)),
        }
    }

    /// Selects nodes in `status`.
    #[must_use]
    pub fn with_status(status: NodeStatus) -> Self {
        Self {
            description: format!("status {status}"),
            predicate: Arc::new(move |node| node.status == status),
        }
    }

    /// Wraps an arbitrary predicate.
    #[must_use]
    pub fn custom(
        description: impl Into<String>,
        predicate: impl Fn(&NodeMetadata) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Selects nodes matching both filters.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        let Self {
            description: left_description,
            predicate: left,
        } = self;
        let Self {
            description: right_description,
            predicate: right,
        } = other;
        Self {
            description: format!("{left_description} and {right_description}"),
            predicate: Arc::new(move |node| left(node) && right(node)),
        }
    }

    /// Returns `true` when `node` is selected.
    #[must_use]
    pub fn matches(&self, node: &NodeMetadata) -> bool {
        (self.predicate)(node)
    }
}

impl fmt::Display for NodeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

impl fmt::Debug for NodeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeFilter")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
