//! Value types shared by the resolver, the creation strategy and the
//! orchestrator.

mod catalog;
mod location;
mod node;

pub use catalog::{Architecture, Catalog, Hardware, Image, OsFamily};
pub use location::{Location, LocationScope};
pub use node::{
    LoginCredentials, NODE_ID_SEPARATOR, NodeMetadata, NodeStatus, RegionAndName,
    qualified_node_id, split_node_id,
};

#[cfg(test)]
mod tests;
