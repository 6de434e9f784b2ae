//! Errors raised while resolving templates.

use thiserror::Error;

/// Errors raised by [`super::TemplateBuilder::resolve`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ResolveError {
    /// No image satisfies the constraints.
    #[error("no image matched {constraints} among {catalog_size} images")]
    NoImageMatch {
        /// Rendered constraint set.
        constraints: String,
        /// Number of images considered.
        catalog_size: usize,
    },
    /// No hardware profile satisfies the constraints.
    #[error("no hardware matched {constraints} among {catalog_size} profiles")]
    NoHardwareMatch {
        /// Rendered constraint set.
        constraints: String,
        /// Number of profiles considered.
        catalog_size: usize,
    },
    /// An explicitly requested image id is absent from the catalog.
    #[error("image {id} not found among {catalog_size} images")]
    ImageNotFound {
        /// Requested id.
        id: String,
        /// Number of images considered.
        catalog_size: usize,
    },
    /// An explicitly requested hardware id is absent from the catalog.
    #[error("hardware {id} not found among {catalog_size} profiles")]
    HardwareNotFound {
        /// Requested id.
        id: String,
        /// Number of profiles considered.
        catalog_size: usize,
    },
    /// An explicitly requested location id is absent from the catalog.
    #[error("location {id} not found among {catalog_size} locations")]
    LocationNotFound {
        /// Requested id.
        id: String,
        /// Number of locations considered.
        catalog_size: usize,
    },
    /// Neither the constraints nor the chosen candidates pin a location and
    /// the catalog lists none.
    #[error("no location could be determined for {constraints}")]
    NoLocation {
        /// Rendered constraint set.
        constraints: String,
    },
    /// A pattern constraint is not a valid regular expression.
    #[error("invalid {field} pattern {pattern:?}: {message}")]
    InvalidPattern {
        /// Constraint field.
        field: &'static str,
        /// Offending pattern.
        pattern: String,
        /// Compiler message.
        message: String,
    },
}
