//! Provisioning and lifecycle orchestration for groups of compute nodes.
//!
//! The crate resolves node templates against a provider catalog, creates
//! nodes in parallel while sharing per-group key pairs and security groups,
//! and drives existing nodes through destroy, reboot, resume, suspend and
//! script execution. Every fan-out runs on one bounded task pool and reports
//! partial failures through aggregate errors instead of aborting the batch.
//!
//! Cloud APIs are reached through the collaborator traits in [`provider`];
//! [`test_support::FakeCloud`] implements all of them in memory.

pub mod config;
pub mod credential_store;
pub mod dedup;
pub mod domain;
pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod provider;
pub mod retry;
pub mod script;
pub mod strategy;
pub mod template;
pub mod test_support;

pub use config::{ComputeConfig, ConfigError};
pub use credential_store::{
    CredentialStore, CredentialStoreError, FileCredentialStore, InMemoryCredentialStore,
    credential_key,
};
pub use dedup::SharedResourceCache;
pub use domain::{
    Catalog, Hardware, Image, Location, LoginCredentials, NodeMetadata, NodeStatus, RegionAndName,
};
pub use error::{
    ComputeError, FailedNode, NodeAction, NodeExecution, NodeOperationError, RunNodesError,
    RunScriptOnNodesError,
};
pub use orchestrator::{ComputeService, CreatedNodes, NodeFilter, Timeouts};
pub use pool::{Completion, PoolConfig, PoolError, TaskError, TaskPool};
pub use provider::{Provider, ProviderError};
pub use retry::{Attempt, PollOutcome, RetryPolicy, poll_until};
pub use script::{ExecResponse, RunScriptOptions, Script};
pub use strategy::{CreationSettings, NodeCreationStrategy, SharedResourceError};
pub use template::{ResolveError, Template, TemplateBuilder, TemplateOptions};
