//! Running scripts on existing nodes.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::credential_store::{CredentialStore, credential_key, load, save};
use crate::domain::{NodeMetadata, NodeStatus};
use crate::error::{ComputeError, NodeExecution, RunScriptOnNodesError};
use crate::pool::{Batch, PoolTask};
use crate::provider::{ScriptRunner, ScriptRunnerFactory};
use crate::script::{ExecResponse, RunScriptOptions, Script};

use super::{ComputeService, NodeFilter, Partition, parse_node_id};

impl ComputeService {
    /// Runs `script` on one RUNNING node and returns its response.
    ///
    /// A non-zero exit status is reported in the response, not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::NodeNotFound`] when the node is unknown,
    /// [`ComputeError::IllegalState`] when it is not RUNNING and
    /// [`ComputeError::Provider`] when the runner cannot be prepared or run.
    pub async fn run_script_on_node(
        &self,
        id: &str,
        script: &Script,
        options: &RunScriptOptions,
    ) -> Result<ExecResponse, ComputeError> {
        let node = self.runnable_node(id, options).await?;
        let execution = execute(
            self.provider.scripts.as_ref(),
            &self.credentials,
            &node,
            script,
            options,
        )
        .await?;
        Ok(execution.response)
    }

    /// Checks the node synchronously and then runs `script` on the pool.
    ///
    /// # Errors
    ///
    /// Returns the precondition errors of [`Self::run_script_on_node`], and
    /// [`ComputeError::Pool`] when the pool rejects the task.
    pub async fn submit_script_on_node(
        &self,
        id: &str,
        script: &Script,
        options: &RunScriptOptions,
    ) -> Result<PoolTask<Result<ExecResponse, ComputeError>>, ComputeError> {
        let node = self.runnable_node(id, options).await?;
        let factory = Arc::clone(&self.provider.scripts);
        let credentials = Arc::clone(&self.credentials);
        let (body, settings) = (script.clone(), options.clone());
        let task = self
            .pool
            .submit(id, async move {
                execute(factory.as_ref(), &credentials, &node, &body, &settings)
                    .await
                    .map(|execution| execution.response)
            })
            .await?;
        Ok(task)
    }

    /// Runs `script` on every live node selected by `filter`.
    ///
    /// Runners are prepared in one batch and executed in a second; both run
    /// on the shared pool. Credentials negotiated by the script are stored
    /// before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError::NoMatch`] when nothing is selected and
    /// [`ComputeError::IllegalState`] when a selected node is not RUNNING,
    /// both before any work is scheduled. Returns
    /// [`ComputeError::RunScriptOnNodes`] when any node failed.
    pub async fn run_script_on_nodes_matching(
        &self,
        filter: &NodeFilter,
        script: &Script,
        options: &RunScriptOptions,
    ) -> Result<BTreeMap<String, NodeExecution>, ComputeError> {
        let nodes = self.list_nodes_matching(filter).await?;
        if nodes.is_empty() {
            return Err(ComputeError::NoMatch {
                filter: filter.to_string(),
            });
        }
        if let Some(node) = nodes.iter().find(|node| node.status != NodeStatus::Running) {
            return Err(not_running(node));
        }
        let mut targets = BTreeMap::new();
        for mut node in nodes {
            self.attach_login(&mut node, options).await?;
            targets.insert(node.id.clone(), node);
        }
        let script_name = options.name.clone().unwrap_or_else(|| String::from("script"));
        info!(filter = %filter, script = %script_name, nodes = targets.len(), "running script");

        let mut prepare = Batch::new();
        for node in targets.values() {
            let factory = Arc::clone(&self.provider.scripts);
            let (target, body, settings) = (node.clone(), script.clone(), options.clone());
            prepare
                .submit(&self.pool, node.id.clone(), async move {
                    factory
                        .init(&target, &body, &settings)
                        .await
                        .map_err(ComputeError::from)
                })
                .await;
        }
        let prepared = Partition::of(prepare.await_completion().await, &targets);

        let mut run = Batch::new();
        for (id, runner) in prepared.succeeded {
            let credentials = Arc::clone(&self.credentials);
            let admin = script.grants_admin_access;
            run.submit(&self.pool, id, async move {
                call(runner.as_ref(), &credentials, admin).await
            })
            .await;
        }
        let executed = Partition::of(run.await_completion().await, &targets);

        let mut bad_nodes = prepared.bad_nodes;
        bad_nodes.extend(executed.bad_nodes);
        let mut execution_exceptions = prepared.execution_exceptions;
        execution_exceptions.extend(executed.execution_exceptions);
        let good_nodes = executed.succeeded;
        info!(
            filter = %filter,
            script = %script_name,
            good = good_nodes.len(),
            bad = bad_nodes.len(),
            "script run finished"
        );
        if bad_nodes.is_empty() && execution_exceptions.is_empty() {
            return Ok(good_nodes);
        }
        Err(ComputeError::RunScriptOnNodes(Box::new(RunScriptOnNodesError {
            script: script_name,
            filter: filter.to_string(),
            good_nodes,
            bad_nodes,
            execution_exceptions,
        })))
    }

    /// Looks up `id` and checks it can run a script.
    async fn runnable_node(
        &self,
        id: &str,
        options: &RunScriptOptions,
    ) -> Result<NodeMetadata, ComputeError> {
        parse_node_id(id)?;
        let mut node = self
            .provider
            .controller
            .describe(id)
            .await?
            .ok_or_else(|| ComputeError::NodeNotFound { id: id.to_owned() })?;
        if node.status != NodeStatus::Running {
            return Err(not_running(&node));
        }
        self.attach_login(&mut node, options).await?;
        Ok(node)
    }

    /// Fills in the login of `node`: its own credentials, else the stored
    /// ones, with the overrides of `options` on top.
    async fn attach_login(
        &self,
        node: &mut NodeMetadata,
        options: &RunScriptOptions,
    ) -> Result<(), ComputeError> {
        if node.credentials.is_none() {
            node.credentials = load(&self.credentials, credential_key(&node.id)).await?;
        }
        node.credentials = options.apply_to(node.credentials.take());
        Ok(())
    }
}

fn not_running(node: &NodeMetadata) -> ComputeError {
    ComputeError::IllegalState {
        message: format!(
            "node {} needs to be running before executing a script on it. current state: {}",
            node.id, node.status
        ),
    }
}

async fn execute(
    factory: &dyn ScriptRunnerFactory,
    credentials: &Arc<dyn CredentialStore>,
    node: &NodeMetadata,
    script: &Script,
    options: &RunScriptOptions,
) -> Result<NodeExecution, ComputeError> {
    let runner = factory.init(node, script, options).await?;
    call(runner.as_ref(), credentials, script.grants_admin_access).await
}

/// Executes a prepared runner. Credentials it negotiated are stored only for
/// scripts that grant admin access.
async fn call(
    runner: &dyn ScriptRunner,
    credentials: &Arc<dyn CredentialStore>,
    admin: bool,
) -> Result<NodeExecution, ComputeError> {
    let response = runner.call().await?;
    let mut node = runner.node().clone();
    if let Some(negotiated) = runner.negotiated_credentials().filter(|_| admin) {
        save(credentials, credential_key(&node.id), negotiated.clone()).await?;
        debug!(node_id = %node.id, user = %negotiated.user, "stored negotiated credentials");
        node.credentials = Some(negotiated);
    }
    debug!(node_id = %node.id, exit_status = response.exit_status, "script finished");
    Ok(NodeExecution { node, response })
}
