//! BDD step definitions for node group lifecycle.

use std::future::Future;

use flotilla::test_support::TEST_REGION;
use flotilla::{
    CredentialStore, NodeFilter, NodeMetadata, NodeStatus, RunScriptOptions, Script,
    TemplateBuilder,
};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{LifecycleContext, OperationOutcome};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn block_on<F: Future>(future: F) -> Result<F::Output, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    Ok(runtime.block_on(future))
}

fn create_group(
    mut lifecycle_context: LifecycleContext,
    count: u32,
    group: &str,
) -> Result<LifecycleContext, StepError> {
    let service = lifecycle_context.service.clone();
    let result = block_on(async move {
        service
            .create_nodes_in_group_matching(group, count, TemplateBuilder::new())
            .await
    })?;
    lifecycle_context.outcome = Some(match result {
        Ok(created) => OperationOutcome::from_nodes(&created.nodes),
        Err(err) => OperationOutcome::from_error(&err),
    });
    Ok(lifecycle_context)
}

fn group_nodes(lifecycle_context: &LifecycleContext, group: &str) -> Vec<NodeMetadata> {
    lifecycle_context
        .cloud
        .nodes()
        .into_iter()
        .filter(|node| node.group.as_deref() == Some(group) && node.is_live())
        .collect()
}

fn outcome(lifecycle_context: &LifecycleContext) -> Result<&OperationOutcome, StepError> {
    lifecycle_context
        .outcome
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing outcome")))
}

#[given("a fake cloud")]
fn fake_cloud(lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context
}

#[given("instance \"{provider_id}\" fails to start")]
fn instance_fails(lifecycle_context: LifecycleContext, provider_id: String) -> LifecycleContext {
    lifecycle_context.cloud.break_instance(provider_id.trim());
    lifecycle_context
}

#[given("{count:u32} nodes exist in group \"{group}\"")]
fn nodes_exist(
    lifecycle_context: LifecycleContext,
    count: u32,
    group: String,
) -> Result<LifecycleContext, StepError> {
    let mut context = create_group(lifecycle_context, count, group.trim())?;
    match context.outcome.take() {
        Some(outcome) if outcome.error.is_none() => Ok(context),
        other => Err(StepError::Assertion(format!(
            "setup creation failed: {other:?}"
        ))),
    }
}

#[given("terminate is refused {times:u32} times")]
fn terminate_refused(lifecycle_context: LifecycleContext, times: u32) -> LifecycleContext {
    lifecycle_context.cloud.fail_terminate_with_illegal_state(times);
    lifecycle_context
}

#[when("I create {count:u32} nodes in group \"{group}\"")]
fn create_nodes(
    lifecycle_context: LifecycleContext,
    count: u32,
    group: String,
) -> Result<LifecycleContext, StepError> {
    create_group(lifecycle_context, count, group.trim())
}

#[when("I destroy the nodes in group \"{group}\"")]
fn destroy_nodes(
    mut lifecycle_context: LifecycleContext,
    group: String,
) -> Result<LifecycleContext, StepError> {
    let service = lifecycle_context.service.clone();
    let filter = NodeFilter::in_group(group.trim());
    let result = block_on(async move { service.destroy_nodes_matching(&filter).await })?;
    lifecycle_context.outcome = Some(match result {
        Ok(destroyed) => OperationOutcome::from_nodes(&destroyed),
        Err(err) => OperationOutcome::from_error(&err),
    });
    Ok(lifecycle_context)
}

#[when("I suspend the nodes in group \"{group}\"")]
fn suspend_nodes(
    mut lifecycle_context: LifecycleContext,
    group: String,
) -> Result<LifecycleContext, StepError> {
    let service = lifecycle_context.service.clone();
    let filter = NodeFilter::in_group(group.trim());
    let result = block_on(async move { service.suspend_nodes_matching(&filter).await })?;
    lifecycle_context.outcome = Some(match result {
        Ok(suspended) => OperationOutcome::from_nodes(&suspended),
        Err(err) => OperationOutcome::from_error(&err),
    });
    Ok(lifecycle_context)
}

#[when("I resume the nodes in group \"{group}\"")]
fn resume_nodes(
    mut lifecycle_context: LifecycleContext,
    group: String,
) -> Result<LifecycleContext, StepError> {
    let service = lifecycle_context.service.clone();
    let filter = NodeFilter::in_group(group.trim());
    let result = block_on(async move { service.resume_nodes_matching(&filter).await })?;
    lifecycle_context.outcome = Some(match result {
        Ok(resumed) => OperationOutcome::from_nodes(&resumed),
        Err(err) => OperationOutcome::from_error(&err),
    });
    Ok(lifecycle_context)
}

#[when("I run \"{body}\" on group \"{group}\"")]
fn run_script(
    mut lifecycle_context: LifecycleContext,
    body: String,
    group: String,
) -> Result<LifecycleContext, StepError> {
    let service = lifecycle_context.service.clone();
    let filter = NodeFilter::in_group(group.trim());
    let script = Script::new(body.trim());
    let result = block_on(async move {
        service
            .run_script_on_nodes_matching(&filter, &script, &RunScriptOptions::new())
            .await
    })?;
    lifecycle_context.outcome = Some(match result {
        Ok(executions) => OperationOutcome {
            succeeded: executions.len(),
            ..OperationOutcome::default()
        },
        Err(err) => OperationOutcome::from_error(&err),
    });
    Ok(lifecycle_context)
}

#[then("{count:u32} nodes are running in group \"{group}\"")]
fn nodes_running(
    lifecycle_context: &LifecycleContext,
    count: u32,
    group: String,
) -> Result<(), StepError> {
    nodes_in_status(lifecycle_context, count, group.trim(), NodeStatus::Running)
}

#[then("{count:u32} nodes are suspended in group \"{group}\"")]
fn nodes_suspended(
    lifecycle_context: &LifecycleContext,
    count: u32,
    group: String,
) -> Result<(), StepError> {
    nodes_in_status(lifecycle_context, count, group.trim(), NodeStatus::Suspended)
}

fn nodes_in_status(
    lifecycle_context: &LifecycleContext,
    count: u32,
    group: &str,
    status: NodeStatus,
) -> Result<(), StepError> {
    let nodes = group_nodes(lifecycle_context, group);
    let matching = nodes.iter().filter(|node| node.status == status).count();
    if matching == count as usize && nodes.len() == matching {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} {status} nodes in {group}, got {nodes:?}"
        )))
    }
}

#[then("the group shares {key_pairs:u32} key pair and {groups:u32} security group")]
fn group_shares_resources(
    lifecycle_context: &LifecycleContext,
    key_pairs: u32,
    groups: u32,
) -> Result<(), StepError> {
    let seen_key_pairs = lifecycle_context.cloud.key_pairs(TEST_REGION).len();
    let seen_groups = lifecycle_context.cloud.security_groups().len();
    if seen_key_pairs == key_pairs as usize && seen_groups == groups as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {key_pairs} key pairs and {groups} security groups, got {seen_key_pairs} and {seen_groups}"
        )))
    }
}

#[then("the operation succeeds for {count:u32} nodes")]
fn operation_succeeds(lifecycle_context: &LifecycleContext, count: u32) -> Result<(), StepError> {
    let outcome = outcome(lifecycle_context)?;
    if outcome.error.is_none() && outcome.succeeded == count as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected success for {count} nodes, got {outcome:?}"
        )))
    }
}

#[then("the operation reports {good:u32} good nodes and {bad:u32} bad node")]
fn operation_partially_fails(
    lifecycle_context: &LifecycleContext,
    good: u32,
    bad: u32,
) -> Result<(), StepError> {
    let outcome = outcome(lifecycle_context)?;
    if outcome.error.is_some()
        && outcome.succeeded == good as usize
        && outcome.failed == bad as usize
    {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {good} good and {bad} bad nodes, got {outcome:?}"
        )))
    }
}

#[then("the operation fails with \"{message}\"")]
fn operation_fails_with(
    lifecycle_context: &LifecycleContext,
    message: String,
) -> Result<(), StepError> {
    let outcome = outcome(lifecycle_context)?;
    match &outcome.error {
        Some(error) if error.contains(message.trim()) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected failure mentioning {message:?}, got {other:?}"
        ))),
    }
}

#[then("no key pairs or security groups remain")]
fn nothing_remains(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let key_pairs = lifecycle_context.cloud.key_pairs(TEST_REGION);
    let groups = lifecycle_context.cloud.security_groups();
    if key_pairs.is_empty() && groups.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no group resources, got {key_pairs:?} and {groups:?}"
        )))
    }
}

#[then("the provider saw {calls:u32} terminate calls")]
fn terminate_calls(lifecycle_context: &LifecycleContext, calls: u32) -> Result<(), StepError> {
    let seen = lifecycle_context.cloud.counts().terminates;
    if seen == calls as usize {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {calls} terminate calls, got {seen}"
        )))
    }
}

#[then("no credentials remain stored")]
fn no_credentials(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let keys = lifecycle_context
        .store
        .keys()
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    if keys.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected an empty credential store, got {keys:?}"
        )))
    }
}

#[then("no script runner was prepared")]
fn no_script_runner(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let inits = lifecycle_context.cloud.counts().script_inits;
    if inits == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no script runner, got {inits}"
        )))
    }
}
