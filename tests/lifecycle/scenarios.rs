//! BDD scenarios for node group lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Create a group and tear it down completely"
)]
fn scenario_create_and_tear_down(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Report partial creation failures"
)]
fn scenario_partial_creation_failure(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Retry destroy while the provider is busy"
)]
fn scenario_destroy_retries(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Refuse to run a script when nothing matches"
)]
fn scenario_script_without_match(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Suspend and resume a group"
)]
fn scenario_suspend_and_resume(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}
