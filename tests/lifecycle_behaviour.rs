//! Behavioural scenarios for node group lifecycle orchestration.

mod lifecycle;
