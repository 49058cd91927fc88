//! Pipeline Execution Module
//!
//! Provides the execution engine for running planned jobs, including
//! parallel scheduling, failure isolation and lifecycle hooks.
//!
//! # Architecture
//!
//! - [`engine`]: Run orchestration, scheduling and reporting
//! - [`invoke`]: Single job invocation through bash or micromamba
//! - [`hooks`]: Lifecycle hook commands around a run

pub mod engine;
pub mod hooks;
pub mod invoke;

pub use engine::{Engine, RunReport, TargetOutcome};
pub use hooks::HookRunner;
pub use invoke::execute_job;
