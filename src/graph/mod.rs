//! Dependency Graph Module
//!
//! Turns requested target paths into a graph of concrete jobs.
//!
//! # Structure
//!
//! - [`job`]: Job identity, rendered work units and failure kinds
//! - [`resolver`]: Mapping a path to the rule that produces it
//! - [`builder`]: Backward expansion from targets to a full graph

pub mod builder;
pub mod job;
pub mod resolver;

pub use builder::{build_graph, DependencyGraph, RequestedTarget};
pub use job::{Job, JobFailure, JobId, JobInput, JobOutput, JobStatus};
pub use resolver::{resolve_path, Resolution};
