//! Ruleflow - File-Oriented Pipeline Execution Engine
//!
//! Runs pipelines declared as rules over wildcard path templates: you
//! ask for output files, the engine works out which jobs produce them,
//! skips whatever is already up to date and runs the rest in parallel.
//!
//! # Architecture
//!
//! The library is organized into six main modules:
//!
//! - [`rules`]: Pipeline documents, rule patterns and wildcard config
//! - [`graph`]: Wildcard resolution and dependency graph construction
//! - [`records`]: Execution records and incremental staleness planning
//! - [`execution`]: Scheduling engine with failure isolation
//! - [`environment`]: Micromamba integration for isolated tool stacks
//! - [`monitoring`]: Resource usage tracking and execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use ruleflow::execution::Engine;
//! use ruleflow::load_pipeline;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a pipeline from YAML
//!     let pipeline = load_pipeline("pipeline.yaml")?;
//!
//!     // Create execution engine
//!     let mut engine = Engine::new(pipeline);
//!     engine.set_pipeline_path("pipeline.yaml");
//!     engine.set_max_parallel(4);
//!
//!     // Execute the pipeline
//!     let report = engine.run()?;
//!     println!("{} jobs executed, {} up to date", report.executed, report.skipped);
//!     Ok(())
//! }
//! ```

pub mod environment;
pub mod error;
pub mod execution;
pub mod graph;
pub mod monitoring;
pub mod records;
pub mod rules;

// Re-export commonly used types
pub use error::EngineError;
pub use execution::{Engine, RunReport, TargetOutcome};
pub use graph::{build_graph, DependencyGraph};
pub use rules::{load_pipeline, Pipeline, Rule, RulePattern, Ruleset};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "ruleflow";
