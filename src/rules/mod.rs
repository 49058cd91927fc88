//! Rule Definition Module
//!
//! Provides data structures and utilities for declaring, parsing, and
//! validating file-producing rules.
//!
//! # Structure
//!
//! - [`pattern`]: Wildcard path templates and matching
//! - [`model`]: Core data structures (Rule, Ruleset)
//! - [`config`]: Global params and wildcard domains
//! - [`parser`]: YAML pipeline loading

pub mod config;
pub mod model;
pub mod parser;
pub mod pattern;

pub use config::PipelineConfig;
pub use model::{EnvDescriptor, Hooks, IoEntry, Rule, RulePattern, Ruleset};
pub use parser::{load_pipeline, parse_pipeline, Pipeline};
pub use pattern::{PathTemplate, WildcardBinding};
