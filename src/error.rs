//! Error types for pipeline loading, graph construction and execution.
//!
//! Per-job failures (command exit, missing outputs, environment setup)
//! are not represented here; they live in [`crate::graph::job::JobFailure`]
//! and are reported per target, not raised as errors.

use thiserror::Error;

/// Fatal errors. Everything except [`EngineError::Store`] is detected
/// before the first job launches.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A path is claimed by more than one distinct (rule, binding) pair.
    #[error("ambiguous producers for '{path}': {}", candidates.join(", "))]
    AmbiguousRule {
        path: String,
        candidates: Vec<String>,
    },

    /// A path has no producing rule and does not exist on disk.
    #[error("no rule produces '{path}' and the file does not exist{}",
        wanted_by.as_deref().map(|j| format!(" (needed by {j})")).unwrap_or_default())]
    UnresolvablePath {
        path: String,
        wanted_by: Option<String>,
    },

    /// Dependency expansion re-entered a path that is still being expanded.
    #[error("dependency cycle: {}", cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    /// A scheduled job would overwrite an existing protected output.
    #[error("{job} would overwrite protected output '{path}'")]
    ProtectedOutputConflict { job: String, path: String },

    /// Nothing was requested: no targets on the command line and none in
    /// the pipeline document.
    #[error("no targets requested")]
    NoTargets,

    /// The pipeline document or rule registry is invalid.
    #[error(transparent)]
    Ruleset(#[from] RulesetError),

    /// The execution record store could not be read or written.
    #[error("record store '{path}': {source}")]
    Store {
        path: String,
        #[source]
        source: StoreError,
    },
}

/// Violations of the pipeline document schema or of rule registration
/// invariants. All of these are raised while loading, before any graph
/// work happens.
#[derive(Debug, Error)]
pub enum RulesetError {
    #[error("cannot read pipeline file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse pipeline file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("pipeline defines no rules")]
    EmptyRuleset,

    #[error("rule with empty name")]
    EmptyRuleName,

    #[error("duplicate rule name '{0}'")]
    DuplicateRule(String),

    #[error("rule '{0}' has an empty command")]
    EmptyCommand(String),

    #[error("rule '{0}' declares no outputs")]
    NoOutputs(String),

    #[error("rule '{rule}': invalid template '{template}': {source}")]
    Template {
        rule: String,
        template: String,
        #[source]
        source: TemplateError,
    },

    #[error("rule '{rule}': marker '{marker}' is not valid on {entry}")]
    InvalidMarker {
        rule: String,
        entry: String,
        marker: &'static str,
    },

    #[error("rule '{rule}': output '{output}' is both temporary and protected")]
    ConflictingMarkers { rule: String, output: String },

    #[error("rule '{rule}': duplicate {kind} name '{name}'")]
    DuplicateEntryName {
        rule: String,
        kind: &'static str,
        name: String,
    },

    #[error("rule '{rule}': wildcard '{wildcard}' in {location} does not appear in any output")]
    UnboundWildcard {
        rule: String,
        wildcard: String,
        location: String,
    },

    #[error("rule '{rule}': output '{template}' is missing wildcard '{wildcard}' declared by a sibling output")]
    PartialOutputWildcard {
        rule: String,
        wildcard: String,
        template: String,
    },

    #[error("rule '{rule}': unknown placeholder '{{{placeholder}}}' in command")]
    UnknownPlaceholder { rule: String, placeholder: String },

    #[error("rules '{first}' and '{second}' declare interchangeable output templates ('{template}')")]
    DuplicateOutputTemplate {
        first: String,
        second: String,
        template: String,
    },

    #[error("rule '{0}' declares an environment with no packages")]
    EmptyEnvironment(String),

    #[error("wildcard '{0}' declares an empty domain")]
    EmptyDomain(String),

    #[error("target '{target}' uses wildcard '{wildcard}' which has no declared domain")]
    UnknownTargetWildcard { target: String, wildcard: String },

    #[error("invalid target '{target}': {source}")]
    TargetTemplate {
        target: String,
        #[source]
        source: TemplateError,
    },
}

/// Path template grammar violations, reported with the byte offset of
/// the offending character where that helps.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("empty template")]
    Empty,

    #[error("unclosed '{{' at byte {0}")]
    UnclosedBrace(usize),

    #[error("unmatched '}}' at byte {0}")]
    StrayCloseBrace(usize),

    #[error("empty wildcard name at byte {0}")]
    EmptyName(usize),

    #[error("invalid wildcard name '{0}' (use letters, digits and '_')")]
    InvalidName(String),

    #[error("wildcard name '{0}' is reserved")]
    ReservedName(String),

    #[error("wildcards '{{{0}}}' and '{{{1}}}' are adjacent; separate them with literal text")]
    AdjacentWildcards(String, String),

    #[error("wildcard '{0}' appears both as '{{{0}}}' and '{{*{0}}}'")]
    ConflictingModes(String),

    #[error("no value bound for wildcard '{0}'")]
    UnboundName(String),
}

/// Record store IO and decoding failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed record store: {0}")]
    Json(#[from] serde_json::Error),
}
