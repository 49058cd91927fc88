//! Concrete units of work.
//!
//! A job is one rule instantiated over one wildcard binding. Its paths,
//! params and command are fully rendered at graph build time, so the
//! executor never touches templates.

use std::collections::BTreeMap;
use std::fmt;

use crate::rules::{EnvDescriptor, WildcardBinding};

/// Stable job identity: the producing rule plus the wildcard values it
/// was instantiated with. Two demands that agree on both collapse into
/// a single job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId {
    pub rule: String,
    pub binding: WildcardBinding,
}

impl JobId {
    pub fn new(rule: impl Into<String>, binding: WildcardBinding) -> Self {
        JobId {
            rule: rule.into(),
            binding,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rule)?;
        if !self.binding.is_empty() {
            let pairs: Vec<String> = self
                .binding
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            write!(f, "[{}]", pairs.join(", "))?;
        }
        Ok(())
    }
}

/// A rendered input path with the markers that affect scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInput {
    pub name: Option<String>,
    pub path: String,
    pub ancient: bool,
}

/// A rendered output path with its markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
    pub name: Option<String>,
    pub path: String,
    pub temporary: bool,
    pub protected: bool,
    pub directory: bool,
}

/// One schedulable unit: everything the executor needs, rendered.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub rule_index: usize,
    pub inputs: Vec<JobInput>,
    pub outputs: Vec<JobOutput>,
    pub params: BTreeMap<String, String>,
    /// The shell command with every placeholder substituted.
    pub command: String,
    pub environment: Option<EnvDescriptor>,
}

impl Job {
    pub fn input_paths(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|i| i.path.as_str())
    }

    pub fn output_paths(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|o| o.path.as_str())
    }

    /// Whether `path` is one of this job's outputs.
    pub fn produces(&self, path: &str) -> bool {
        self.outputs.iter().any(|o| o.path == path)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    /// Outputs were already up to date; nothing ran.
    Skipped,
    Failed(JobFailure),
}

impl JobStatus {
    /// Whether this job's outputs can be relied on by consumers.
    pub fn is_done(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Skipped)
    }
}

/// Why a job did not deliver its outputs. Failures are reported per
/// target; they never abort unrelated parts of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    /// The command exited nonzero, or was killed by a signal (`None`).
    Command { status: Option<i32> },
    /// The command could not be started at all.
    Spawn(String),
    /// The command exited zero but never created an output.
    MissingOutput { path: String },
    /// The isolated environment could not be provisioned.
    Environment(String),
    /// An upstream dependency failed, so this job never ran.
    Blocked { on: String },
    Internal(String),
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobFailure::Command { status: Some(code) } => {
                write!(f, "command exited with status {code}")
            }
            JobFailure::Command { status: None } => write!(f, "command killed by signal"),
            JobFailure::Spawn(err) => write!(f, "cannot launch command: {err}"),
            JobFailure::MissingOutput { path } => {
                write!(f, "command succeeded but did not create '{path}'")
            }
            JobFailure::Environment(err) => write!(f, "environment setup failed: {err}"),
            JobFailure::Blocked { on } => write!(f, "upstream failure in {on}"),
            JobFailure::Internal(err) => f.write_str(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_display_includes_binding() {
        let mut binding = WildcardBinding::new();
        binding.insert("sample".to_string(), "a".to_string());
        binding.insert("lane".to_string(), "1".to_string());
        let id = JobId::new("align", binding);
        // BTreeMap keeps keys sorted.
        assert_eq!(id.to_string(), "align[lane=1, sample=a]");

        let bare = JobId::new("report", WildcardBinding::new());
        assert_eq!(bare.to_string(), "report");
    }

    #[test]
    fn identical_bindings_collapse() {
        let mut a = WildcardBinding::new();
        a.insert("s".to_string(), "x".to_string());
        let b = a.clone();
        assert_eq!(JobId::new("r", a), JobId::new("r", b));
    }

    #[test]
    fn failure_messages_name_the_cause() {
        let failed = JobFailure::Command { status: Some(2) };
        assert_eq!(failed.to_string(), "command exited with status 2");

        let blocked = JobFailure::Blocked {
            on: "align[sample=a]".to_string(),
        };
        assert!(blocked.to_string().contains("align[sample=a]"));
    }

    #[test]
    fn done_statuses() {
        assert!(JobStatus::Completed.is_done());
        assert!(JobStatus::Skipped.is_done());
        assert!(!JobStatus::Pending.is_done());
        assert!(!JobStatus::Failed(JobFailure::Internal("x".into())).is_done());
    }
}
