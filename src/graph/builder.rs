//! Backward-chaining graph construction.
//!
//! Expansion starts from the requested targets and works upstream: each
//! path is resolved to the job that produces it, that job's inputs are
//! expanded in turn, and the recursion bottoms out at files that exist
//! on disk with no producing rule. Jobs are deduplicated by identity, so
//! a shared dependency appears once no matter how many consumers it has.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;

use log::{debug, trace};

use crate::error::{EngineError, RulesetError};
use crate::graph::job::{Job, JobId, JobInput, JobOutput};
use crate::graph::resolver::resolve_path;
use crate::rules::{PipelineConfig, Rule, Ruleset, WildcardBinding};

/// A requested target and how the graph satisfies it.
#[derive(Debug, Clone)]
pub struct RequestedTarget {
    pub path: String,
    /// Index of the producing job, or `None` for a pre-existing file
    /// that no rule produces.
    pub produced_by: Option<usize>,
}

/// The dependency graph for one run.
#[derive(Debug)]
pub struct DependencyGraph {
    pub jobs: Vec<Job>,
    /// Output path -> index of the job that creates it.
    pub producers: HashMap<String, usize>,
    /// Per job: indexes of jobs consuming at least one of its outputs.
    pub dependents: Vec<Vec<usize>>,
    /// Per job: indexes of jobs producing at least one of its inputs.
    pub dependencies: Vec<Vec<usize>>,
    pub requested: Vec<RequestedTarget>,
    /// Temporary output path -> indexes of the jobs consuming it.
    pub temp_consumers: HashMap<String, Vec<usize>>,
}

impl DependencyGraph {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Whether `path` was named as a target of this run.
    pub fn is_requested(&self, path: &str) -> bool {
        self.requested.iter().any(|t| t.path == path)
    }

    /// Job indexes in dependency order: producers before consumers.
    ///
    /// Expansion already rejected cyclic graphs, so every job appears.
    pub fn topo_order(&self) -> Vec<usize> {
        let mut indegree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: VecDeque<usize> = (0..self.jobs.len())
            .filter(|&i| indegree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.jobs.len());
        while let Some(i) = ready.pop_front() {
            order.push(i);
            for &d in &self.dependents[i] {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    ready.push_back(d);
                }
            }
        }
        order
    }
}

/// Expands `targets` into a complete dependency graph.
pub fn build_graph(
    ruleset: &Ruleset,
    config: &PipelineConfig,
    targets: &[String],
) -> Result<DependencyGraph, EngineError> {
    let mut expansion = Expansion {
        ruleset,
        config,
        jobs: Vec::new(),
        producers: HashMap::new(),
        in_progress: HashSet::new(),
        stack: Vec::new(),
    };

    let mut requested = Vec::with_capacity(targets.len());
    for target in targets {
        let produced_by = expansion.expand(target, None)?;
        requested.push(RequestedTarget {
            path: target.clone(),
            produced_by,
        });
    }

    let jobs = expansion.jobs;
    let producers = expansion.producers;

    // Edges are deduplicated: a job consuming two outputs of the same
    // producer depends on it once.
    let mut dependencies: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); jobs.len()];
    let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); jobs.len()];
    for (i, job) in jobs.iter().enumerate() {
        for input in &job.inputs {
            if let Some(&p) = producers.get(&input.path) {
                dependencies[i].insert(p);
                dependents[p].insert(i);
            }
        }
    }

    let mut temp_consumers: HashMap<String, Vec<usize>> = HashMap::new();
    for job in &jobs {
        for output in &job.outputs {
            if output.temporary {
                temp_consumers.insert(output.path.clone(), Vec::new());
            }
        }
    }
    for (i, job) in jobs.iter().enumerate() {
        for input in &job.inputs {
            if let Some(consumers) = temp_consumers.get_mut(&input.path) {
                if !consumers.contains(&i) {
                    consumers.push(i);
                }
            }
        }
    }

    debug!(
        "Dependency graph ready: {} jobs for {} targets",
        jobs.len(),
        targets.len()
    );

    Ok(DependencyGraph {
        jobs,
        producers,
        dependents: dependents.into_iter().map(|s| s.into_iter().collect()).collect(),
        dependencies: dependencies.into_iter().map(|s| s.into_iter().collect()).collect(),
        requested,
        temp_consumers,
    })
}

struct Expansion<'a> {
    ruleset: &'a Ruleset,
    config: &'a PipelineConfig,
    jobs: Vec<Job>,
    producers: HashMap<String, usize>,
    /// Jobs whose inputs are still being expanded.
    in_progress: HashSet<usize>,
    /// (demanded path, job index) for every expansion frame, innermost last.
    stack: Vec<(String, usize)>,
}

impl Expansion<'_> {
    /// Returns the index of the job producing `path`, or `None` for an
    /// existing leaf file.
    fn expand(
        &mut self,
        path: &str,
        wanted_by: Option<&JobId>,
    ) -> Result<Option<usize>, EngineError> {
        if let Some(&idx) = self.producers.get(path) {
            if self.in_progress.contains(&idx) {
                return Err(self.cycle_error(path, idx));
            }
            return Ok(Some(idx));
        }

        let Some(resolution) = resolve_path(path, self.ruleset, self.config)? else {
            if Path::new(path).exists() {
                trace!("'{path}' is a leaf: on disk, no producing rule");
                return Ok(None);
            }
            return Err(EngineError::UnresolvablePath {
                path: path.to_string(),
                wanted_by: wanted_by.map(ToString::to_string),
            });
        };

        let rule = &self.ruleset.rules()[resolution.rule_index];
        let job = instantiate(rule, resolution.rule_index, resolution.binding)?;

        // A sibling output may already be claimed by a different job;
        // that is ambiguity the template shapes could not reveal.
        for output in &job.outputs {
            if let Some(&other) = self.producers.get(&output.path) {
                return Err(EngineError::AmbiguousRule {
                    path: output.path.clone(),
                    candidates: vec![
                        self.jobs[other].id.to_string(),
                        job.id.to_string(),
                    ],
                });
            }
        }

        let idx = self.jobs.len();
        for output in &job.outputs {
            self.producers.insert(output.path.clone(), idx);
        }
        debug!("'{path}' is produced by {}", job.id);
        self.jobs.push(job);

        self.in_progress.insert(idx);
        self.stack.push((path.to_string(), idx));

        let id = self.jobs[idx].id.clone();
        let inputs: Vec<String> = self.jobs[idx].input_paths().map(str::to_string).collect();
        for input in &inputs {
            self.expand(input, Some(&id))?;
        }

        self.stack.pop();
        self.in_progress.remove(&idx);
        Ok(Some(idx))
    }

    /// Re-demanding an output of a job that is still expanding means the
    /// job depends on itself. The report walks the stack from the frame
    /// that entered the job and closes the loop with the re-demanded path.
    fn cycle_error(&self, path: &str, idx: usize) -> EngineError {
        let pos = self
            .stack
            .iter()
            .position(|(_, i)| *i == idx)
            .unwrap_or(0);
        let mut cycle: Vec<String> = self.stack[pos..]
            .iter()
            .map(|(p, i)| format!("{} ({})", p, self.jobs[*i].id.rule))
            .collect();
        cycle.push(format!("{} ({})", path, self.jobs[idx].id.rule));
        EngineError::CycleDetected { cycle }
    }
}

/// Renders one job from a rule and a binding. Registration validated the
/// wildcard closure, so rendering cannot want a name the binding lacks;
/// failures here are reported as template errors all the same.
fn instantiate(
    rule: &Rule,
    rule_index: usize,
    binding: WildcardBinding,
) -> Result<Job, EngineError> {
    let mut outputs = Vec::with_capacity(rule.outputs.len());
    for spec in &rule.outputs {
        let path = spec
            .template
            .substitute(&binding)
            .map_err(|source| template_failure(rule, spec.template.raw(), source))?;
        outputs.push(JobOutput {
            name: spec.name.clone(),
            path,
            temporary: spec.temporary,
            protected: spec.protected,
            directory: spec.directory,
        });
    }

    let mut inputs = Vec::with_capacity(rule.inputs.len());
    for spec in &rule.inputs {
        let path = spec
            .template
            .substitute(&binding)
            .map_err(|source| template_failure(rule, spec.template.raw(), source))?;
        inputs.push(JobInput {
            name: spec.name.clone(),
            path,
            ancient: spec.ancient,
        });
    }

    let params = rule
        .resolved_params(&binding)
        .map_err(|source| template_failure(rule, "params", source))?;

    let input_pairs: Vec<(Option<String>, String)> = inputs
        .iter()
        .map(|i| (i.name.clone(), i.path.clone()))
        .collect();
    let output_pairs: Vec<(Option<String>, String)> = outputs
        .iter()
        .map(|o| (o.name.clone(), o.path.clone()))
        .collect();
    let command = rule
        .render_command(&input_pairs, &output_pairs, &params, &binding)
        .map_err(|source| template_failure(rule, &rule.command, source))?;

    Ok(Job {
        id: JobId::new(rule.name.clone(), binding),
        rule_index,
        inputs,
        outputs,
        params,
        command,
        environment: rule.environment.clone(),
    })
}

fn template_failure(
    rule: &Rule,
    template: &str,
    source: crate::error::TemplateError,
) -> EngineError {
    EngineError::Ruleset(RulesetError::Template {
        rule: rule.name.clone(),
        template: template.to_string(),
        source,
    })
}
