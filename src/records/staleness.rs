//! Incremental staleness analysis.
//!
//! Every job gets a verdict before anything runs: execute, or skip with
//! outputs taken as already good. Local verdicts compare each job against
//! its execution record; a fixpoint then lets dirt flow downstream and
//! pulls deleted inputs back into existence upstream.
//!
//! A missing file is not by itself a reason to run. Only requested
//! outputs must exist; intermediates (deleted temporaries especially) are
//! rebuilt only when a running consumer actually needs them.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use log::debug;

use crate::graph::{DependencyGraph, Job, JobOutput};
use crate::records::store::{Fingerprint, RecordStore};

/// Why a job must execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// The run was forced from the command line.
    Forced,
    /// A requested output does not exist.
    MissingOutput { path: String },
    /// No usable execution record: never ran, or the rule or its output
    /// set changed since.
    NoRecord,
    /// An input fingerprint differs from the record.
    InputChanged { path: String },
    /// An input is newer than the recorded outputs.
    InputNewer { path: String },
    /// The command or params differ from the record (strict mode).
    CodeChanged,
    /// An upstream producer will run, so recorded inputs are obsolete.
    UpstreamRuns { job: String },
    /// A running consumer needs this missing output re-materialized.
    NeededBy { path: String, consumer: String },
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Forced => f.write_str("forced"),
            Reason::MissingOutput { path } => write!(f, "requested output '{path}' is missing"),
            Reason::NoRecord => f.write_str("no execution record"),
            Reason::InputChanged { path } => write!(f, "input '{path}' changed"),
            Reason::InputNewer { path } => {
                write!(f, "input '{path}' is newer than the recorded outputs")
            }
            Reason::CodeChanged => f.write_str("command or params changed"),
            Reason::UpstreamRuns { job } => write!(f, "upstream {job} will run"),
            Reason::NeededBy { path, consumer } => {
                write!(f, "must produce '{path}' for {consumer}")
            }
        }
    }
}

/// The planner's decision for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Run(Reason),
    Skip,
}

impl Verdict {
    pub fn must_run(&self) -> bool {
        matches!(self, Verdict::Run(_))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Run everything, records notwithstanding.
    pub force: bool,
    /// Also rerun when the rendered command or params changed.
    pub strict: bool,
}

/// Decides for every job in the graph whether it runs or skips.
///
/// The returned vector is parallel to `graph.jobs`.
pub fn plan(graph: &DependencyGraph, store: &RecordStore, options: PlanOptions) -> Vec<Verdict> {
    let mut verdicts: Vec<Verdict> = graph
        .jobs
        .iter()
        .map(|job| local_verdict(job, graph, store, options))
        .collect();

    // Fixpoint. Dirt flows downstream through non-ancient inputs; running
    // consumers pull missing inputs back into existence upstream (ancient
    // or not: exemption covers freshness, never absence).
    loop {
        let mut changed = false;

        for i in 0..graph.jobs.len() {
            if verdicts[i].must_run() {
                continue;
            }
            let dirty_upstream = graph.jobs[i].inputs.iter().find_map(|input| {
                if input.ancient {
                    return None;
                }
                let p = *graph.producers.get(&input.path)?;
                verdicts[p].must_run().then_some(p)
            });
            if let Some(p) = dirty_upstream {
                verdicts[i] = Verdict::Run(Reason::UpstreamRuns {
                    job: graph.jobs[p].id.to_string(),
                });
                changed = true;
            }
        }

        for i in 0..graph.jobs.len() {
            if !verdicts[i].must_run() {
                continue;
            }
            for input in &graph.jobs[i].inputs {
                let Some(&p) = graph.producers.get(&input.path) else {
                    continue;
                };
                if verdicts[p].must_run() || Path::new(&input.path).exists() {
                    continue;
                }
                verdicts[p] = Verdict::Run(Reason::NeededBy {
                    path: input.path.clone(),
                    consumer: graph.jobs[i].id.to_string(),
                });
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    let running = verdicts.iter().filter(|v| v.must_run()).count();
    debug!(
        "Planned {} of {} jobs to run, {} to skip",
        running,
        verdicts.len(),
        verdicts.len() - running
    );

    verdicts
}

fn local_verdict(
    job: &Job,
    graph: &DependencyGraph,
    store: &RecordStore,
    options: PlanOptions,
) -> Verdict {
    if options.force {
        return Verdict::Run(Reason::Forced);
    }

    for output in &job.outputs {
        if graph.is_requested(&output.path) && !output_exists(output) {
            return Verdict::Run(Reason::MissingOutput {
                path: output.path.clone(),
            });
        }
    }

    let record = match job.outputs.first().and_then(|o| store.get(&o.path)) {
        Some(record) => record,
        None => return Verdict::Run(Reason::NoRecord),
    };
    if record.rule != job.id.rule {
        return Verdict::Run(Reason::NoRecord);
    }
    let current_outputs: BTreeSet<&str> = job.outputs.iter().map(|o| o.path.as_str()).collect();
    if record.outputs.len() != current_outputs.len()
        || !current_outputs
            .iter()
            .all(|p| record.outputs.contains_key(*p))
    {
        return Verdict::Run(Reason::NoRecord);
    }

    if options.strict && (record.command != job.command || record.params != job.params) {
        return Verdict::Run(Reason::CodeChanged);
    }

    let oldest_output = record.outputs.values().map(|fp| fp.mtime_ns).min();

    for input in &job.inputs {
        if input.ancient {
            continue;
        }
        // A missing input is the fixpoint's concern; it matters only if
        // this job ends up running anyway.
        let Ok(current) = Fingerprint::of(Path::new(&input.path)) else {
            continue;
        };
        match record.inputs.get(&input.path) {
            Some(recorded) if *recorded == current => {}
            _ => {
                return Verdict::Run(Reason::InputChanged {
                    path: input.path.clone(),
                });
            }
        }
        if let Some(oldest) = oldest_output {
            if current.mtime_ns > oldest {
                return Verdict::Run(Reason::InputNewer {
                    path: input.path.clone(),
                });
            }
        }
    }

    Verdict::Skip
}

fn output_exists(output: &JobOutput) -> bool {
    let path = Path::new(&output.path);
    if output.directory {
        path.is_dir()
    } else {
        path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::graph::build_graph;
    use crate::records::store::ExecutionRecord;
    use crate::rules::{PipelineConfig, RulePattern, Ruleset};

    fn t(root: &str, suffix: &str) -> String {
        format!("{root}/{suffix}")
    }

    /// Creates every output of every job on disk and files its record,
    /// as if the whole graph had just run.
    fn pretend_run(graph: &DependencyGraph, store: &mut RecordStore) {
        for &i in &graph.topo_order() {
            for path in graph.jobs[i].output_paths() {
                let path = Path::new(path);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).unwrap();
                }
                fs::write(path, "content").unwrap();
            }
            // Keep input and output mtimes apart.
            thread::sleep(Duration::from_millis(20));
            store.record(ExecutionRecord::capture(&graph.jobs[i]));
        }
    }

    fn chain(root: &str) -> (Ruleset, Vec<String>) {
        let ruleset = Ruleset::new(vec![
            RulePattern::new("stage1", "tool1 {input} > {output}")
                .with_input(t(root, "leaf.txt"))
                .with_temp_output(t(root, "mid/{s}.tmp")),
            RulePattern::new("stage2", "tool2 {input} > {output}")
                .with_input(t(root, "mid/{s}.tmp"))
                .with_output(t(root, "out/{s}.txt")),
        ])
        .unwrap();
        let targets = vec![t(root, "out/a.txt")];
        (ruleset, targets)
    }

    fn setup_chain(dir: &TempDir) -> (DependencyGraph, RecordStore) {
        let root = dir.path().display().to_string();
        fs::write(dir.path().join("leaf.txt"), "seed").unwrap();
        let (ruleset, targets) = chain(&root);
        let graph = build_graph(&ruleset, &PipelineConfig::default(), &targets).unwrap();
        let store = RecordStore::new(dir.path().join("records.json"));
        (graph, store)
    }

    #[test]
    fn everything_runs_without_records() {
        let dir = TempDir::new().unwrap();
        let (graph, store) = setup_chain(&dir);

        let verdicts = plan(&graph, &store, PlanOptions::default());
        assert!(verdicts.iter().all(Verdict::must_run));
    }

    #[test]
    fn unchanged_graph_skips_entirely() {
        let dir = TempDir::new().unwrap();
        let (graph, mut store) = setup_chain(&dir);
        pretend_run(&graph, &mut store);

        let verdicts = plan(&graph, &store, PlanOptions::default());
        assert!(verdicts.iter().all(|v| *v == Verdict::Skip));
    }

    #[test]
    fn deleted_temporary_does_not_defeat_skipping() {
        let dir = TempDir::new().unwrap();
        let (graph, mut store) = setup_chain(&dir);
        pretend_run(&graph, &mut store);

        let root = dir.path().display().to_string();
        fs::remove_file(t(&root, "mid/a.tmp")).unwrap();

        let verdicts = plan(&graph, &store, PlanOptions::default());
        assert!(verdicts.iter().all(|v| *v == Verdict::Skip));
    }

    #[test]
    fn deleted_temporary_rematerializes_when_its_consumer_runs() {
        let dir = TempDir::new().unwrap();
        let (graph, mut store) = setup_chain(&dir);
        pretend_run(&graph, &mut store);

        let root = dir.path().display().to_string();
        fs::remove_file(t(&root, "mid/a.tmp")).unwrap();
        fs::remove_file(t(&root, "out/a.txt")).unwrap();

        let verdicts = plan(&graph, &store, PlanOptions::default());
        let stage1 = graph.producers[&t(&root, "mid/a.tmp")];
        let stage2 = graph.producers[&t(&root, "out/a.txt")];
        assert!(matches!(
            verdicts[stage2],
            Verdict::Run(Reason::MissingOutput { .. })
        ));
        assert!(matches!(
            verdicts[stage1],
            Verdict::Run(Reason::NeededBy { .. })
        ));
    }

    #[test]
    fn touched_leaf_propagates_downstream() {
        let dir = TempDir::new().unwrap();
        let (graph, mut store) = setup_chain(&dir);
        pretend_run(&graph, &mut store);

        thread::sleep(Duration::from_millis(20));
        fs::write(dir.path().join("leaf.txt"), "reseeded").unwrap();

        let root = dir.path().display().to_string();
        let verdicts = plan(&graph, &store, PlanOptions::default());
        let stage1 = graph.producers[&t(&root, "mid/a.tmp")];
        let stage2 = graph.producers[&t(&root, "out/a.txt")];
        assert!(matches!(
            verdicts[stage1],
            Verdict::Run(Reason::InputChanged { .. })
        ));
        assert!(matches!(
            verdicts[stage2],
            Verdict::Run(Reason::UpstreamRuns { .. })
        ));
    }

    #[test]
    fn ancient_inputs_do_not_propagate_dirt() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().display().to_string();
        fs::write(dir.path().join("ref_source.txt"), "v1").unwrap();
        fs::write(dir.path().join("reads.txt"), "reads").unwrap();

        let ruleset = Ruleset::new(vec![
            RulePattern::new("index", "indexer {input} > {output}")
                .with_input(t(&root, "ref_source.txt"))
                .with_output(t(&root, "ref.idx")),
            RulePattern::new("align", "aligner {input} > {output}")
                .with_ancient_input(t(&root, "ref.idx"))
                .with_input(t(&root, "reads.txt"))
                .with_output(t(&root, "out.bam")),
        ])
        .unwrap();
        let targets = vec![t(&root, "out.bam")];
        let graph = build_graph(&ruleset, &PipelineConfig::default(), &targets).unwrap();
        let mut store = RecordStore::new(dir.path().join("records.json"));
        pretend_run(&graph, &mut store);

        // Rebuilding the index must not drag align along.
        thread::sleep(Duration::from_millis(20));
        fs::write(dir.path().join("ref_source.txt"), "v2").unwrap();

        let verdicts = plan(&graph, &store, PlanOptions::default());
        let index = graph.producers[&t(&root, "ref.idx")];
        let align = graph.producers[&t(&root, "out.bam")];
        assert!(verdicts[index].must_run());
        assert_eq!(verdicts[align], Verdict::Skip);
    }

    #[test]
    fn force_runs_everything() {
        let dir = TempDir::new().unwrap();
        let (graph, mut store) = setup_chain(&dir);
        pretend_run(&graph, &mut store);

        let verdicts = plan(
            &graph,
            &store,
            PlanOptions {
                force: true,
                strict: false,
            },
        );
        assert!(verdicts
            .iter()
            .all(|v| *v == Verdict::Run(Reason::Forced)));
    }

    #[test]
    fn strict_mode_notices_command_changes() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().display().to_string();
        fs::write(dir.path().join("leaf.txt"), "seed").unwrap();

        let build = |command: &str| {
            let ruleset = Ruleset::new(vec![RulePattern::new("step", command)
                .with_input(t(&root, "leaf.txt"))
                .with_output(t(&root, "out.txt"))])
            .unwrap();
            build_graph(&ruleset, &PipelineConfig::default(), &[t(&root, "out.txt")]).unwrap()
        };

        let graph = build("tool --fast {input} > {output}");
        let mut store = RecordStore::new(dir.path().join("records.json"));
        pretend_run(&graph, &mut store);

        let edited = build("tool --thorough {input} > {output}");
        let lax = plan(&edited, &store, PlanOptions::default());
        assert_eq!(lax[0], Verdict::Skip);

        let strict = plan(
            &edited,
            &store,
            PlanOptions {
                force: false,
                strict: true,
            },
        );
        assert_eq!(strict[0], Verdict::Run(Reason::CodeChanged));
    }

    #[test]
    fn rule_rename_invalidates_the_record() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().display().to_string();
        fs::write(dir.path().join("leaf.txt"), "seed").unwrap();

        let build = |name: &str| {
            let ruleset = Ruleset::new(vec![RulePattern::new(name, "tool {input} > {output}")
                .with_input(t(&root, "leaf.txt"))
                .with_output(t(&root, "out.txt"))])
            .unwrap();
            build_graph(&ruleset, &PipelineConfig::default(), &[t(&root, "out.txt")]).unwrap()
        };

        let mut store = RecordStore::new(dir.path().join("records.json"));
        pretend_run(&build("old_name"), &mut store);

        let verdicts = plan(&build("new_name"), &store, PlanOptions::default());
        assert_eq!(verdicts[0], Verdict::Run(Reason::NoRecord));
    }

    #[test]
    fn outputs_restored_with_old_mtimes_trip_input_newer() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().display().to_string();
        fs::write(dir.path().join("leaf.txt"), "seed").unwrap();

        let ruleset = Ruleset::new(vec![RulePattern::new("step", "tool {input} > {output}")
            .with_input(t(&root, "leaf.txt"))
            .with_output(t(&root, "out.txt"))])
        .unwrap();
        let graph =
            build_graph(&ruleset, &PipelineConfig::default(), &[t(&root, "out.txt")]).unwrap();

        // Record a run whose output predates its input: the input wins.
        fs::write(dir.path().join("out.txt"), "stale").unwrap();
        thread::sleep(Duration::from_millis(20));
        fs::write(dir.path().join("leaf.txt"), "seed").unwrap();
        let mut store = RecordStore::new(dir.path().join("records.json"));
        store.record(ExecutionRecord::capture(&graph.jobs[0]));

        let verdicts = plan(&graph, &store, PlanOptions::default());
        assert!(matches!(
            verdicts[0],
            Verdict::Run(Reason::InputNewer { .. })
        ));
    }
}
