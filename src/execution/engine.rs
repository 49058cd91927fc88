//! Pipeline Execution Engine
//!
//! Drives one run end to end:
//! - Target resolution and dependency graph construction
//! - Incremental planning against the record store
//! - Bounded parallel scheduling with failure isolation
//! - Record capture and temporary output reclamation

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::environment::EnvironmentManager;
use crate::error::EngineError;
use crate::graph::{build_graph, DependencyGraph, JobFailure, JobStatus};
use crate::monitoring::{JobEvent, ResourceMonitor, Timeline};
use crate::records::{plan, ExecutionRecord, PlanOptions, RecordStore, Verdict};
use crate::rules::Pipeline;

use super::hooks::HookRunner;
use super::invoke::execute_job;

/// Interval for resource monitoring samples.
const MONITOR_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// What a worker thread reports back: job index and how it went.
type Completion = (usize, Result<(), JobFailure>);

/// Pipeline execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use ruleflow::execution::Engine;
/// use ruleflow::load_pipeline;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = load_pipeline("pipeline.yaml")?;
///     let mut engine = Engine::new(pipeline);
///     engine.set_pipeline_path("pipeline.yaml");
///     engine.set_max_parallel(4);
///
///     let report = engine.run()?;
///     println!("{} jobs executed", report.executed);
///     Ok(())
/// }
/// ```
pub struct Engine {
    pipeline: Pipeline,
    pipeline_path: PathBuf,
    working_dir: PathBuf,
    max_parallel: usize,
    dry_run: bool,
    force: bool,
    strict: bool,
    env_root: Option<PathBuf>,
    micromamba: Option<PathBuf>,
    targets: Option<Vec<String>>,
}

impl Engine {
    /// Creates an engine for a loaded pipeline.
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            pipeline_path: PathBuf::from("pipeline.yaml"),
            working_dir: PathBuf::from("."),
            max_parallel: 4,
            dry_run: false,
            force: false,
            strict: false,
            env_root: None,
            micromamba: None,
            targets: None,
        }
    }

    /// Sets the pipeline document path. It names the record store, so
    /// two documents in one working directory keep separate histories.
    pub fn set_pipeline_path(&mut self, path: impl Into<PathBuf>) {
        self.pipeline_path = path.into();
    }

    /// Sets the directory the run's bookkeeping lives under.
    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = dir.into();
    }

    /// Caps concurrently running jobs. Zero means one per CPU.
    pub fn set_max_parallel(&mut self, max: usize) {
        self.max_parallel = if max == 0 { num_cpus::get() } else { max };
    }

    /// Plan and report without executing anything.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Reruns every job, records notwithstanding.
    pub fn set_force(&mut self, force: bool) {
        self.force = force;
    }

    /// Also reruns jobs whose rendered command or params changed.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Overrides the root prefix for managed environments.
    pub fn set_env_root(&mut self, root: impl Into<PathBuf>) {
        self.env_root = Some(root.into());
    }

    /// Overrides the micromamba binary used for managed environments.
    pub fn set_micromamba(&mut self, binary: impl Into<PathBuf>) {
        self.micromamba = Some(binary.into());
    }

    /// Requests these targets instead of the document's defaults.
    /// Entries may contain wildcards over declared domains.
    pub fn set_targets(&mut self, targets: Vec<String>) {
        self.targets = Some(targets);
    }

    /// Executes the pipeline.
    ///
    /// Builds the dependency graph for the requested targets, plans
    /// every job against the record store, then runs what is stale with
    /// bounded parallelism. A failing job only takes its dependents
    /// down; independent branches keep running.
    pub fn run(&self) -> Result<RunReport, EngineError> {
        let started = Instant::now();

        let targets = self.resolve_targets()?;
        let graph = build_graph(&self.pipeline.ruleset, &self.pipeline.config, &targets)?;

        let store_path = RecordStore::path_for(&self.working_dir, &self.pipeline_path);
        let mut store = RecordStore::load_or_default(store_path);

        let options = PlanOptions {
            force: self.force,
            strict: self.strict,
        };
        let verdicts = plan(&graph, &store, options);

        check_protected(&graph, &verdicts)?;

        let planned_run = verdicts.iter().filter(|v| v.must_run()).count();
        let planned_skip = graph.len() - planned_run;

        info!(
            "Starting run: {} jobs ({} to run, {} up to date), max parallel: {}",
            graph.len(),
            planned_run,
            planned_skip,
            self.max_parallel
        );

        if self.dry_run {
            return Ok(self.plan_preview(&graph, &verdicts, planned_run, planned_skip, started));
        }

        let hooks = HookRunner::new(self.pipeline.hooks.clone());
        hooks.fire_start();

        // Scheduling has begun, so on_start's counterpart fires even
        // when the run dies on an engine error.
        let outcome = match self.execute(&graph, &verdicts, &mut store) {
            Ok(outcome) => outcome,
            Err(e) => {
                hooks.fire_outcome(false);
                return Err(e);
            }
        };
        let report = self.build_report(&graph, &outcome, planned_run, planned_skip, started);

        hooks.fire_outcome(report.success());
        Ok(report)
    }

    fn resolve_targets(&self) -> Result<Vec<String>, EngineError> {
        let targets = match &self.targets {
            Some(requested) => self.pipeline.config.expand_targets(requested)?,
            None => self.pipeline.targets.clone(),
        };
        if targets.is_empty() {
            return Err(EngineError::NoTargets);
        }
        Ok(targets)
    }

    /// Prints the plan without touching records, hooks or the filesystem.
    fn plan_preview(
        &self,
        graph: &DependencyGraph,
        verdicts: &[Verdict],
        planned_run: usize,
        planned_skip: usize,
        started: Instant,
    ) -> RunReport {
        for idx in graph.topo_order() {
            if let Verdict::Run(reason) = &verdicts[idx] {
                let job = &graph.jobs[idx];
                println!();
                println!("[DRY RUN] {}", job.id);
                println!("  Reason:  {}", reason);
                println!("  Command: {}", job.command);
            }
        }
        println!();
        println!("[DRY RUN] {} to run, {} up to date", planned_run, planned_skip);

        RunReport {
            targets: Vec::new(),
            executed: 0,
            skipped: 0,
            failed: 0,
            blocked: 0,
            dry_run: true,
            planned_run,
            planned_skip,
            elapsed_ms: started.elapsed().as_millis(),
            job_durations: Vec::new(),
            timeline_chart: None,
            resource_summary: None,
        }
    }

    /// The scheduler loop. Skips resolve inline; stale jobs run on
    /// worker threads, at most `max_parallel` at a time, reporting back
    /// over one channel.
    fn execute(
        &self,
        graph: &DependencyGraph,
        verdicts: &[Verdict],
        store: &mut RecordStore,
    ) -> Result<ExecutionOutcome, EngineError> {
        let mut statuses = vec![JobStatus::Pending; graph.len()];
        let mut timeline = Timeline::new();
        let mut temp_remaining: HashMap<String, usize> = graph
            .temp_consumers
            .iter()
            .map(|(path, consumers)| (path.clone(), consumers.len()))
            .collect();

        let mut manager = match &self.env_root {
            Some(root) => EnvironmentManager::at(root.clone()),
            None => EnvironmentManager::new(),
        };
        if let Some(binary) = &self.micromamba {
            manager = manager.with_micromamba(binary.clone());
        }
        let manager = Arc::new(manager);

        let (tx, rx): (Sender<Completion>, Receiver<Completion>) = channel();

        let monitor_running = Arc::new(AtomicBool::new(true));
        let monitor_flag = Arc::clone(&monitor_running);
        let monitor_handle = thread::spawn(move || {
            let mut monitor = ResourceMonitor::new();
            while monitor_flag.load(Ordering::Relaxed) {
                monitor.sample();
                thread::sleep(MONITOR_SAMPLE_INTERVAL);
            }
            monitor
        });

        let mut running_count = 0usize;

        loop {
            let mut progressed = true;
            while progressed {
                progressed = false;
                for idx in 0..graph.len() {
                    if statuses[idx] != JobStatus::Pending
                        || !dependencies_done(graph, &statuses, idx)
                    {
                        continue;
                    }
                    match &verdicts[idx] {
                        Verdict::Skip => {
                            debug!("{} is up to date", graph.jobs[idx].id);
                            statuses[idx] = JobStatus::Skipped;
                            timeline.record(graph.jobs[idx].id.to_string(), JobEvent::Skipped);
                            release_temps(graph, &mut temp_remaining, idx);
                            progressed = true;
                        }
                        Verdict::Run(reason) => {
                            if running_count >= self.max_parallel {
                                continue;
                            }
                            info!("Starting {} ({})", graph.jobs[idx].id, reason);
                            statuses[idx] = JobStatus::Running;
                            timeline.record(graph.jobs[idx].id.to_string(), JobEvent::Started);

                            let tx = tx.clone();
                            let job = graph.jobs[idx].clone();
                            let manager = Arc::clone(&manager);
                            thread::spawn(move || {
                                let result = execute_job(&job, &manager);
                                if let Err(e) = tx.send((idx, result)) {
                                    error!("Failed to send completion signal: {}", e);
                                }
                            });

                            running_count += 1;
                            progressed = true;
                        }
                    }
                }
            }

            if running_count == 0 {
                break;
            }

            let Ok((idx, result)) = rx.recv() else {
                // We hold a sender, so the channel cannot close on us.
                error!("Worker channel closed unexpectedly");
                break;
            };
            running_count -= 1;

            match result {
                Ok(()) => {
                    info!("{} completed", graph.jobs[idx].id);
                    statuses[idx] = JobStatus::Completed;
                    timeline.record(graph.jobs[idx].id.to_string(), JobEvent::Finished { ok: true });

                    store.record(ExecutionRecord::capture(&graph.jobs[idx]));
                    if let Err(e) = store.save() {
                        error!("Cannot persist execution records: {}", e);
                        drain(&rx, &mut running_count);
                        monitor_running.store(false, Ordering::Relaxed);
                        let _ = monitor_handle.join();
                        return Err(EngineError::Store {
                            path: store.path().display().to_string(),
                            source: e,
                        });
                    }

                    release_temps(graph, &mut temp_remaining, idx);
                }
                Err(failure) => {
                    error!("{} failed: {}", graph.jobs[idx].id, failure);
                    statuses[idx] = JobStatus::Failed(failure);
                    timeline.record(graph.jobs[idx].id.to_string(), JobEvent::Finished { ok: false });
                    block_dependents(graph, &mut statuses, &mut timeline, idx);
                }
            }
        }

        // Expansion rejected cycles and the cascade marks every dependent
        // of a failure, so nothing should still be pending here.
        for (idx, status) in statuses.iter_mut().enumerate() {
            if matches!(status, JobStatus::Pending | JobStatus::Running) {
                warn!("{} never became runnable", graph.jobs[idx].id);
                *status =
                    JobStatus::Failed(JobFailure::Internal("never became runnable".to_string()));
            }
        }

        monitor_running.store(false, Ordering::Relaxed);
        let resource_summary = monitor_handle.join().ok().map(|m| m.summary());

        Ok(ExecutionOutcome {
            statuses,
            timeline,
            resource_summary,
        })
    }

    fn build_report(
        &self,
        graph: &DependencyGraph,
        run: &ExecutionOutcome,
        planned_run: usize,
        planned_skip: usize,
        started: Instant,
    ) -> RunReport {
        let mut executed = 0;
        let mut skipped = 0;
        let mut failed = 0;
        let mut blocked = 0;
        for status in &run.statuses {
            match status {
                JobStatus::Completed => executed += 1,
                JobStatus::Skipped => skipped += 1,
                JobStatus::Failed(JobFailure::Blocked { .. }) => blocked += 1,
                JobStatus::Failed(_) => failed += 1,
                JobStatus::Pending | JobStatus::Running => {}
            }
        }

        let targets = graph
            .requested
            .iter()
            .map(|target| {
                let outcome = match target.produced_by {
                    // Pre-existing file no rule produces.
                    None => TargetOutcome::UpToDate,
                    Some(idx) => match &run.statuses[idx] {
                        JobStatus::Completed => TargetOutcome::Built,
                        JobStatus::Skipped => TargetOutcome::UpToDate,
                        JobStatus::Failed(JobFailure::Blocked { on }) => {
                            TargetOutcome::Blocked(on.clone())
                        }
                        JobStatus::Failed(failure) => TargetOutcome::Failed(failure.to_string()),
                        JobStatus::Pending | JobStatus::Running => {
                            TargetOutcome::Failed("never ran".to_string())
                        }
                    },
                };
                (target.path.clone(), outcome)
            })
            .collect();

        RunReport {
            targets,
            executed,
            skipped,
            failed,
            blocked,
            dry_run: false,
            planned_run,
            planned_skip,
            elapsed_ms: started.elapsed().as_millis(),
            job_durations: run.timeline.durations(),
            timeline_chart: (executed > 0).then(|| run.timeline.gantt_chart()),
            resource_summary: run.resource_summary.clone(),
        }
    }
}

struct ExecutionOutcome {
    statuses: Vec<JobStatus>,
    timeline: Timeline,
    resource_summary: Option<String>,
}

/// How one requested path ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
    /// Produced by a job in this run.
    Built,
    /// Already present and current; nothing ran.
    UpToDate,
    /// The producing job failed.
    Failed(String),
    /// An upstream failure kept the producing job from running.
    Blocked(String),
}

/// The outcome of one [`Engine::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Requested paths in request order, each with how it ended.
    /// Empty for dry runs.
    pub targets: Vec<(String, TargetOutcome)>,
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub blocked: usize,
    pub dry_run: bool,
    /// Plan tallies, filled for dry runs too.
    pub planned_run: usize,
    pub planned_skip: usize,
    pub elapsed_ms: u128,
    /// Wall-clock milliseconds per executed job, in start order.
    pub job_durations: Vec<(String, u128)>,
    /// Rendered timeline of the executed jobs, when any ran.
    pub timeline_chart: Option<String>,
    pub resource_summary: Option<String>,
}

impl RunReport {
    /// Whether every requested output was delivered. Dry runs that got
    /// as far as a plan count as successful.
    pub fn success(&self) -> bool {
        self.failed == 0 && self.blocked == 0
    }
}

fn dependencies_done(graph: &DependencyGraph, statuses: &[JobStatus], idx: usize) -> bool {
    graph.dependencies[idx].iter().all(|&d| statuses[d].is_done())
}

/// A job that is going to run must not overwrite an existing protected
/// output; the file has to be unprotected or removed by hand first.
fn check_protected(graph: &DependencyGraph, verdicts: &[Verdict]) -> Result<(), EngineError> {
    for (idx, job) in graph.jobs.iter().enumerate() {
        if !verdicts[idx].must_run() {
            continue;
        }
        for output in &job.outputs {
            if output.protected && Path::new(&output.path).exists() {
                return Err(EngineError::ProtectedOutputConflict {
                    job: job.id.to_string(),
                    path: output.path.clone(),
                });
            }
        }
    }
    Ok(())
}

fn block_dependents(
    graph: &DependencyGraph,
    statuses: &mut [JobStatus],
    timeline: &mut Timeline,
    failed: usize,
) {
    let mut queue = vec![failed];
    while let Some(current) = queue.pop() {
        for &dependent in &graph.dependents[current] {
            if statuses[dependent] != JobStatus::Pending {
                continue;
            }
            let on = graph.jobs[current].id.to_string();
            warn!(
                "{} will not run: upstream failure in {}",
                graph.jobs[dependent].id, on
            );
            statuses[dependent] = JobStatus::Failed(JobFailure::Blocked { on });
            timeline.record(graph.jobs[dependent].id.to_string(), JobEvent::Blocked);
            queue.push(dependent);
        }
    }
}

/// Called when job `idx` becomes done. Decrements the consumer count of
/// every temporary it reads and reclaims those nobody needs anymore.
/// Requested temporaries are kept: the user asked for them by path.
fn release_temps(graph: &DependencyGraph, remaining: &mut HashMap<String, usize>, idx: usize) {
    let mut seen = HashSet::new();
    for input in &graph.jobs[idx].inputs {
        if !seen.insert(input.path.as_str()) {
            continue;
        }
        let Some(count) = remaining.get_mut(&input.path) else {
            continue;
        };
        *count = count.saturating_sub(1);
        if *count > 0 || graph.is_requested(&input.path) {
            continue;
        }

        let path = Path::new(&input.path);
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else if path.exists() {
            fs::remove_file(path)
        } else {
            continue;
        };
        match result {
            Ok(()) => info!("Reclaimed temporary '{}'", input.path),
            Err(e) => warn!("Failed to reclaim temporary '{}': {}", input.path, e),
        }
    }
}

fn drain(rx: &Receiver<Completion>, running: &mut usize) {
    while *running > 0 {
        if rx.recv().is_err() {
            break;
        }
        *running -= 1;
    }
}
