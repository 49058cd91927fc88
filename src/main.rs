//! Ruleflow CLI Entry Point
//!
//! Provides command-line interface for pipeline execution.
//!
//! # Usage
//!
//! ```bash
//! # Execute a pipeline's default targets
//! ruleflow pipeline.yaml
//!
//! # Request specific outputs (wildcards expand over declared domains)
//! ruleflow pipeline.yaml results/a.bam "results/{sample}.vcf"
//!
//! # Dry run mode (preview the plan)
//! ruleflow pipeline.yaml --dry-run
//!
//! # Specify working directory
//! ruleflow pipeline.yaml --working-dir /path/to/data
//!
//! # Set maximum parallel jobs
//! ruleflow pipeline.yaml --parallel 8
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info};

use ruleflow::execution::{Engine, RunReport, TargetOutcome};
use ruleflow::rules::load_pipeline;
use ruleflow::{APP_NAME, VERSION};

/// Default pipeline file used when none is specified.
const DEFAULT_PIPELINE: &str = "pipeline.yaml";

/// Default maximum parallel jobs.
const DEFAULT_MAX_PARALLEL: usize = 4;

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    pipeline_path: String,
    targets: Vec<String>,
    dry_run: bool,
    force: bool,
    strict: bool,
    working_dir: Option<PathBuf>,
    env_root: Option<PathBuf>,
    max_parallel: usize,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline_path: DEFAULT_PIPELINE.to_string(),
            targets: Vec::new(),
            dry_run: false,
            force: false,
            strict: false,
            working_dir: None,
            env_root: None,
            max_parallel: DEFAULT_MAX_PARALLEL,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("File-Oriented Pipeline Execution Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: ruleflow [OPTIONS] <PIPELINE_FILE> [TARGETS...]");
    println!();
    println!("Arguments:");
    println!("  <PIPELINE_FILE>     Path to pipeline YAML file");
    println!("  [TARGETS...]        Output paths to build instead of the defaults;");
    println!("                      may use wildcards over declared domains");
    println!();
    println!("Options:");
    println!("  --dry-run           Preview the plan without executing");
    println!("  --force             Rerun every job, up to date or not");
    println!("  --strict            Also rerun jobs whose command changed");
    println!("  --working-dir PATH  Set working directory for file operations");
    println!("  --env-root PATH     Root prefix for managed environments");
    println!("  --parallel N        Maximum parallel jobs, 0 for one per CPU (default: {})", DEFAULT_MAX_PARALLEL);
    println!("  --verbose           Enable debug logging and the run timeline");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  ruleflow pipeline.yaml");
    println!("  ruleflow pipeline.yaml --dry-run");
    println!("  ruleflow pipeline.yaml results/a.sorted.bam --parallel 8");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" => {
                config.dry_run = true;
            }
            "--force" => {
                config.force = true;
            }
            "--strict" => {
                config.strict = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--working-dir" => {
                i += 1;
                if i >= args.len() {
                    return Err("--working-dir requires a path argument".to_string());
                }
                config.working_dir = Some(PathBuf::from(&args[i]));
            }
            "--env-root" => {
                i += 1;
                if i >= args.len() {
                    return Err("--env-root requires a path argument".to_string());
                }
                config.env_root = Some(PathBuf::from(&args[i]));
            }
            "--parallel" => {
                i += 1;
                if i >= args.len() {
                    return Err("--parallel requires a number argument".to_string());
                }
                config.max_parallel = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid parallel value: {}", args[i]))?;
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                // First positional names the pipeline, the rest are targets.
                if positional_index == 0 {
                    config.pipeline_path = arg.clone();
                } else {
                    config.targets.push(arg.clone());
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Validates and sets up the working directory.
fn setup_working_directory(
    working_dir: Option<PathBuf>,
) -> Result<Option<PathBuf>, Box<dyn std::error::Error>> {
    let Some(dir) = working_dir else {
        let current = env::current_dir()?;
        info!("Working directory: {}", current.display());
        return Ok(None);
    };

    if !dir.exists() {
        return Err(format!("Working directory does not exist: {}", dir.display()).into());
    }

    if !dir.is_dir() {
        return Err(format!("Path is not a directory: {}", dir.display()).into());
    }

    // Change to working directory for relative path resolution
    env::set_current_dir(&dir)?;

    // Hand back the absolute form: re-joining a relative path after the
    // chdir would double it up.
    let resolved = env::current_dir()?;
    info!("Working directory: {}", resolved.display());

    Ok(Some(resolved))
}

/// Prints the per-target outcomes and the run totals.
fn print_report(report: &RunReport, verbose: bool) {
    if report.dry_run {
        return;
    }

    println!();
    for (path, outcome) in &report.targets {
        // Pad before coloring: escape codes would throw the width off.
        let label = match outcome {
            TargetOutcome::Built => format!("{:<12}", "built").green(),
            TargetOutcome::UpToDate => format!("{:<12}", "up to date").cyan(),
            TargetOutcome::Failed(_) => format!("{:<12}", "failed").red(),
            TargetOutcome::Blocked(_) => format!("{:<12}", "blocked").yellow(),
        };
        println!("  {} {}", label, path);
        match outcome {
            TargetOutcome::Failed(reason) => println!("  {:<12} {}", "", reason),
            TargetOutcome::Blocked(on) => println!("  {:<12} upstream failure in {}", "", on),
            _ => {}
        }
    }

    println!();
    println!(
        "{} executed, {} up to date, {} failed, {} blocked in {} ms",
        report.executed, report.skipped, report.failed, report.blocked, report.elapsed_ms
    );

    if verbose {
        if let Some(chart) = &report.timeline_chart {
            println!("{}", chart);
        }
        if let Some(summary) = &report.resource_summary {
            println!("{}", summary);
        }
    }
}

/// Main application entry point.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(config.verbose);

    // Print banner
    print_banner();

    // Display configuration
    if config.dry_run {
        info!("Mode: DRY RUN (commands will not execute)");
        println!();
    }

    if config.force {
        info!("Mode: FORCE (records are ignored, everything reruns)");
    }

    // Setup working directory
    let work_dir = setup_working_directory(config.working_dir)?;

    // Load pipeline
    info!("Loading pipeline: {}", config.pipeline_path);
    let pipeline = load_pipeline(&config.pipeline_path).map_err(|e| {
        error!("Failed to load pipeline: {}", e);
        format!(
            "Could not load pipeline from '{}': {}",
            config.pipeline_path, e
        )
    })?;

    // Create and configure engine
    let mut engine = Engine::new(pipeline);
    engine.set_pipeline_path(&config.pipeline_path);
    engine.set_max_parallel(config.max_parallel);
    engine.set_dry_run(config.dry_run);
    engine.set_force(config.force);
    engine.set_strict(config.strict);

    if !config.targets.is_empty() {
        engine.set_targets(config.targets);
    }

    if let Some(dir) = work_dir {
        engine.set_working_dir(dir);
    }

    if let Some(root) = config.env_root {
        engine.set_env_root(root);
    }

    // Execute pipeline
    let report = engine.run()?;
    print_report(&report, config.verbose);

    Ok(report.success())
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::tempdir;

    #[test]
    fn working_directory_resolves_to_the_changed_directory() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        env::set_current_dir(dir.path()).unwrap();

        let resolved = setup_working_directory(Some(PathBuf::from("data")))
            .unwrap()
            .unwrap();

        // The engine joins its record path onto this, so a still-relative
        // "data" here would bury the records under data/data/.
        assert!(resolved.is_absolute());
        assert_eq!(resolved, env::current_dir().unwrap());
        assert!(resolved.ends_with("data"));
    }

    #[test]
    fn missing_working_directories_are_rejected() {
        let err = setup_working_directory(Some(PathBuf::from("/no/such/dir"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
