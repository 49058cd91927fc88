//! Single Job Invocation
//!
//! Runs one job's rendered command including:
//! - Stale output removal and directory preparation
//! - Script generation
//! - Environment activation (micromamba or plain bash)
//! - Output verification, cleanup and write protection

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, error, warn};

use crate::environment::{Activation, EnvironmentManager};
use crate::graph::{Job, JobFailure};

/// Runs `job`'s command to completion.
///
/// On success every declared output has been verified to exist and
/// protected outputs have been made read-only. On failure any partial
/// outputs have been removed, protected ones excepted, so a later run
/// cannot mistake them for finished results.
pub fn execute_job(job: &Job, manager: &EnvironmentManager) -> Result<(), JobFailure> {
    let activation = match &job.environment {
        Some(descriptor) => match manager.ensure(descriptor) {
            Ok(name) => Activation::Environment(name),
            Err(e) => return Err(JobFailure::Environment(e.to_string())),
        },
        None => Activation::Plain,
    };

    prepare_outputs(job)?;

    let script_path = write_script(job)
        .map_err(|e| JobFailure::Internal(format!("cannot write job script: {e}")))?;

    let result = run_script(job, manager, &activation, &script_path);

    if let Err(e) = fs::remove_file(&script_path) {
        warn!("Failed to clean up script {}: {}", script_path.display(), e);
    }

    let failure = match result {
        Ok(()) => match first_missing_output(job) {
            None => {
                protect_outputs(job);
                return Ok(());
            }
            Some(path) => {
                error!("Job '{}' exited cleanly but did not create '{}'", job.id, path);
                JobFailure::MissingOutput { path }
            }
        },
        Err(failure) => failure,
    };

    cleanup_outputs(job);
    Err(failure)
}

/// Clears results of earlier runs and creates the directories outputs
/// land in. A stale file must not survive into this run: if the command
/// then fails without touching it, it would pass for a fresh result.
fn prepare_outputs(job: &Job) -> Result<(), JobFailure> {
    for output in &job.outputs {
        let path = Path::new(&output.path);

        clear_output(path, output.directory)
            .map_err(|e| prep_failure(&output.path, &e))?;

        if output.directory {
            fs::create_dir_all(path).map_err(|e| prep_failure(&output.path, &e))?;
        } else if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| prep_failure(&output.path, &e))?;
                debug!("Created directory: {}", parent.display());
            }
        }
    }
    Ok(())
}

fn clear_output(path: &Path, directory: bool) -> std::io::Result<()> {
    if directory {
        if path.is_dir() {
            fs::remove_dir_all(path)?;
        }
    } else if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

fn prep_failure(path: &str, err: &std::io::Error) -> JobFailure {
    JobFailure::Internal(format!("cannot prepare output '{path}': {err}"))
}

/// Creates a temporary bash script holding the job's command.
fn write_script(job: &Job) -> std::io::Result<PathBuf> {
    let script_dir = std::env::temp_dir().join("ruleflow_scripts");
    fs::create_dir_all(&script_dir)?;

    let digest = blake3::hash(job.id.to_string().as_bytes()).to_hex();
    let script_path = script_dir.join(format!(
        "job_{}_{}.sh",
        std::process::id(),
        &digest[..16]
    ));
    let mut file = File::create(&script_path)?;

    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "set -e")?;
    writeln!(file, "{}", job.command)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(script_path)
}

fn run_script(
    job: &Job,
    manager: &EnvironmentManager,
    activation: &Activation,
    script_path: &Path,
) -> Result<(), JobFailure> {
    let output = manager
        .command_for(activation, script_path)
        .output()
        .map_err(|e| JobFailure::Spawn(e.to_string()))?;

    if output.status.success() {
        debug!("Job '{}' completed successfully", job.id);

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("Job '{}' output:\n{}", job.id, stdout);
        }

        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);

        error!(
            "Job '{}' failed with exit code: {:?}",
            job.id,
            output.status.code()
        );

        if !stderr.trim().is_empty() {
            error!("stderr:\n{}", stderr);
        }
        if !stdout.trim().is_empty() {
            debug!("stdout:\n{}", stdout);
        }

        Err(JobFailure::Command {
            status: output.status.code(),
        })
    }
}

/// The first declared output the command did not create, if any.
fn first_missing_output(job: &Job) -> Option<String> {
    job.outputs.iter().find_map(|output| {
        let path = Path::new(&output.path);
        let present = if output.directory {
            path.is_dir()
        } else {
            path.exists()
        };
        (!present).then(|| output.path.clone())
    })
}

/// Makes protected outputs read-only so later runs cannot clobber them.
fn protect_outputs(job: &Job) {
    for output in &job.outputs {
        if !output.protected {
            continue;
        }
        let path = Path::new(&output.path);
        let result = fs::metadata(path).and_then(|meta| {
            let mut perms = meta.permissions();
            perms.set_readonly(true);
            fs::set_permissions(path, perms)
        });
        match result {
            Ok(()) => debug!("Write-protected '{}'", output.path),
            Err(e) => warn!("Failed to write-protect '{}': {}", output.path, e),
        }
    }
}

/// Removes whatever outputs a failed run left behind. Protected outputs
/// stay put; the next run's preflight refuses to overwrite them.
fn cleanup_outputs(job: &Job) {
    for output in &job.outputs {
        if output.protected {
            continue;
        }
        let path = Path::new(&output.path);
        let result = if output.directory {
            if path.is_dir() {
                fs::remove_dir_all(path)
            } else {
                continue;
            }
        } else if path.exists() {
            fs::remove_file(path)
        } else {
            continue;
        };
        match result {
            Ok(()) => debug!("Removed partial output '{}'", output.path),
            Err(e) => warn!("Failed to remove partial output '{}': {}", output.path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    use crate::graph::{JobId, JobOutput};
    use crate::rules::{EnvDescriptor, WildcardBinding};

    fn output(path: &Path) -> JobOutput {
        JobOutput {
            name: None,
            path: path.display().to_string(),
            temporary: false,
            protected: false,
            directory: false,
        }
    }

    fn job(command: String, outputs: Vec<JobOutput>) -> Job {
        Job {
            id: JobId::new("task", WildcardBinding::new()),
            rule_index: 0,
            inputs: Vec::new(),
            outputs,
            params: BTreeMap::new(),
            command,
            environment: None,
        }
    }

    fn manager() -> (tempfile::TempDir, EnvironmentManager) {
        let dir = tempdir().unwrap();
        let manager = EnvironmentManager::at(dir.path().join("envs"));
        (dir, manager)
    }

    #[test]
    fn runs_a_command_and_verifies_its_output() {
        let (dir, manager) = manager();
        let out = dir.path().join("result.txt");
        let job = job(format!("echo done > {}", out.display()), vec![output(&out)]);

        execute_job(&job, &manager).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap().trim(), "done");
    }

    #[test]
    fn creates_missing_output_directories() {
        let (dir, manager) = manager();
        let out = dir.path().join("nested/deep/result.txt");
        let job = job(format!("echo hi > {}", out.display()), vec![output(&out)]);

        execute_job(&job, &manager).unwrap();
        assert!(out.exists());
    }

    #[test]
    fn nonzero_exit_reports_the_status() {
        let (dir, manager) = manager();
        let out = dir.path().join("never.txt");
        let job = job("exit 3".to_string(), vec![output(&out)]);

        let failure = execute_job(&job, &manager).unwrap_err();
        assert_eq!(failure, JobFailure::Command { status: Some(3) });
    }

    #[test]
    fn clean_exit_without_output_is_a_failure() {
        let (dir, manager) = manager();
        let made = dir.path().join("made.txt");
        let missing = dir.path().join("missing.txt");
        let job = job(
            format!("echo partial > {}", made.display()),
            vec![output(&made), output(&missing)],
        );

        let failure = execute_job(&job, &manager).unwrap_err();
        assert_eq!(
            failure,
            JobFailure::MissingOutput {
                path: missing.display().to_string()
            }
        );
        // The sibling it did create is a partial result and must go.
        assert!(!made.exists());
    }

    #[test]
    fn failed_runs_leave_no_partial_outputs() {
        let (dir, manager) = manager();
        let out = dir.path().join("partial.txt");
        let job = job(
            format!("echo half > {} && exit 1", out.display()),
            vec![output(&out)],
        );

        let failure = execute_job(&job, &manager).unwrap_err();
        assert_eq!(failure, JobFailure::Command { status: Some(1) });
        assert!(!out.exists());
    }

    #[test]
    fn failure_cleanup_spares_protected_outputs() {
        let (dir, manager) = manager();
        let keep = dir.path().join("precious.dat");
        let scratch = dir.path().join("scratch.txt");
        let mut protected = output(&keep);
        protected.protected = true;
        let job = job(
            format!(
                "echo v1 > {} && echo half > {} && exit 1",
                keep.display(),
                scratch.display()
            ),
            vec![protected, output(&scratch)],
        );

        let failure = execute_job(&job, &manager).unwrap_err();
        assert_eq!(failure, JobFailure::Command { status: Some(1) });
        // The unprotected sibling is a partial result and goes; the
        // protected file survives the cleanup.
        assert!(!scratch.exists());
        assert_eq!(fs::read_to_string(&keep).unwrap().trim(), "v1");
    }

    #[test]
    fn environment_failures_mark_the_job_failed() {
        let (dir, manager) = manager();
        let manager = manager.with_micromamba(dir.path().join("missing/micromamba"));
        let out = dir.path().join("result.txt");
        let mut job = job(format!("echo hi > {}", out.display()), vec![output(&out)]);
        job.environment = Some(EnvDescriptor::new("tools", vec!["samtools".to_string()]));

        let failure = execute_job(&job, &manager).unwrap_err();
        assert!(matches!(failure, JobFailure::Environment(_)));
        assert!(!out.exists());
    }

    #[test]
    fn stale_outputs_are_removed_before_running() {
        let (dir, manager) = manager();
        let out = dir.path().join("result.txt");
        fs::write(&out, "stale").unwrap();

        // The command fails without touching the output; the stale file
        // must not survive to pass for a fresh result.
        let job = job("exit 1".to_string(), vec![output(&out)]);
        execute_job(&job, &manager).unwrap_err();
        assert!(!out.exists());
    }

    #[test]
    fn protected_outputs_become_read_only() {
        let (dir, manager) = manager();
        let out = dir.path().join("reference.txt");
        let mut protected = output(&out);
        protected.protected = true;
        let job = job(format!("echo x > {}", out.display()), vec![protected]);

        execute_job(&job, &manager).unwrap();
        assert!(fs::metadata(&out).unwrap().permissions().readonly());
    }

    #[test]
    fn directory_outputs_are_recreated_fresh() {
        let (dir, manager) = manager();
        let out_dir = dir.path().join("bundle");
        fs::create_dir_all(&out_dir).unwrap();
        fs::write(out_dir.join("leftover.txt"), "old").unwrap();

        let mut as_dir = output(&out_dir);
        as_dir.directory = true;
        let job = job(
            format!("echo new > {}/fresh.txt", out_dir.display()),
            vec![as_dir],
        );

        execute_job(&job, &manager).unwrap();
        assert!(out_dir.join("fresh.txt").exists());
        assert!(!out_dir.join("leftover.txt").exists());
    }
}
