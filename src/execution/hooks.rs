//! Lifecycle Hooks
//!
//! Fires the optional `on_start` / `on_success` / `on_failure` shell
//! snippets around a run. Hooks are observers: their exit status is
//! logged but never changes the run result.

use std::process::Command;

use log::{debug, warn};

use crate::rules::Hooks;

/// Runs the pipeline's lifecycle hooks at the right moments.
#[derive(Debug, Clone)]
pub struct HookRunner {
    hooks: Hooks,
}

impl HookRunner {
    pub fn new(hooks: Hooks) -> Self {
        HookRunner { hooks }
    }

    /// Fires `on_start`. Called once, before the first job is scheduled.
    pub fn fire_start(&self) {
        self.fire("on_start", self.hooks.on_start.as_deref());
    }

    /// Fires `on_success` or `on_failure` depending on whether every
    /// requested output was delivered.
    pub fn fire_outcome(&self, success: bool) {
        if success {
            self.fire("on_success", self.hooks.on_success.as_deref());
        } else {
            self.fire("on_failure", self.hooks.on_failure.as_deref());
        }
    }

    fn fire(&self, label: &str, command: Option<&str>) {
        let Some(command) = command else {
            return;
        };

        debug!("Running {} hook", label);
        match Command::new("bash").arg("-c").arg(command).output() {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                warn!(
                    "{} hook exited with status {:?}",
                    label,
                    output.status.code()
                );
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    warn!("{} hook stderr:\n{}", label, stderr);
                }
            }
            Err(e) => warn!("{} hook could not run: {}", label, e),
        }
    }
}
