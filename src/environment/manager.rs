//! Micromamba Environment Management
//!
//! Provisions isolated tool environments for rules that declare one and
//! builds the process invocations that run inside them.
//!
//! # Binary Resolution Priority
//!
//! The micromamba binary is resolved in the following order:
//! 1. `RULEFLOW_MICROMAMBA` environment variable
//! 2. System PATH
//! 3. Conventional user install: `~/.local/bin/micromamba`

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use log::{debug, error, info, warn};
use once_cell::sync::Lazy;

use crate::rules::EnvDescriptor;

/// Lazily-resolved path to the micromamba binary.
pub static MICROMAMBA_PATH: Lazy<PathBuf> = Lazy::new(|| {
    // Priority 1: explicit override
    if let Ok(path) = std::env::var("RULEFLOW_MICROMAMBA") {
        let path = PathBuf::from(path);
        info!("Using micromamba from RULEFLOW_MICROMAMBA: {}", path.display());
        return path;
    }

    // Priority 2: system PATH
    if let Ok(output) = Command::new("which").arg("micromamba").output() {
        if output.status.success() {
            let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path_str.is_empty() {
                let system_path = PathBuf::from(path_str);
                info!("Using system micromamba: {}", system_path.display());
                return system_path;
            }
        }
    }

    // Priority 3: conventional user install
    let fallback = home_dir().join(".local").join("bin").join("micromamba");
    if !fallback.exists() {
        warn!("Micromamba binary not found");
        warn!("  Set RULEFLOW_MICROMAMBA or install from https://micro.mamba.pm/");
    }
    fallback
});

/// Default root prefix under which managed environments live.
pub static DEFAULT_ENV_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(root) = std::env::var("RULEFLOW_ENV_ROOT") {
        return PathBuf::from(root);
    }
    home_dir().join(".ruleflow").join("envs")
});

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// How a job script should be launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// Plain `bash` in the ambient environment.
    Plain,
    /// `micromamba run` inside the named managed environment.
    Environment(String),
}

/// The stable name of the environment a descriptor provisions.
///
/// The name carries a digest of the full descriptor, so changing the
/// package list or channels yields a fresh environment instead of
/// silently reusing a stale one.
pub fn env_name(descriptor: &EnvDescriptor) -> String {
    let digest = blake3::hash(descriptor.canonical().as_bytes());
    let hex = digest.to_hex();
    format!("{}-{}", sanitize(&descriptor.name), &hex[..12])
}

fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    out.truncate(32);
    if out.is_empty() {
        out.push_str("env");
    }
    out
}

#[derive(Debug, Default)]
struct EnvState {
    /// Descriptor digest -> environment name, persisted as env_map.json.
    map: HashMap<String, String>,
    /// Environments confirmed to exist during this process.
    verified: HashSet<String>,
}

/// Manages the lifecycle of micromamba environments under one root
/// prefix. Safe to share across worker threads; creation is serialized
/// so concurrent jobs wanting the same environment build it once.
#[derive(Debug)]
pub struct EnvironmentManager {
    micromamba: PathBuf,
    root: PathBuf,
    map_path: PathBuf,
    state: Mutex<EnvState>,
}

impl EnvironmentManager {
    /// Manager rooted at the default prefix.
    pub fn new() -> Self {
        Self::at(DEFAULT_ENV_ROOT.clone())
    }

    /// Manager with an explicit root prefix.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let map_path = root.join("env_map.json");
        let map = load_map(&map_path);
        EnvironmentManager {
            micromamba: MICROMAMBA_PATH.clone(),
            root,
            map_path,
            state: Mutex::new(EnvState {
                map,
                verified: HashSet::new(),
            }),
        }
    }

    /// Overrides the resolved micromamba binary.
    pub fn with_micromamba(mut self, binary: impl Into<PathBuf>) -> Self {
        self.micromamba = binary.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Makes sure the environment for `descriptor` exists, creating it
    /// if needed, and returns its name.
    pub fn ensure(&self, descriptor: &EnvDescriptor) -> Result<String, Box<dyn Error>> {
        let name = env_name(descriptor);
        let digest = blake3::hash(descriptor.canonical().as_bytes())
            .to_hex()
            .to_string();

        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.verified.contains(&name) {
            return Ok(name);
        }

        if self.env_exists(&name)? {
            debug!("Environment '{}' already exists", name);
        } else {
            self.create_env(&name, descriptor)?;
        }

        if state.map.insert(digest, name.clone()).as_ref() != Some(&name) {
            if let Err(e) = self.save_map(&state.map) {
                warn!("Failed to save environment map: {}", e);
            }
        }
        state.verified.insert(name.clone());
        Ok(name)
    }

    /// Builds the process invocation for a job script.
    pub fn command_for(&self, activation: &Activation, script: &Path) -> Command {
        match activation {
            Activation::Plain => {
                let mut cmd = Command::new("bash");
                cmd.arg(script);
                cmd
            }
            Activation::Environment(name) => {
                let mut cmd = self.micromamba();
                cmd.arg("run").arg("-n").arg(name).arg("bash").arg(script);
                cmd
            }
        }
    }

    /// A Command for the micromamba binary with the root prefix set.
    fn micromamba(&self) -> Command {
        let mut cmd = Command::new(&self.micromamba);
        cmd.env("MAMBA_ROOT_PREFIX", &self.root);
        cmd
    }

    fn env_exists(&self, name: &str) -> Result<bool, Box<dyn Error>> {
        let output = self.micromamba().arg("env").arg("list").output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Failed to list environments: {}", stderr);
            return Err("failed to list micromamba environments".into());
        }

        // Depending on the version, `env list` prints names, prefixes or
        // both; accept either form.
        let expected = self.root.join("envs").join(name);
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().any(|line| {
            line.split_whitespace()
                .any(|tok| tok == name || Path::new(tok) == expected.as_path())
        }))
    }

    fn create_env(&self, name: &str, descriptor: &EnvDescriptor) -> Result<(), Box<dyn Error>> {
        info!(
            "Creating environment '{}' with packages: {:?}",
            name, descriptor.packages
        );

        let mut cmd = self.micromamba();
        cmd.arg("create").arg("-y").arg("-n").arg(name);
        for channel in &descriptor.channels {
            cmd.arg("-c").arg(channel);
        }
        cmd.args(&descriptor.packages);

        let output = cmd.output()?;
        if output.status.success() {
            info!("Successfully created environment '{}'", name);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Failed to create environment '{}': {}", name, stderr);
            Err(format!("failed to create environment '{name}'").into())
        }
    }

    fn save_map(&self, map: &HashMap<String, String>) -> Result<(), Box<dyn Error>> {
        if let Some(parent) = self.map_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(map)?;
        fs::write(&self.map_path, json)?;
        Ok(())
    }
}

impl Default for EnvironmentManager {
    fn default() -> Self {
        Self::new()
    }
}

fn load_map(path: &Path) -> HashMap<String, String> {
    if path.exists() {
        let content = fs::read_to_string(path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        HashMap::new()
    }
}
