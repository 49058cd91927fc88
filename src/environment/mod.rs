//! Environment Management Module
//!
//! Handles integration with micromamba for provisioning the isolated
//! tool environments that rules declare.

pub mod manager;

pub use manager::{env_name, Activation, EnvironmentManager, DEFAULT_ENV_ROOT, MICROMAMBA_PATH};
