//! Monitoring Module
//!
//! Run observability: per-job timing and process resource usage.
//!
//! # Components
//!
//! - [`ResourceMonitor`]: CPU and memory sampling for the run report
//! - [`Timeline`]: job start/end timing for durations and Gantt charts

pub mod resource;
pub mod timeline;

pub use resource::{ResourceMonitor, UsageSample};
pub use timeline::{JobEvent, Timeline};
