//! Execution Records Module
//!
//! Remembers what each job looked like when it last completed and turns
//! that history into run/skip verdicts.
//!
//! # Structure
//!
//! - [`store`]: Fingerprints, records and their JSON persistence
//! - [`staleness`]: The plan deciding which jobs actually execute

pub mod staleness;
pub mod store;

pub use staleness::{plan, PlanOptions, Reason, Verdict};
pub use store::{ExecutionRecord, Fingerprint, RecordStore};
