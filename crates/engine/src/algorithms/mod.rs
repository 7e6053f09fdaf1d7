//! Outlier detectors implemented in-crate.
//!
//! Both follow the standard definitions (isolation-forest path lengths,
//! novelty-mode LOF) and stand in for a library-backed fit/score. Only the
//! adapters in [`crate::models`] call them.

pub mod isolation_forest;
pub mod lof;
