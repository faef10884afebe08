//! Fault classification
//!
//! Derives fault kinds and dispositions as pure functions over what the runner
//! observed.

pub mod classifier;

pub use classifier::{FaultClassifier, Observation};
