//! Deadlines and main-loop cadence

pub mod cadence;
pub mod deadline;

pub use cadence::{CadenceController, CallFault, IterationOutcome};
pub use deadline::{ArmedDeadline, DeadlineGuard, DeadlineTimer};
