//! Execution control
//!
//! Runs a loaded unit through its phases: protected calls on a worker thread,
//! the phase state machine, and the session entry point.

pub mod runner;
pub mod session;
pub mod worker;

pub use runner::{PhaseRunner, SessionReport};
pub use session::{run_session, ExecutionSession};
pub use worker::{CallResult, PhaseWorker};
