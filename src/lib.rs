//! phasebox: a phase-timed execution harness for untrusted robot code units
//!
//! # Architecture
//!
//! This crate is organized by responsibility:
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Modes, phases, runner states, fault kinds, and errors
//! - [`config::timing`]: Timing contract (setup timeout, interval budget, mode timeouts)
//! - [`config::validator`]: Timing contract validation
//!
//! ## Capabilities ([`capability`])
//! - [`capability`]: Device, input, and output proxies handed to unit code
//! - [`capability::memory`]: In-memory proxies for the CLI bench and tests
//!
//! ## Loading ([`loader`])
//! - [`loader`]: Code units, phase resolution, and stub substitution
//! - [`loader::registry`]: Named unit factories
//!
//! ## Timing ([`timing`])
//! - [`timing::deadline`]: The single armed deadline and its scoped guard
//! - [`timing::cadence`]: Fixed-interval main loop pacing
//!
//! ## Execution Control ([`exec`])
//! - [`exec::worker`]: Protected calls on a dedicated worker thread
//! - [`exec::runner`]: Phase state machine
//! - [`exec::session`]: Session entry point
//!
//! ## Classification ([`verdict`])
//! - [`verdict::classifier`]: Fault kind and disposition as a pure function
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured session audit events
//!
//! # Design Principles
//!
//! 1. **One deadline at a time** - Arming borrows the timer; nesting does not compile
//! 2. **Disarm before reporting** - Every terminal path drops the guard first
//! 3. **Stale completions never land** - An abandoned worker is never asked again
//! 4. **Types prevent errors** - Modes and states are closed enums

// Configuration
pub mod config;

// Capabilities
pub mod capability;

// Loading
pub mod loader;

// Timing
pub mod timing;

// Execution Control
pub mod exec;

// Classification
pub mod verdict;

// Observability
pub mod observability;

// Bundled units
pub mod units;

// CLI entrypoint wiring for the phasebox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use exec::{run_session, SessionReport};
