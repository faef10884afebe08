//! Observability
//!
//! Structured session audit events.

pub mod audit;
