//! Configuration and shared types
//!
//! Timing contract, its validation, and the closed enums used across the harness.

pub mod timing;
pub mod types;
pub mod validator;
