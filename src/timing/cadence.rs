//! Fixed-interval main loop cadence
//!
//! Each main iteration gets a slot of `interval_budget`. An iteration that
//! finishes early sleeps until its slot ends, so starts are spaced by at least
//! the budget. An iteration that overruns is flagged and the next one is not
//! started by the controller.

use crate::config::timing::OverBudgetPolicy;
use crate::config::types::FaultCause;
use crate::exec::worker::CallResult;
use log::trace;
use std::cmp;
use std::thread;
use std::time::{Duration, Instant};

/// Fault observed during one iteration
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallFault {
    /// Main function failed
    Raised(FaultCause),
    /// The mode deadline interrupted the call
    DeadlineExpired,
}

/// What happened during one main iteration
#[derive(Clone, Debug)]
pub struct IterationOutcome {
    pub index: u64,
    pub started: Instant,
    pub duration: Duration,
    pub over_budget: bool,
    pub fault: Option<CallFault>,
}

impl IterationOutcome {
    pub fn deadline_expired(&self) -> bool {
        matches!(self.fault, Some(CallFault::DeadlineExpired))
    }
}

/// Schedules main iterations at a fixed interval
#[derive(Debug)]
pub struct CadenceController {
    interval_budget: Duration,
    cut_off_overruns: bool,
    iterations: u64,
}

impl CadenceController {
    pub fn new(interval_budget: Duration, policy: OverBudgetPolicy) -> Self {
        Self {
            interval_budget,
            cut_off_overruns: policy == OverBudgetPolicy::Fatal,
            iterations: 0,
        }
    }

    pub fn interval_budget(&self) -> Duration {
        self.interval_budget
    }

    /// Iterations started so far
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Run one iteration through `main_fn`, never past `deadline`.
    ///
    /// `main_fn` receives the instant at which it must stop waiting. When
    /// overruns are fatal that is the end of the budget slot (or the deadline, if
    /// earlier); otherwise the deadline. An interruption at the deadline is
    /// reported as `DeadlineExpired` even if the slot had also run out.
    pub fn run_iteration<F>(&mut self, main_fn: F, deadline: Instant) -> IterationOutcome
    where
        F: FnOnce(Instant) -> CallResult,
    {
        let index = self.iterations;
        self.iterations += 1;

        let started = Instant::now();
        let slot_end = started
            .checked_add(self.interval_budget)
            .map_or(deadline, |end| cmp::min(end, deadline));
        let wait_until = if self.cut_off_overruns { slot_end } else { deadline };

        let result = main_fn(wait_until);
        let duration = started.elapsed();

        let (fault, interrupted) = match result {
            CallResult::Returned => (None, false),
            CallResult::Raised(cause) => (Some(CallFault::Raised(cause)), false),
            CallResult::Interrupted if wait_until >= deadline => {
                (Some(CallFault::DeadlineExpired), true)
            }
            CallResult::Interrupted => (None, true),
        };
        let over_budget = duration > self.interval_budget || (interrupted && fault.is_none());

        trace!(
            "Iteration {} took {:?} (budget {:?})",
            index,
            duration,
            self.interval_budget
        );

        if fault.is_none() && !over_budget {
            thread::sleep(slot_end.saturating_duration_since(Instant::now()));
        }

        IterationOutcome {
            index,
            started,
            duration,
            over_budget,
            fault,
        }
    }
}
