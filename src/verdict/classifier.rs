/// Fault classification
/// Maps what the runner observed to a fault kind and what to do about it
use crate::config::timing::{OverBudgetPolicy, TimingConfig};
use crate::config::types::{Classification, Disposition, FaultCause, FaultKind, Phase};
use crate::timing::cadence::{CallFault, IterationOutcome};
use std::time::Duration;

/// What the runner saw go wrong during a protected call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observation {
    Raised(FaultCause),
    DeadlineExpired,
    OverBudget { elapsed: Duration, budget: Duration },
}

/// Fault classifier - pure function over an observation and the timing config
pub struct FaultClassifier;

impl FaultClassifier {
    /// Classify an observation made during `phase`
    pub fn classify(
        phase: Phase,
        observation: &Observation,
        config: &TimingConfig,
    ) -> Classification {
        match (phase, observation) {
            (_, Observation::Raised(cause)) => Classification {
                kind: FaultKind::GenericFault {
                    cause: cause.clone(),
                },
                disposition: Disposition::Fatal,
            },
            (Phase::Setup, _) => Classification {
                kind: FaultKind::TimeoutAtSetup {
                    timeout: config.setup_timeout(),
                },
                disposition: Disposition::Fatal,
            },
            // Running out of mode time is how every session ends
            (Phase::Main, Observation::DeadlineExpired) => Classification {
                kind: FaultKind::TimeoutAtModeBoundary,
                disposition: Disposition::Expected,
            },
            (Phase::Main, Observation::OverBudget { elapsed, budget }) => Classification {
                kind: FaultKind::OverBudget {
                    elapsed: *elapsed,
                    budget: *budget,
                },
                disposition: match config.over_budget_policy {
                    OverBudgetPolicy::Fatal => Disposition::Fatal,
                    OverBudgetPolicy::Warn => Disposition::Ignorable,
                },
            },
        }
    }

    /// Classify one main iteration. `None` when it was clean.
    ///
    /// Precedence: mode deadline, then a raised fault, then an overrun.
    pub fn classify_iteration(
        outcome: &IterationOutcome,
        config: &TimingConfig,
    ) -> Option<Classification> {
        let observation = match &outcome.fault {
            Some(CallFault::DeadlineExpired) => Observation::DeadlineExpired,
            Some(CallFault::Raised(cause)) => Observation::Raised(cause.clone()),
            None if outcome.over_budget => Observation::OverBudget {
                elapsed: outcome.duration,
                budget: config.interval_budget(),
            },
            None => return None,
        };
        Some(Self::classify(Phase::Main, &observation, config))
    }
}
