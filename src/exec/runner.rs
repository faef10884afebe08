//! Phase runner state machine
//!
//! ```text
//! INIT -> SETUP_RUNNING -> SETUP_DONE -> MAIN_RUNNING -> MAIN_DONE
//!               |                            |-> MAIN_TIMEOUT
//!               +-> SETUP_FAILED             +-> MAIN_FAULT
//! ```
//!
//! Setup runs once under `setup_timeout`. Main then loops under a single mode
//! deadline of `mode_total_timeout - setup_elapsed`, paced by the cadence
//! controller. Reaching the mode deadline is the normal end of a session; every
//! other terminal state surfaces a [`SessionFault`]. On every terminal path the
//! deadline is disarmed before the outcome is reported and the unit's background
//! actions are cancelled.

use crate::config::timing::TimingConfig;
use crate::config::types::{
    Disposition, ExecutionMode, FaultKind, HarnessError, Phase, Result, RunState, SessionFault,
};
use crate::exec::session::ExecutionSession;
use crate::exec::worker::{CallResult, PhaseWorker};
use crate::loader::ModuleLoader;
use crate::observability::audit::{self, CorrelationIds};
use crate::timing::cadence::CadenceController;
use crate::verdict::classifier::{FaultClassifier, Observation};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Summary of a session that ran to its mode deadline
#[derive(Clone, Debug, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub unit: String,
    pub mode: ExecutionMode,
    pub state: RunState,
    pub history: Vec<RunState>,
    pub started_at: DateTime<Utc>,
    pub setup_elapsed: Duration,
    pub elapsed: Duration,
    pub iterations: u64,
    pub budget_overruns: u64,
    pub stubbed_symbols: Vec<String>,
    pub diagnostics: Vec<String>,
    pub cancelled_actions: Vec<String>,
}

#[derive(Debug)]
struct StateTrack {
    current: RunState,
    history: Vec<RunState>,
}

impl StateTrack {
    fn new() -> Self {
        Self {
            current: RunState::Init,
            history: vec![RunState::Init],
        }
    }

    fn enter(&mut self, next: RunState) {
        debug!("{} -> {}", self.current, next);
        self.current = next;
        self.history.push(next);
    }
}

/// Drives one session through setup and the main loop
pub struct PhaseRunner {
    session: ExecutionSession,
    config: TimingConfig,
    worker: PhaseWorker,
    states: StateTrack,
    budget_overruns: u64,
}

impl PhaseRunner {
    pub fn new(session: ExecutionSession, config: TimingConfig) -> Result<Self> {
        let worker = PhaseWorker::spawn(session.unit.capabilities().clone())?;
        Ok(Self {
            session,
            config,
            worker,
            states: StateTrack::new(),
            budget_overruns: 0,
        })
    }

    /// Run setup, then main until the mode deadline or the first fatal fault
    pub fn run(mut self) -> Result<SessionReport> {
        self.session.started = Instant::now();
        let mode = self.session.mode;
        audit::session_start(self.session.correlation(), self.config.mode_total_timeout(mode));

        let setup_elapsed = match self.run_setup() {
            Ok(elapsed) => elapsed,
            Err(fault) => return Err(self.abort(fault)),
        };
        match self.run_main(setup_elapsed) {
            Ok(()) => Ok(self.finish(setup_elapsed)),
            Err(fault) => Err(self.abort(fault)),
        }
    }

    fn run_setup(&mut self) -> std::result::Result<Duration, SessionFault> {
        let mode = self.session.mode;
        let setup = ModuleLoader::resolve_phase(&self.session.unit, mode, Phase::Setup);

        self.states.enter(RunState::SetupRunning);
        let started = Instant::now();
        let result = {
            let guard = self.session.timer.arm(self.config.setup_timeout());
            let result = self.worker.call(&setup, guard.expires_at());
            if result == CallResult::Interrupted {
                guard.fire();
            }
            result
        };
        let elapsed = started.elapsed();

        let observation = match result {
            CallResult::Returned => {
                self.states.enter(RunState::SetupDone);
                audit::setup_complete(self.session.correlation(), elapsed);
                return Ok(elapsed);
            }
            CallResult::Raised(cause) => Observation::Raised(cause),
            CallResult::Interrupted => Observation::DeadlineExpired,
        };
        let classification = FaultClassifier::classify(Phase::Setup, &observation, &self.config);
        self.states.enter(RunState::SetupFailed);
        Err(self.fault(Phase::Setup, classification.kind))
    }

    fn run_main(&mut self, setup_elapsed: Duration) -> std::result::Result<(), SessionFault> {
        let mode = self.session.mode;
        let main = ModuleLoader::resolve_phase(&self.session.unit, mode, Phase::Main);
        let remaining = self
            .config
            .mode_total_timeout(mode)
            .saturating_sub(setup_elapsed);
        let correlation = self.session.correlation();
        let mut cadence =
            CadenceController::new(self.config.interval_budget(), self.config.over_budget_policy);

        self.states.enter(RunState::MainRunning);
        let guard = self.session.timer.arm(remaining);
        let end = loop {
            if guard.expired() {
                break None;
            }

            let worker = &mut self.worker;
            let outcome = cadence.run_iteration(
                |wait_until| worker.call(&main, wait_until),
                guard.expires_at(),
            );
            self.session.iterations += 1;

            let Some(classification) = FaultClassifier::classify_iteration(&outcome, &self.config)
            else {
                continue;
            };
            match classification.disposition {
                Disposition::Expected => break None,
                Disposition::Fatal => break Some(classification.kind),
                Disposition::Ignorable => {
                    warn!(
                        "{}_main iteration {}: {}",
                        mode, outcome.index, classification.kind
                    );
                    self.budget_overruns += 1;
                    audit::budget_overrun(correlation.clone(), outcome.index, classification.kind);
                }
            }
        };
        if self.worker.is_lost() {
            guard.fire();
        }
        drop(guard);

        match end {
            None => {
                self.states.enter(RunState::MainDone);
                info!(
                    "{} mode deadline reached after {} main iteration(s)",
                    mode, self.session.iterations
                );
                audit::deadline_expired(correlation, self.session.iterations);
                Ok(())
            }
            Some(kind) => {
                let state = match kind {
                    FaultKind::OverBudget { .. } => RunState::MainTimeout,
                    _ => RunState::MainFault,
                };
                self.states.enter(state);
                Err(self.fault(Phase::Main, kind))
            }
        }
    }

    fn fault(&self, phase: Phase, kind: FaultKind) -> SessionFault {
        SessionFault {
            mode: self.session.mode,
            phase,
            state: self.states.current,
            elapsed: self.session.started.elapsed(),
            iterations: self.session.iterations,
            kind,
        }
    }

    fn cancel_actions(&self, correlation: &CorrelationIds) -> Vec<String> {
        let cancelled = self.session.unit.capabilities().actions().cancel_all();
        audit::actions_cancelled(correlation.clone(), &cancelled);
        cancelled
    }

    fn abort(&mut self, fault: SessionFault) -> HarnessError {
        error!("{}", fault);
        let correlation = self.session.correlation();
        audit::phase_fault(correlation.clone(), &fault);
        self.cancel_actions(&correlation);
        audit::session_end(correlation, fault.state, self.session.started.elapsed());
        HarnessError::Fault(fault)
    }

    fn finish(&mut self, setup_elapsed: Duration) -> SessionReport {
        let correlation = self.session.correlation();
        let cancelled_actions = self.cancel_actions(&correlation);
        let elapsed = self.session.started.elapsed();
        audit::session_end(correlation, self.states.current, elapsed);

        SessionReport {
            session_id: self.session.id,
            unit: self.session.unit.identifier().to_string(),
            mode: self.session.mode,
            state: self.states.current,
            history: self.states.history.clone(),
            started_at: self.session.started_at,
            setup_elapsed,
            elapsed,
            iterations: self.session.iterations,
            budget_overruns: self.budget_overruns,
            stubbed_symbols: self.session.unit.stubbed_symbols(),
            diagnostics: self.session.unit.diagnostics().to_vec(),
            cancelled_actions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_track_records_history() {
        let mut states = StateTrack::new();
        states.enter(RunState::SetupRunning);
        states.enter(RunState::SetupFailed);
        assert_eq!(states.current, RunState::SetupFailed);
        assert_eq!(
            states.history,
            vec![RunState::Init, RunState::SetupRunning, RunState::SetupFailed]
        );
        assert!(states.current.is_terminal());
    }
}
