//! One execution session: one loaded unit running in one mode
//!
//! [`run_session`] is the entry point the runtime bridge calls. The mode string
//! is validated before anything is loaded.

use crate::capability::CapabilityBundle;
use crate::config::timing::TimingConfig;
use crate::config::types::{ExecutionMode, HarnessError, Result};
use crate::exec::runner::{PhaseRunner, SessionReport};
use crate::loader::{LoadedUnit, ModuleLoader, UnitResolver};
use crate::observability::audit::{self, CorrelationIds};
use crate::timing::deadline::DeadlineTimer;
use chrono::{DateTime, Utc};
use log::info;
use std::time::Instant;
use uuid::Uuid;

/// State of a single session, owned by its runner
#[derive(Debug)]
pub struct ExecutionSession {
    pub(crate) id: Uuid,
    pub(crate) mode: ExecutionMode,
    pub(crate) unit: LoadedUnit,
    pub(crate) started: Instant,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) iterations: u64,
    pub(crate) timer: DeadlineTimer,
}

impl ExecutionSession {
    /// Bind `capabilities` to `mode` and load `identifier` through `resolver`
    pub fn open(
        identifier: &str,
        mode: ExecutionMode,
        resolver: &dyn UnitResolver,
        capabilities: CapabilityBundle,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let correlation = CorrelationIds::new(id, identifier).with_mode(mode);

        let capabilities = capabilities.bind_mode(mode);
        let token = capabilities.cancel_token().clone();
        let unit = match ModuleLoader::new(resolver).load(identifier, capabilities) {
            Ok(unit) => unit,
            Err(err) => {
                if let HarnessError::ModuleLoad { reason, .. } = &err {
                    audit::module_load_failed(correlation, reason);
                }
                return Err(err);
            }
        };
        audit::module_loaded(correlation, unit.diagnostics());

        Ok(Self {
            id,
            mode,
            unit,
            started: Instant::now(),
            started_at: Utc::now(),
            iterations: 0,
            timer: DeadlineTimer::new(token),
        })
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn unit(&self) -> &LoadedUnit {
        &self.unit
    }

    /// Main iterations started so far
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub(crate) fn correlation(&self) -> CorrelationIds {
        CorrelationIds::new(self.id, self.unit.identifier()).with_mode(self.mode)
    }
}

/// Load `identifier` and run it in `mode` under `config`.
///
/// Returns the session report when the mode deadline ended the session, or the
/// first fatal fault. An invalid mode is rejected before the unit is loaded.
pub fn run_session(
    identifier: &str,
    mode: &str,
    resolver: &dyn UnitResolver,
    capabilities: CapabilityBundle,
    config: &TimingConfig,
) -> Result<SessionReport> {
    let mode: ExecutionMode = mode.parse().map_err(|err| {
        audit::invalid_mode(identifier, mode);
        err
    })?;

    info!("Running '{}' in {} mode", identifier, mode);
    let session = ExecutionSession::open(identifier, mode, resolver, capabilities)?;
    PhaseRunner::new(session, config.clone())?.run()
}
