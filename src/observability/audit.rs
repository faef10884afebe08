/// Session audit trail for phasebox
/// Structured, append-only JSON lines describing what happened in each session
///
/// Every event carries correlation ids (session id, unit, mode) so that a
/// session's events can be stitched back together from a shared log.
use crate::config::types::{
    ExecutionMode, FaultKind, HarnessError, Phase, Result, RunState, SessionFault,
};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use uuid::Uuid;

/// Audit event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditSeverity {
    High,
    Medium,
    Low,
}

/// Types of session events we track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEventType {
    // Lifecycle events
    SessionStart,
    SessionEnd,

    // Loading
    InvalidMode,
    ModuleLoaded,
    ModuleLoadFailed,
    PhaseStubbed,

    // Phase events
    SetupComplete,
    DeadlineExpired,
    BudgetOverrun,
    PhaseFault,

    // Cleanup
    ActionsCancelled,
}

impl SessionEventType {
    /// Get the default severity for this event type
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            SessionEventType::SessionStart => AuditSeverity::Low,
            SessionEventType::SessionEnd => AuditSeverity::Low,
            SessionEventType::ModuleLoaded => AuditSeverity::Low,
            SessionEventType::SetupComplete => AuditSeverity::Low,
            SessionEventType::DeadlineExpired => AuditSeverity::Low,

            SessionEventType::PhaseStubbed => AuditSeverity::Medium,
            SessionEventType::BudgetOverrun => AuditSeverity::Medium,
            SessionEventType::ActionsCancelled => AuditSeverity::Medium,
            SessionEventType::InvalidMode => AuditSeverity::Medium,

            SessionEventType::ModuleLoadFailed => AuditSeverity::High,
            SessionEventType::PhaseFault => AuditSeverity::High,
        }
    }
}

/// Correlation identifiers for event tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationIds {
    pub session_id: Uuid,
    pub unit: String,
    pub mode: Option<ExecutionMode>,
}

impl CorrelationIds {
    pub fn new(session_id: Uuid, unit: &str) -> Self {
        Self {
            session_id,
            unit: unit.to_string(),
            mode: None,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Individual session event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub event_type: SessionEventType,
    pub severity: AuditSeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub correlation: Option<CorrelationIds>,
    pub phase: Option<Phase>,
    pub state: Option<RunState>,
    pub fault: Option<FaultKind>,
}

impl SessionEvent {
    /// Create a new session event with default severity
    pub fn new(event_type: SessionEventType, details: String) -> Self {
        let severity = event_type.default_severity();
        Self {
            event_type,
            severity,
            timestamp: Utc::now(),
            details,
            correlation: None,
            phase: None,
            state: None,
            fault: None,
        }
    }

    pub fn with_correlation(mut self, correlation: CorrelationIds) -> Self {
        self.correlation = Some(correlation);
        self
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_state(mut self, state: RunState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_fault(mut self, fault: FaultKind) -> Self {
        self.fault = Some(fault);
        self
    }

    /// JSON line written to the audit file
    pub fn to_json(&self) -> serde_json::Value {
        let mut entry = serde_json::json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "event_type": self.event_type,
            "severity": self.severity,
            "details": self.details,
            "process_id": std::process::id(),
        });

        if let Some(correlation) = &self.correlation {
            entry["correlation"] = serde_json::json!({
                "session_id": correlation.session_id.to_string(),
                "unit": correlation.unit,
                "mode": correlation.mode,
            });
        }
        if let Some(phase) = self.phase {
            entry["phase"] = serde_json::json!(phase);
        }
        if let Some(state) = self.state {
            entry["state"] = serde_json::json!(state.as_str());
        }
        if let Some(fault) = &self.fault {
            entry["fault"] = serde_json::to_value(fault).unwrap_or(serde_json::Value::Null);
        }
        entry
    }
}

/// Audit logger writing JSON lines to a file
pub struct AuditLogger {
    audit_file: Arc<Mutex<File>>,
    audit_path: PathBuf,
}

impl AuditLogger {
    pub fn new(audit_path: Option<PathBuf>) -> Result<Self> {
        let audit_path = audit_path.unwrap_or_else(default_audit_path);

        if let Some(parent) = audit_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HarnessError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }

        let audit_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&audit_path)
            .map_err(|e| HarnessError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            audit_file: Arc::new(Mutex::new(audit_file)),
            audit_path,
        })
    }

    pub fn log_session_event(&self, event: &SessionEvent) {
        log_to_standard_logger(event);

        if let Ok(mut file) = self.audit_file.lock() {
            if let Err(e) = writeln!(file, "{}", event.to_json()) {
                error!("Failed to write to audit log: {}", e);
            }
            if let Err(e) = file.flush() {
                error!("Failed to flush audit log: {}", e);
            }
        } else {
            error!("Failed to acquire lock on audit file");
        }
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }
}

fn default_audit_path() -> PathBuf {
    std::env::temp_dir().join("phasebox").join("session-audit.log")
}

fn log_to_standard_logger(event: &SessionEvent) {
    match event.severity {
        AuditSeverity::High => {
            error!(target: "audit", "{:?} - {}", event.event_type, event.details);
        }
        AuditSeverity::Medium => {
            warn!(target: "audit", "{:?} - {}", event.event_type, event.details);
        }
        AuditSeverity::Low => {
            info!(target: "audit", "{:?} - {}", event.event_type, event.details);
        }
    }
}

/// Global audit logger instance
static AUDIT_LOGGER: OnceLock<AuditLogger> = OnceLock::new();

/// Initialize the global audit logger.
///
/// An explicit path that cannot be opened is an error. Without one, the default
/// and a per-user fallback are tried before degrading to log-only events.
pub fn init_audit_logger(audit_path: Option<PathBuf>) -> Result<()> {
    let explicit = audit_path.is_some();
    let mut candidates = vec![audit_path.unwrap_or_else(default_audit_path)];
    if !explicit {
        // SAFETY: geteuid has no preconditions and cannot fail.
        let euid = unsafe { libc::geteuid() };
        candidates.push(std::env::temp_dir().join(format!("phasebox-audit-{}.log", euid)));
    }

    let mut last_err = None;
    for path in candidates {
        match AuditLogger::new(Some(path.clone())) {
            Ok(logger) => {
                if AUDIT_LOGGER.set(logger).is_err() {
                    warn!("Audit logger already initialized");
                } else {
                    info!("Audit log at {}", path.display());
                }
                return Ok(());
            }
            Err(e) => {
                warn!("Failed to open audit log at {}: {}", path.display(), e);
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(e) if explicit => Err(e),
        _ => {
            warn!("Audit log unavailable, continuing with log-only session events");
            Ok(())
        }
    }
}

/// Log a session event using the global logger
pub fn log_session_event(event: SessionEvent) {
    match AUDIT_LOGGER.get() {
        Some(logger) => logger.log_session_event(&event),
        None => log_to_standard_logger(&event),
    }
}

/// Log an invalid mode rejection. Nothing was loaded.
pub fn invalid_mode(unit: &str, requested: &str) {
    let event = SessionEvent::new(
        SessionEventType::InvalidMode,
        format!("Rejected mode '{}' for unit '{}'", requested, unit),
    )
    .with_fault(FaultKind::InvalidMode {
        requested: requested.to_string(),
    });
    log_session_event(event);
}

/// Log a failed module load
pub fn module_load_failed(correlation: CorrelationIds, reason: &str) {
    let event = SessionEvent::new(
        SessionEventType::ModuleLoadFailed,
        format!("Could not load '{}': {}", correlation.unit, reason),
    )
    .with_correlation(correlation)
    .with_fault(FaultKind::ModuleLoadError {
        reason: reason.to_string(),
    });
    log_session_event(event);
}

/// Log a successful module load and every stubbed entry point
pub fn module_loaded(correlation: CorrelationIds, diagnostics: &[String]) {
    log_session_event(
        SessionEvent::new(
            SessionEventType::ModuleLoaded,
            format!(
                "Loaded '{}' with {} stubbed entry point(s)",
                correlation.unit,
                diagnostics.len()
            ),
        )
        .with_correlation(correlation.clone()),
    );
    for diagnostic in diagnostics {
        log_session_event(
            SessionEvent::new(SessionEventType::PhaseStubbed, diagnostic.clone())
                .with_correlation(correlation.clone()),
        );
    }
}

pub fn session_start(correlation: CorrelationIds, mode_timeout: Duration) {
    let event = SessionEvent::new(
        SessionEventType::SessionStart,
        format!(
            "Session {} started for {:?}",
            correlation.session_id, mode_timeout
        ),
    )
    .with_correlation(correlation)
    .with_state(RunState::Init);
    log_session_event(event);
}

pub fn setup_complete(correlation: CorrelationIds, elapsed: Duration) {
    let event = SessionEvent::new(
        SessionEventType::SetupComplete,
        format!("Setup returned after {:?}", elapsed),
    )
    .with_correlation(correlation)
    .with_phase(Phase::Setup)
    .with_state(RunState::SetupDone);
    log_session_event(event);
}

pub fn deadline_expired(correlation: CorrelationIds, iterations: u64) {
    let event = SessionEvent::new(
        SessionEventType::DeadlineExpired,
        format!("Mode deadline reached after {} main iteration(s)", iterations),
    )
    .with_correlation(correlation)
    .with_phase(Phase::Main)
    .with_state(RunState::MainDone)
    .with_fault(FaultKind::TimeoutAtModeBoundary);
    log_session_event(event);
}

/// Log a tolerated interval overrun
pub fn budget_overrun(correlation: CorrelationIds, index: u64, kind: FaultKind) {
    let event = SessionEvent::new(
        SessionEventType::BudgetOverrun,
        format!("Main iteration {} overran: {}", index, kind),
    )
    .with_correlation(correlation)
    .with_phase(Phase::Main)
    .with_fault(kind);
    log_session_event(event);
}

/// Log a fatal session fault
pub fn phase_fault(correlation: CorrelationIds, fault: &SessionFault) {
    let event = SessionEvent::new(SessionEventType::PhaseFault, fault.to_string())
        .with_correlation(correlation)
        .with_phase(fault.phase)
        .with_state(fault.state)
        .with_fault(fault.kind.clone());
    log_session_event(event);
}

pub fn actions_cancelled(correlation: CorrelationIds, names: &[String]) {
    if names.is_empty() {
        return;
    }
    let event = SessionEvent::new(
        SessionEventType::ActionsCancelled,
        format!("Cancelled running action(s): {}", names.join(", ")),
    )
    .with_correlation(correlation);
    log_session_event(event);
}

pub fn session_end(correlation: CorrelationIds, state: RunState, elapsed: Duration) {
    let event = SessionEvent::new(
        SessionEventType::SessionEnd,
        format!("Session ended in {} after {:?}", state, elapsed),
    )
    .with_correlation(correlation)
    .with_state(state);
    log_session_event(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correlation() -> CorrelationIds {
        CorrelationIds::new(Uuid::new_v4(), "heartbeat").with_mode(ExecutionMode::Teleop)
    }

    #[test]
    fn test_event_type_severity() {
        assert_eq!(
            SessionEventType::SessionStart.default_severity(),
            AuditSeverity::Low
        );
        assert_eq!(
            SessionEventType::PhaseFault.default_severity(),
            AuditSeverity::High
        );
        assert_eq!(
            SessionEventType::BudgetOverrun.default_severity(),
            AuditSeverity::Medium
        );
    }

    #[test]
    fn test_event_json_carries_correlation() {
        let correlation = correlation();
        let session_id = correlation.session_id.to_string();
        let event = SessionEvent::new(SessionEventType::SessionEnd, "done".to_string())
            .with_correlation(correlation)
            .with_state(RunState::MainDone);

        let json = event.to_json();
        assert_eq!(json["correlation"]["session_id"], session_id.as_str());
        assert_eq!(json["correlation"]["mode"], "teleop");
        assert_eq!(json["state"], "MAIN_DONE");
        assert!(json["timestamp"].as_str().is_some_and(|t| t.contains('T')));
    }

    #[test]
    fn test_event_json_carries_fault() {
        let event = SessionEvent::new(SessionEventType::DeadlineExpired, "x".to_string())
            .with_fault(FaultKind::TimeoutAtModeBoundary);
        assert_eq!(event.to_json()["fault"]["kind"], "timeout_at_mode_boundary");
    }

    #[test]
    fn test_audit_logger_appends_lines() {
        let path =
            std::env::temp_dir().join(format!("phasebox-audit-test-{}.log", Uuid::new_v4()));
        let logger = AuditLogger::new(Some(path.clone())).unwrap();
        logger.log_session_event(&SessionEvent::new(
            SessionEventType::SessionStart,
            "one".to_string(),
        ));
        logger.log_session_event(&SessionEvent::new(
            SessionEventType::SessionEnd,
            "two".to_string(),
        ));

        let contents = std::fs::read_to_string(logger.audit_path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event_type"], "SessionStart");

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_session_event_serialization() {
        let event = SessionEvent::new(SessionEventType::ModuleLoaded, "ok".to_string())
            .with_correlation(correlation());
        assert!(serde_json::to_string(&event).is_ok());
    }
}
