/// Core types and structures for the phasebox harness
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Runnable execution modes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Autonomous,
    Teleop,
}

impl ExecutionMode {
    pub const ALL: [ExecutionMode; 2] = [ExecutionMode::Autonomous, ExecutionMode::Teleop];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Autonomous => "autonomous",
            Self::Teleop => "teleop",
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = HarnessError;

    /// Exact, case-sensitive match. `"Teleop"` and `" teleop"` are invalid.
    fn from_str(value: &str) -> Result<Self> {
        match value {
            "autonomous" => Ok(Self::Autonomous),
            "teleop" => Ok(Self::Teleop),
            other => Err(HarnessError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of a mode run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Setup,
    Main,
}

impl Phase {
    pub const ALL: [Phase; 2] = [Phase::Setup, Phase::Main];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Main => "main",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry point name a code unit exports for `(mode, phase)`, e.g. `teleop_main`.
pub fn phase_symbol(mode: ExecutionMode, phase: Phase) -> String {
    format!("{}_{}", mode.as_str(), phase.as_str())
}

/// Phase runner states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    SetupRunning,
    SetupDone,
    SetupFailed,
    MainRunning,
    MainDone,
    MainTimeout,
    MainFault,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::SetupFailed | Self::MainDone | Self::MainTimeout | Self::MainFault
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::SetupRunning => "SETUP_RUNNING",
            Self::SetupDone => "SETUP_DONE",
            Self::SetupFailed => "SETUP_FAILED",
            Self::MainRunning => "MAIN_RUNNING",
            Self::MainDone => "MAIN_DONE",
            Self::MainTimeout => "MAIN_TIMEOUT",
            Self::MainFault => "MAIN_FAULT",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a raised fault left the unit's code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOrigin {
    /// Phase function returned an error
    Error,
    /// Phase function panicked
    Panic,
    /// A capability call observed the cancellation token
    Cancelled,
    /// The worker thread went away without reporting
    Worker,
}

/// Original cause of a raised fault
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultCause {
    pub origin: FaultOrigin,
    pub message: String,
}

impl FaultCause {
    pub fn new(origin: FaultOrigin, message: impl Into<String>) -> Self {
        Self {
            origin,
            message: message.into(),
        }
    }
}

impl fmt::Display for FaultCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            FaultOrigin::Error => write!(f, "{}", self.message),
            FaultOrigin::Panic => write!(f, "panicked: {}", self.message),
            FaultOrigin::Cancelled => write!(f, "cancelled: {}", self.message),
            FaultOrigin::Worker => write!(f, "worker lost: {}", self.message),
        }
    }
}

/// Classified fault kinds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultKind {
    TimeoutAtSetup { timeout: Duration },
    TimeoutAtModeBoundary,
    OverBudget { elapsed: Duration, budget: Duration },
    GenericFault { cause: FaultCause },
    InvalidMode { requested: String },
    ModuleLoadError { reason: String },
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeoutAtSetup { timeout } => {
                write!(f, "setup did not return within {:?}", timeout)
            }
            Self::TimeoutAtModeBoundary => write!(f, "mode deadline reached"),
            Self::OverBudget { elapsed, budget } => write!(
                f,
                "iteration took {:?}, longer than the {:?} interval budget, indicating the code is stuck in a loop",
                elapsed, budget
            ),
            Self::GenericFault { cause } => write!(f, "{}", cause),
            Self::InvalidMode { requested } => write!(f, "invalid mode '{}'", requested),
            Self::ModuleLoadError { reason } => write!(f, "module load failed: {}", reason),
        }
    }
}

/// What the harness does with a classified fault
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Abort the session and surface the fault to the caller
    Fatal,
    /// Log and keep going
    Ignorable,
    /// Normal end of the session
    Expected,
}

/// A fault kind paired with its disposition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: FaultKind,
    pub disposition: Disposition,
}

/// A fatal fault together with the session context it happened in
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionFault {
    pub mode: ExecutionMode,
    pub phase: Phase,
    pub state: RunState,
    pub elapsed: Duration,
    pub iterations: u64,
    pub kind: FaultKind,
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error in {}_{} ({}) after {:.3}s and {} main iteration(s): {}",
            self.mode,
            self.phase,
            self.state,
            self.elapsed.as_secs_f64(),
            self.iterations,
            self.kind
        )
    }
}

/// Error types for the harness
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Only modes are autonomous and teleop, got '{0}'")]
    InvalidMode(String),

    #[error("Could not load code unit '{identifier}': {reason}")]
    ModuleLoad { identifier: String, reason: String },

    #[error("{0}")]
    Fault(SessionFault),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Fault kind carried by this error, if it is a harness fault
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            Self::InvalidMode(requested) => Some(FaultKind::InvalidMode {
                requested: requested.clone(),
            }),
            Self::ModuleLoad { reason, .. } => Some(FaultKind::ModuleLoadError {
                reason: reason.clone(),
            }),
            Self::Fault(fault) => Some(fault.kind.clone()),
            _ => None,
        }
    }

    /// Terminal runner state, for faults raised by the runner
    pub fn run_state(&self) -> Option<RunState> {
        match self {
            Self::Fault(fault) => Some(fault.state),
            _ => None,
        }
    }
}

impl From<&HarnessError> for i32 {
    fn from(err: &HarnessError) -> i32 {
        match err {
            HarnessError::InvalidMode(_) => 2,      // Usage error
            HarnessError::ModuleLoad { .. } => 3,   // Nothing ran
            HarnessError::Fault(fault) => match fault.state {
                RunState::SetupFailed => 4,
                RunState::MainTimeout => 6,
                _ => 5,
            },
            HarnessError::Config(_) => 78,          // EX_CONFIG
            HarnessError::Io(_) => 74,              // EX_IOERR
            HarnessError::Worker(_) | HarnessError::Json(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors raised from inside unit code and the capabilities it calls
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    #[error("{0}")]
    Raised(String),

    #[error("deadline expired")]
    Cancelled,

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("unknown input '{0}'")]
    UnknownInput(String),
}

impl UnitError {
    pub fn raised(message: impl Into<String>) -> Self {
        Self::Raised(message.into())
    }
}

/// Result of one phase function call
pub type UnitResult = std::result::Result<(), UnitError>;
