//! Capability bundle handed to unit code
//!
//! Units never reach runtime internals directly. Every phase function receives a
//! [`CapabilityBundle`] holding the device proxy, input proxy, and output sink the
//! runtime bridge supplied, plus the session's cancellation token and the set of
//! background actions the unit started.
//!
//! Every capability call checks the cancellation token first. Once a deadline has
//! interrupted the unit, the next device or input access fails with
//! [`UnitError::Cancelled`], which is how an abandoned call unwinds cooperatively.

pub mod memory;

use crate::config::types::{ExecutionMode, UnitError, UnitResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

/// Shared cancellation flag
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has been tripped
    pub fn check(&self) -> UnitResult {
        if self.is_cancelled() {
            Err(UnitError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Value of a device parameter or an input
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ParamValue {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Bool(b) => f64::from(u8::from(b)),
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    pub fn as_bool(self) -> bool {
        match self {
            Self::Bool(b) => b,
            Self::Int(i) => i != 0,
            Self::Float(f) => f != 0.0,
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Read and actuate devices on the robot bus
pub trait DeviceProxy: Send + Sync {
    fn get_value(&self, device: &str, param: &str) -> Result<ParamValue, UnitError>;
    fn set_value(&self, device: &str, param: &str, value: ParamValue) -> UnitResult;
}

/// Read operator inputs (gamepad, keyboard)
pub trait InputProxy: Send + Sync {
    fn get_value(&self, name: &str) -> Result<ParamValue, UnitError>;
}

/// Where unit output goes
pub trait OutputSink: Send + Sync {
    fn print(&self, line: &str);
}

struct ActionState {
    token: CancelToken,
    running: Vec<(String, JoinHandle<()>)>,
}

/// Background actions started by a unit, cancelled together at session end
#[derive(Clone)]
pub struct ActionSet {
    inner: Arc<Mutex<ActionState>>,
}

impl Default for ActionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionSet {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ActionState {
                token: CancelToken::new(),
                running: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, ActionState> {
        // An action panicking while holding the lock does not invalidate the list.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start `action` on its own thread. Refused once the set has been cancelled.
    pub fn spawn<F>(&self, name: &str, action: F) -> UnitResult
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let mut state = self.state();
        state.token.check()?;

        let token = state.token.clone();
        let handle = thread::Builder::new()
            .name(format!("action-{}", name))
            .spawn(move || action(token))
            .map_err(|e| UnitError::raised(format!("could not start action {}: {}", name, e)))?;

        state.running.retain(|(_, handle)| !handle.is_finished());
        state.running.push((name.to_string(), handle));
        Ok(())
    }

    /// Number of actions that have not finished yet
    pub fn running(&self) -> usize {
        self.state()
            .running
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    /// Trip the action token and forget the handles.
    ///
    /// Returns the names of actions that were still running. They observe the token
    /// on their next check; nothing joins them.
    pub fn cancel_all(&self) -> Vec<String> {
        let mut state = self.state();
        state.token.cancel();
        state
            .running
            .drain(..)
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| name)
            .collect()
    }
}

/// Capabilities injected into a loaded unit and passed to every phase call
#[derive(Clone)]
pub struct CapabilityBundle {
    devices: Arc<dyn DeviceProxy>,
    input: Arc<dyn InputProxy>,
    output: Arc<dyn OutputSink>,
    mode: Option<ExecutionMode>,
    cancel: CancelToken,
    actions: ActionSet,
}

impl fmt::Debug for CapabilityBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityBundle")
            .field("mode", &self.mode)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl CapabilityBundle {
    pub fn new(
        devices: Arc<dyn DeviceProxy>,
        input: Arc<dyn InputProxy>,
        output: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            devices,
            input,
            output,
            mode: None,
            cancel: CancelToken::new(),
            actions: ActionSet::new(),
        }
    }

    /// Bind the bundle to a session: mode set, fresh token, fresh action set.
    pub(crate) fn bind_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self.cancel = CancelToken::new();
        self.actions = ActionSet::new();
        self
    }

    /// Mode of the session this bundle is bound to
    pub fn mode(&self) -> Option<ExecutionMode> {
        self.mode
    }

    pub fn get_value(&self, device: &str, param: &str) -> Result<ParamValue, UnitError> {
        self.cancel.check()?;
        self.devices.get_value(device, param)
    }

    pub fn set_value(&self, device: &str, param: &str, value: impl Into<ParamValue>) -> UnitResult {
        self.cancel.check()?;
        self.devices.set_value(device, param, value.into())
    }

    pub fn input(&self, name: &str) -> Result<ParamValue, UnitError> {
        self.cancel.check()?;
        self.input.get_value(name)
    }

    pub fn print(&self, line: &str) {
        self.output.print(line);
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative checkpoint for long-running unit code
    pub fn check_cancelled(&self) -> UnitResult {
        self.cancel.check()
    }

    /// Run `action` in the background until it returns or the session ends
    pub fn run_action<F>(&self, name: &str, action: F) -> UnitResult
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        self.cancel.check()?;
        self.actions.spawn(name, action)
    }

    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn actions(&self) -> &ActionSet {
        &self.actions
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{BufferSink, MemoryDevices, MemoryInputs};
    use super::*;
    use std::time::Duration;

    fn bundle() -> (CapabilityBundle, Arc<BufferSink>) {
        let sink = Arc::new(BufferSink::new());
        let bundle = CapabilityBundle::new(
            Arc::new(MemoryDevices::new().with_device("motor")),
            Arc::new(MemoryInputs::gamepad()),
            sink.clone(),
        )
        .bind_mode(ExecutionMode::Teleop);
        (bundle, sink)
    }

    #[test]
    fn cancel_token_check() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.clone().cancel();
        assert_eq!(token.check(), Err(UnitError::Cancelled));
    }

    #[test]
    fn capability_calls_fail_after_cancel() {
        let (bundle, _) = bundle();
        bundle.set_value("motor", "duty_cycle", 0.5).unwrap();
        assert_eq!(
            bundle.get_value("motor", "duty_cycle").unwrap(),
            ParamValue::Float(0.5)
        );

        bundle.cancel_token().cancel();
        assert_eq!(
            bundle.get_value("motor", "duty_cycle"),
            Err(UnitError::Cancelled)
        );
        assert_eq!(bundle.input("button_a"), Err(UnitError::Cancelled));
        assert!(bundle.cancelled());
    }

    #[test]
    fn bind_mode_resets_session_state() {
        let (bundle, _) = bundle();
        bundle.cancel_token().cancel();

        let rebound = bundle.clone().bind_mode(ExecutionMode::Autonomous);
        assert_eq!(rebound.mode(), Some(ExecutionMode::Autonomous));
        assert!(!rebound.cancelled());
        assert!(bundle.cancelled());
    }

    #[test]
    fn print_goes_to_sink() {
        let (bundle, sink) = bundle();
        bundle.print("hello");
        assert_eq!(sink.lines(), vec!["hello".to_string()]);
    }

    #[test]
    fn cancel_all_reports_running_actions() {
        let (bundle, _) = bundle();
        bundle
            .run_action("spin", |token| {
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();
        assert_eq!(bundle.actions().running(), 1);

        let cancelled = bundle.actions().cancel_all();
        assert_eq!(cancelled, vec!["spin".to_string()]);
        assert_eq!(
            bundle.run_action("late", |_| {}),
            Err(UnitError::Cancelled)
        );
    }
}
