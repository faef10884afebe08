/// Timing contract loading from a JSON config file
use crate::config::types::{ExecutionMode, HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Maximum time allowed for a setup function
pub const DEFAULT_SETUP_TIMEOUT_MS: u64 = 2_000;
/// Interval budget of a single main iteration
pub const DEFAULT_INTERVAL_BUDGET_MS: u64 = 10;
pub const DEFAULT_AUTONOMOUS_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_TELEOP_TIMEOUT_MS: u64 = 120_000;

/// What happens when one main iteration outlives the interval budget
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverBudgetPolicy {
    /// Abort the session with `OverBudget`
    #[default]
    Fatal,
    /// Log a warning and continue at the next cadence slot
    Warn,
}

/// Total duration of each mode, setup included
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeTimeouts {
    pub autonomous_ms: u64,
    pub teleop_ms: u64,
}

impl Default for ModeTimeouts {
    fn default() -> Self {
        Self {
            autonomous_ms: DEFAULT_AUTONOMOUS_TIMEOUT_MS,
            teleop_ms: DEFAULT_TELEOP_TIMEOUT_MS,
        }
    }
}

/// Fixed timing constants consumed by the harness
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub setup_timeout_ms: u64,
    pub interval_budget_ms: u64,
    pub mode_timeouts: ModeTimeouts,
    pub over_budget_policy: OverBudgetPolicy,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            setup_timeout_ms: DEFAULT_SETUP_TIMEOUT_MS,
            interval_budget_ms: DEFAULT_INTERVAL_BUDGET_MS,
            mode_timeouts: ModeTimeouts::default(),
            over_budget_policy: OverBudgetPolicy::default(),
        }
    }
}

impl TimingConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw).map_err(|e| {
            HarnessError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn interval_budget(&self) -> Duration {
        Duration::from_millis(self.interval_budget_ms)
    }

    pub fn mode_total_timeout(&self, mode: ExecutionMode) -> Duration {
        match mode {
            ExecutionMode::Autonomous => Duration::from_millis(self.mode_timeouts.autonomous_ms),
            ExecutionMode::Teleop => Duration::from_millis(self.mode_timeouts.teleop_ms),
        }
    }

    pub fn with_setup_timeout_ms(mut self, ms: u64) -> Self {
        self.setup_timeout_ms = ms;
        self
    }

    pub fn with_interval_budget_ms(mut self, ms: u64) -> Self {
        self.interval_budget_ms = ms;
        self
    }

    pub fn with_mode_timeout_ms(mut self, mode: ExecutionMode, ms: u64) -> Self {
        match mode {
            ExecutionMode::Autonomous => self.mode_timeouts.autonomous_ms = ms,
            ExecutionMode::Teleop => self.mode_timeouts.teleop_ms = ms,
        }
        self
    }

    pub fn with_over_budget_policy(mut self, policy: OverBudgetPolicy) -> Self {
        self.over_budget_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_runtime_contract() {
        let config = TimingConfig::default();
        assert_eq!(config.setup_timeout(), Duration::from_secs(2));
        assert_eq!(config.interval_budget(), Duration::from_millis(10));
        assert_eq!(
            config.mode_total_timeout(ExecutionMode::Autonomous),
            Duration::from_secs(5)
        );
        assert_eq!(
            config.mode_total_timeout(ExecutionMode::Teleop),
            Duration::from_secs(120)
        );
        assert_eq!(config.over_budget_policy, OverBudgetPolicy::Fatal);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = TimingConfig::from_json(
            r#"{"interval_budget_ms": 50, "mode_timeouts": {"teleop_ms": 30000}}"#,
        )
        .unwrap();
        assert_eq!(config.interval_budget_ms, 50);
        assert_eq!(config.mode_timeouts.teleop_ms, 30_000);
        assert_eq!(config.mode_timeouts.autonomous_ms, DEFAULT_AUTONOMOUS_TIMEOUT_MS);
        assert_eq!(config.setup_timeout_ms, DEFAULT_SETUP_TIMEOUT_MS);
    }

    #[test]
    fn policy_parses_lowercase() {
        let config = TimingConfig::from_json(r#"{"over_budget_policy": "warn"}"#).unwrap();
        assert_eq!(config.over_budget_policy, OverBudgetPolicy::Warn);
        assert!(TimingConfig::from_json(r#"{"over_budget_policy": "retry"}"#).is_err());
    }

    #[test]
    fn load_reports_missing_file_as_config_error() {
        let path = std::env::temp_dir().join("phasebox-does-not-exist.json");
        let err = TimingConfig::load(&path).unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "phasebox-timing-{}.json",
            uuid::Uuid::new_v4()
        ));
        std::fs::write(&path, r#"{"setup_timeout_ms": 250}"#).unwrap();

        let config = TimingConfig::load(&path).unwrap();
        assert_eq!(config.setup_timeout(), Duration::from_millis(250));

        let _ = std::fs::remove_file(path);
    }
}
