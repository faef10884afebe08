// Timing config validation
// Fail fast at startup with actionable errors

use crate::config::timing::TimingConfig;
use crate::config::types::{ExecutionMode, HarnessError, Result};

/// Validation result with detailed errors
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate config at startup. Errors are fatal, warnings are returned.
pub fn validate_config(config: &TimingConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_setup(config, &mut result);
    validate_budget(config, &mut result);
    validate_modes(config, &mut result);

    if !result.is_valid() {
        return Err(HarnessError::Config(format!(
            "Timing config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    Ok(result)
}

fn validate_setup(config: &TimingConfig, result: &mut ValidationResult) {
    if config.setup_timeout_ms == 0 {
        result.add_error("setup_timeout_ms cannot be zero".to_string());
    }
}

fn validate_budget(config: &TimingConfig, result: &mut ValidationResult) {
    if config.interval_budget_ms == 0 {
        result.add_error("interval_budget_ms cannot be zero".to_string());
    }
}

fn validate_modes(config: &TimingConfig, result: &mut ValidationResult) {
    for mode in ExecutionMode::ALL {
        let total = config.mode_total_timeout(mode);
        if total.is_zero() {
            result.add_error(format!("{} mode timeout cannot be zero", mode));
            continue;
        }

        // Setup must leave room for main within the same mode deadline.
        if config.setup_timeout() >= total {
            result.add_error(format!(
                "setup_timeout_ms ({}) must be shorter than the {} mode timeout ({})",
                config.setup_timeout_ms,
                mode,
                total.as_millis()
            ));
        }

        if config.interval_budget() > total {
            result.add_warning(format!(
                "interval_budget_ms ({}) exceeds the {} mode timeout ({}); main will run at most once",
                config.interval_budget_ms,
                mode,
                total.as_millis()
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let result = validate_config(&TimingConfig::default()).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_zero_budget_rejected() {
        let config = TimingConfig::default().with_interval_budget_ms(0);
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("interval_budget_ms"));
    }

    #[test]
    fn test_zero_setup_rejected() {
        let config = TimingConfig::default().with_setup_timeout_ms(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_setup_longer_than_mode_rejected() {
        let config = TimingConfig::default()
            .with_setup_timeout_ms(6_000)
            .with_mode_timeout_ms(ExecutionMode::Autonomous, 5_000);
        let err = validate_config(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("setup_timeout_ms") && message.contains("autonomous"));
    }

    #[test]
    fn test_budget_above_mode_timeout_warns() {
        let config = TimingConfig::default()
            .with_setup_timeout_ms(100)
            .with_interval_budget_ms(1_000)
            .with_mode_timeout_ms(ExecutionMode::Autonomous, 500);
        let result = validate_config(&config).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("autonomous")));
    }
}
