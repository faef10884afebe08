//! In-memory capability implementations used by the CLI and tests.

use super::{DeviceProxy, InputProxy, OutputSink, ParamValue};
use crate::config::types::{UnitError, UnitResult};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

/// Device table keyed by device id, then parameter name.
/// Parameters read before they are written are zero.
#[derive(Debug, Default)]
pub struct MemoryDevices {
    devices: RwLock<HashMap<String, HashMap<String, ParamValue>>>,
}

impl MemoryDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device: &str) -> Self {
        if let Ok(mut devices) = self.devices.write() {
            devices.entry(device.to_string()).or_default();
        }
        self
    }

    pub fn with_param(self, device: &str, param: &str, value: impl Into<ParamValue>) -> Self {
        if let Ok(mut devices) = self.devices.write() {
            devices
                .entry(device.to_string())
                .or_default()
                .insert(param.to_string(), value.into());
        }
        self
    }
}

impl DeviceProxy for MemoryDevices {
    fn get_value(&self, device: &str, param: &str) -> Result<ParamValue, UnitError> {
        let devices = self
            .devices
            .read()
            .map_err(|_| UnitError::raised("device table poisoned"))?;
        let params = devices
            .get(device)
            .ok_or_else(|| UnitError::UnknownDevice(device.to_string()))?;
        Ok(params.get(param).copied().unwrap_or(ParamValue::Float(0.0)))
    }

    fn set_value(&self, device: &str, param: &str, value: ParamValue) -> UnitResult {
        let mut devices = self
            .devices
            .write()
            .map_err(|_| UnitError::raised("device table poisoned"))?;
        let params = devices
            .get_mut(device)
            .ok_or_else(|| UnitError::UnknownDevice(device.to_string()))?;
        params.insert(param.to_string(), value);
        Ok(())
    }
}

/// Named inputs with externally settable values
#[derive(Debug, Default)]
pub struct MemoryInputs {
    values: RwLock<HashMap<String, ParamValue>>,
}

const GAMEPAD_BUTTONS: &[&str] = &[
    "button_a",
    "button_b",
    "button_x",
    "button_y",
    "l_bumper",
    "r_bumper",
    "l_trigger",
    "r_trigger",
    "button_back",
    "button_start",
    "l_stick",
    "r_stick",
    "dpad_up",
    "dpad_down",
    "dpad_left",
    "dpad_right",
    "button_xbox",
];

const GAMEPAD_JOYSTICKS: &[&str] = &[
    "joystick_left_x",
    "joystick_left_y",
    "joystick_right_x",
    "joystick_right_y",
];

impl MemoryInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard gamepad, all buttons released and sticks centred
    pub fn gamepad() -> Self {
        let mut values = HashMap::new();
        for button in GAMEPAD_BUTTONS {
            values.insert(button.to_string(), ParamValue::Bool(false));
        }
        for axis in GAMEPAD_JOYSTICKS {
            values.insert(axis.to_string(), ParamValue::Float(0.0));
        }
        Self {
            values: RwLock::new(values),
        }
    }

    pub fn set(&self, name: &str, value: impl Into<ParamValue>) {
        if let Ok(mut values) = self.values.write() {
            values.insert(name.to_string(), value.into());
        }
    }
}

impl InputProxy for MemoryInputs {
    fn get_value(&self, name: &str) -> Result<ParamValue, UnitError> {
        let values = self
            .values
            .read()
            .map_err(|_| UnitError::raised("input table poisoned"))?;
        values
            .get(name)
            .copied()
            .ok_or_else(|| UnitError::UnknownInput(name.to_string()))
    }
}

/// Forwards unit output to the `unit` log target
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn print(&self, line: &str) {
        log::info!(target: "unit", "{}", line);
    }
}

/// Keeps unit output in memory
#[derive(Debug, Default)]
pub struct BufferSink {
    lines: Mutex<Vec<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

impl OutputSink for BufferSink {
    fn print(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}
