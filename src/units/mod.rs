//! Bundled code units
//!
//! Reference units for exercising the harness from the command line, plus the
//! in-memory bench the CLI runs them against.

use crate::capability::memory::{LogSink, MemoryDevices, MemoryInputs};
use crate::capability::CapabilityBundle;
use crate::config::types::{ExecutionMode, Phase, UnitResult};
use crate::loader::{CodeUnit, UnitRegistry};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Device id of the bench motor controller
pub const MOTOR: &str = "motor";

/// Identifier and one-line description of every bundled unit
pub const CATALOG: &[(&str, &str)] = &[
    (
        "heartbeat",
        "drives the bench motor from button_a and prints a status line",
    ),
    ("blank", "exports no entry points; every phase is a stub"),
    (
        "runaway",
        "main never returns; stopped by its budget or the mode deadline",
    ),
    ("divide", "teleop_main divides by a zero encoder reading"),
];

/// Registry holding every unit in [`CATALOG`]
pub fn builtin_registry() -> UnitRegistry {
    UnitRegistry::new()
        .with_unit("heartbeat", heartbeat)
        .with_unit("blank", || CodeUnit::new("blank"))
        .with_unit("runaway", runaway)
        .with_unit("divide", divide)
}

/// Capabilities backed by one in-memory motor, a gamepad, and the `unit` log target
pub fn bench_capabilities() -> CapabilityBundle {
    CapabilityBundle::new(
        Arc::new(MemoryDevices::new().with_param(MOTOR, "enc_pos", 0_i64)),
        Arc::new(MemoryInputs::gamepad()),
        Arc::new(LogSink),
    )
}

fn heartbeat() -> CodeUnit {
    let counter = Arc::new(AtomicU64::new(0));
    CodeUnit::new("heartbeat")
        .with_phase(ExecutionMode::Autonomous, Phase::Setup, |caps| {
            caps.print("Autonomous setup has begun!");
            caps.set_value(MOTOR, "duty_cycle", 0.2)?;
            let status = caps.clone();
            caps.run_action("status", move |token| {
                while !token.is_cancelled() {
                    status.print("autonomous status: running");
                    thread::sleep(Duration::from_millis(500));
                }
            })
        })
        .with_phase(ExecutionMode::Autonomous, Phase::Main, move |caps| {
            let iteration = counter.fetch_add(1, Ordering::Relaxed);
            let duty = caps.get_value(MOTOR, "duty_cycle")?;
            if iteration % 100 == 0 {
                caps.print(&format!(
                    "iteration {}: duty_cycle {}",
                    iteration,
                    duty.as_f64()
                ));
            }
            Ok(())
        })
        .with_phase(ExecutionMode::Teleop, Phase::Setup, |caps| {
            caps.print("Teleop setup has begun!");
            Ok(())
        })
        .with_phase(ExecutionMode::Teleop, Phase::Main, |caps| {
            let duty = if caps.input("button_a")?.as_bool() { 0.5 } else { 0.0 };
            caps.set_value(MOTOR, "duty_cycle", duty)
        })
}

fn runaway() -> CodeUnit {
    let spin = |caps: &CapabilityBundle| -> UnitResult {
        loop {
            caps.check_cancelled()?;
            thread::sleep(Duration::from_millis(1));
        }
    };
    CodeUnit::new("runaway")
        .with_phase(ExecutionMode::Autonomous, Phase::Setup, |_| Ok(()))
        .with_phase(ExecutionMode::Autonomous, Phase::Main, spin)
        .with_phase(ExecutionMode::Teleop, Phase::Setup, |_| Ok(()))
        .with_phase(ExecutionMode::Teleop, Phase::Main, spin)
}

fn divide() -> CodeUnit {
    CodeUnit::new("divide")
        .with_phase(ExecutionMode::Teleop, Phase::Setup, |caps| {
            caps.print("Teleop setup has begun!");
            Ok(())
        })
        .with_phase(ExecutionMode::Teleop, Phase::Main, |caps| {
            let divisor = caps.get_value(MOTOR, "enc_pos")?.as_f64() as i64;
            caps.set_value(MOTOR, "duty_cycle", 100 / divisor)
        })
}
