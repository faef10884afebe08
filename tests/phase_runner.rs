//! Integration tests for the phase runner
//!
//! Timings are scaled down to milliseconds. Unit code here is cooperative, so an
//! abandoned call finishes on its own once its token trips.

use phasebox::capability::memory::{BufferSink, MemoryDevices, MemoryInputs};
use phasebox::capability::CapabilityBundle;
use phasebox::config::timing::{OverBudgetPolicy, TimingConfig};
use phasebox::loader::{CodeUnit, UnitRegistry};
use phasebox::{
    run_session, ExecutionMode, FaultKind, FaultOrigin, HarnessError, Phase, RunState, UnitError,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ExecutionMode::{Autonomous, Teleop};

fn capabilities() -> CapabilityBundle {
    CapabilityBundle::new(
        Arc::new(MemoryDevices::new().with_device("motor")),
        Arc::new(MemoryInputs::gamepad()),
        Arc::new(BufferSink::new()),
    )
}

fn config(setup_ms: u64, budget_ms: u64, mode_ms: u64) -> TimingConfig {
    TimingConfig::default()
        .with_setup_timeout_ms(setup_ms)
        .with_interval_budget_ms(budget_ms)
        .with_mode_timeout_ms(Autonomous, mode_ms)
        .with_mode_timeout_ms(Teleop, mode_ms)
}

fn fault_of(err: &HarnessError) -> &phasebox::SessionFault {
    match err {
        HarnessError::Fault(fault) => fault,
        other => panic!("expected a session fault, got {:?}", other),
    }
}

#[test]
fn test_setup_runs_before_main_and_deadline_ends_session() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorder = events.clone();
    let registry = UnitRegistry::new().with_unit("ordered", move || {
        let (setup, main) = (recorder.clone(), recorder.clone());
        CodeUnit::new("ordered")
            .with_phase(Autonomous, Phase::Setup, move |_| {
                setup.lock().unwrap().push("setup");
                Ok(())
            })
            .with_phase(Autonomous, Phase::Main, move |_| {
                main.lock().unwrap().push("main");
                Ok(())
            })
    });

    let report = run_session(
        "ordered",
        "autonomous",
        &registry,
        capabilities(),
        &config(50, 10, 100),
    )
    .unwrap();

    let events = events.lock().unwrap().clone();
    assert_eq!(events[0], "setup");
    assert!(events.len() > 1);
    assert!(events[1..].iter().all(|e| *e == "main"));

    assert_eq!(report.state, RunState::MainDone);
    assert_eq!(
        report.history,
        vec![
            RunState::Init,
            RunState::SetupRunning,
            RunState::SetupDone,
            RunState::MainRunning,
            RunState::MainDone
        ]
    );
    assert!(report.iterations > 0);
    assert_eq!(report.mode, Autonomous);
    // Teleop entry points are absent but not part of an autonomous run
    assert!(report.stubbed_symbols.is_empty());
    assert!(report.diagnostics.is_empty());
}

#[test]
fn test_setup_timeout_aborts_before_main() {
    let main_calls = Arc::new(AtomicU64::new(0));
    let calls = main_calls.clone();
    let registry = UnitRegistry::new().with_unit("slow_setup", move || {
        let calls = calls.clone();
        CodeUnit::new("slow_setup")
            .with_phase(Autonomous, Phase::Setup, |_| {
                thread::sleep(Duration::from_millis(500));
                Ok(())
            })
            .with_phase(Autonomous, Phase::Main, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
    });

    let started = Instant::now();
    let err = run_session(
        "slow_setup",
        "autonomous",
        &registry,
        capabilities(),
        &config(30, 10, 1000),
    )
    .unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(400));

    let fault = fault_of(&err);
    assert_eq!(
        fault.kind,
        FaultKind::TimeoutAtSetup {
            timeout: Duration::from_millis(30)
        }
    );
    assert_eq!(fault.state, RunState::SetupFailed);
    assert_eq!(fault.phase, Phase::Setup);
    assert_eq!(fault.iterations, 0);
    assert_eq!(i32::from(&err), 4);

    // The abandoned setup finishing later never starts main
    thread::sleep(Duration::from_millis(550));
    assert_eq!(main_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_setup_error_is_generic_fault() {
    let main_calls = Arc::new(AtomicU64::new(0));
    let calls = main_calls.clone();
    let registry = UnitRegistry::new().with_unit("broken_setup", move || {
        let calls = calls.clone();
        CodeUnit::new("broken_setup")
            .with_phase(Teleop, Phase::Setup, |_| Err(UnitError::raised("no motor")))
            .with_phase(Teleop, Phase::Main, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
    });

    let err = run_session("broken_setup", "teleop", &registry, capabilities(), &config(50, 10, 200))
        .unwrap_err();
    let fault = fault_of(&err);
    match &fault.kind {
        FaultKind::GenericFault { cause } => {
            assert_eq!(cause.origin, FaultOrigin::Error);
            assert_eq!(cause.message, "no motor");
        }
        other => panic!("expected generic fault, got {:?}", other),
    }
    assert_eq!(fault.state, RunState::SetupFailed);
    assert_eq!(main_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_missing_setup_is_stubbed_with_one_diagnostic() {
    let main_calls = Arc::new(AtomicU64::new(0));
    let calls = main_calls.clone();
    let registry = UnitRegistry::new().with_unit("teleop_main_only", move || {
        let calls = calls.clone();
        CodeUnit::new("teleop_main_only").with_phase(Teleop, Phase::Main, move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });

    let report = run_session(
        "teleop_main_only",
        "teleop",
        &registry,
        capabilities(),
        &config(50, 10, 80),
    )
    .unwrap();
    assert_eq!(
        report.diagnostics,
        vec!["Unable to find function teleop_setup, using stub".to_string()]
    );
    assert_eq!(report.stubbed_symbols, vec!["teleop_setup".to_string()]);
    assert_eq!(report.state, RunState::MainDone);
    assert!(main_calls.load(Ordering::SeqCst) > 0);
}

#[test]
fn test_blank_unit_runs_stubs_until_deadline() {
    let registry = UnitRegistry::new().with_unit("blank", || CodeUnit::new("blank"));
    let report = run_session("blank", "teleop", &registry, capabilities(), &config(50, 10, 60))
        .unwrap();
    assert_eq!(
        report.stubbed_symbols,
        vec!["teleop_main".to_string(), "teleop_setup".to_string()]
    );
    assert_eq!(report.diagnostics.len(), 2);
    assert_eq!(report.state, RunState::MainDone);
}

#[test]
fn test_iteration_starts_are_spaced_by_budget() {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let recorder = starts.clone();
    let registry = UnitRegistry::new().with_unit("paced", move || {
        let recorder = recorder.clone();
        CodeUnit::new("paced").with_phase(Autonomous, Phase::Main, move |_| {
            recorder.lock().unwrap().push(Instant::now());
            thread::sleep(Duration::from_millis(5));
            Ok(())
        })
    });

    run_session("paced", "autonomous", &registry, capabilities(), &config(50, 20, 200)).unwrap();

    let starts = starts.lock().unwrap().clone();
    assert!(starts.len() >= 3);
    for pair in starts.windows(2) {
        // Small allowance for handoff jitter between controller and worker
        assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(18));
    }
}

#[test]
fn test_over_budget_iteration_is_fatal_and_nothing_follows() {
    let main_calls = Arc::new(AtomicU64::new(0));
    let calls = main_calls.clone();
    let registry = UnitRegistry::new().with_unit("slow_main", move || {
        let calls = calls.clone();
        CodeUnit::new("slow_main").with_phase(Autonomous, Phase::Main, move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(300));
            Ok(())
        })
    });

    let started = Instant::now();
    let err = run_session(
        "slow_main",
        "autonomous",
        &registry,
        capabilities(),
        &config(50, 20, 2000),
    )
    .unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(250));

    let fault = fault_of(&err);
    assert!(matches!(
        fault.kind,
        FaultKind::OverBudget { budget, .. } if budget == Duration::from_millis(20)
    ));
    assert_eq!(fault.state, RunState::MainTimeout);
    assert_eq!(fault.iterations, 1);
    assert_eq!(i32::from(&err), 6);
    assert!(err.to_string().contains("stuck in a loop"));

    thread::sleep(Duration::from_millis(350));
    assert_eq!(main_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_warn_policy_tolerates_overruns() {
    let registry = UnitRegistry::new().with_unit("sluggish", || {
        CodeUnit::new("sluggish").with_phase(Teleop, Phase::Main, |_| {
            thread::sleep(Duration::from_millis(15));
            Ok(())
        })
    });
    let config = config(50, 10, 150).with_over_budget_policy(OverBudgetPolicy::Warn);

    let report = run_session("sluggish", "teleop", &registry, capabilities(), &config).unwrap();
    assert_eq!(report.state, RunState::MainDone);
    assert!(report.budget_overruns > 0);
    assert!(report.iterations > 1);
}

#[test]
fn test_mode_deadline_interrupts_running_call() {
    let registry = UnitRegistry::new().with_unit("long_main", || {
        CodeUnit::new("long_main").with_phase(Autonomous, Phase::Main, |_| {
            thread::sleep(Duration::from_millis(60));
            Ok(())
        })
    });

    // Iteration 1 returns at ~60ms and idles to 100ms; iteration 2 is cut at 150ms
    let started = Instant::now();
    let report = run_session(
        "long_main",
        "autonomous",
        &registry,
        capabilities(),
        &config(50, 100, 150),
    )
    .unwrap();
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(report.state, RunState::MainDone);
    assert_eq!(report.iterations, 2);
}

#[test]
fn test_abandoned_call_sees_cancellation() {
    let exited = Arc::new(AtomicBool::new(false));
    let flag = exited.clone();
    let registry = UnitRegistry::new().with_unit("runaway", move || {
        let flag = flag.clone();
        CodeUnit::new("runaway").with_phase(Teleop, Phase::Main, move |caps| loop {
            if let Err(e) = caps.check_cancelled() {
                flag.store(true, Ordering::SeqCst);
                return Err(e);
            }
            thread::sleep(Duration::from_millis(1));
        })
    });

    let err = run_session("runaway", "teleop", &registry, capabilities(), &config(50, 10, 1000))
        .unwrap_err();
    assert_eq!(fault_of(&err).state, RunState::MainTimeout);

    let deadline = Instant::now() + Duration::from_secs(1);
    while !exited.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(exited.load(Ordering::SeqCst));
}

#[test]
fn test_background_actions_cancelled_at_session_end() {
    let stopped = Arc::new(AtomicBool::new(false));
    let flag = stopped.clone();
    let registry = UnitRegistry::new().with_unit("with_action", move || {
        let flag = flag.clone();
        CodeUnit::new("with_action").with_phase(Autonomous, Phase::Setup, move |caps| {
            let flag = flag.clone();
            caps.run_action("spin", move |token| {
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
                flag.store(true, Ordering::SeqCst);
            })
        })
    });

    let report = run_session(
        "with_action",
        "autonomous",
        &registry,
        capabilities(),
        &config(50, 10, 60),
    )
    .unwrap();
    assert_eq!(report.cancelled_actions, vec!["spin".to_string()]);

    let deadline = Instant::now() + Duration::from_secs(1);
    while !stopped.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(stopped.load(Ordering::SeqCst));
}

#[test]
fn test_unknown_unit_is_load_error() {
    let registry = UnitRegistry::new();
    let err = run_session("studentcode", "teleop", &registry, capabilities(), &config(50, 10, 60))
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::ModuleLoad { ref identifier, .. } if identifier == "studentcode"
    ));
    assert!(matches!(err.fault_kind(), Some(FaultKind::ModuleLoadError { .. })));
    assert_eq!(i32::from(&err), 3);
}
