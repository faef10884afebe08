use crate::config::timing::{OverBudgetPolicy, TimingConfig};
use crate::config::types::HarnessError;
use crate::config::validator::validate_config;
use crate::exec::run_session;
use crate::units;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyArg {
    Fatal,
    Warn,
}

impl From<PolicyArg> for OverBudgetPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Fatal => OverBudgetPolicy::Fatal,
            PolicyArg::Warn => OverBudgetPolicy::Warn,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a bundled code unit in one mode
    Run {
        /// Code unit identifier (see `phasebox units`)
        #[arg(long)]
        unit: String,
        /// Execution mode: autonomous or teleop
        #[arg(long)]
        mode: String,
        /// Timing config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the setup timeout in milliseconds
        #[arg(long)]
        setup_timeout_ms: Option<u64>,
        /// Override the main interval budget in milliseconds
        #[arg(long)]
        interval_budget_ms: Option<u64>,
        /// Override what an over-budget iteration does
        #[arg(long, value_enum)]
        over_budget: Option<PolicyArg>,
        /// Audit log path
        #[arg(long)]
        audit_log: Option<PathBuf>,
        /// Print the session report or fault as JSON
        #[arg(long)]
        json: bool,
    },
    /// List bundled code units
    Units,
    /// Validate a timing config and print the effective values
    CheckConfig {
        /// Timing config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

extern "C" fn signal_handler(sig: libc::c_int) {
    // ASYNC-SIGNAL SAFETY: Only use async-signal-safe functions here.
    // - No eprintln! (can deadlock if signal arrives during stdio/malloc)
    // - No std::process::exit() (runs atexit handlers, also unsafe)
    // - libc::write(STDERR) and libc::_exit() are async-signal-safe
    let msg = b"phasebox: signal received, exiting\n";
    unsafe {
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::_exit(128 + sig);
    }
}

fn setup_signal_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(signal_handler),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in [Signal::SIGTERM, Signal::SIGINT] {
        // SAFETY: the handler only calls async-signal-safe functions.
        unsafe { signal::sigaction(sig, &action) }
            .with_context(|| format!("Failed to install {} handler", sig))?;
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<TimingConfig, HarnessError> {
    match path {
        Some(path) => TimingConfig::load(path),
        None => Ok(TimingConfig::default()),
    }
}

/// Validation errors are fatal, warnings are logged
fn validated(config: TimingConfig) -> Result<TimingConfig, HarnessError> {
    let validation = validate_config(&config)?;
    for warning in &validation.warnings {
        log::warn!("Config: {}", warning);
    }
    Ok(config)
}

fn checked_config(path: Option<&Path>) -> Result<TimingConfig, HarnessError> {
    validated(load_config(path)?)
}

fn exit_with(err: &HarnessError, json: bool) -> ! {
    if json {
        let body = serde_json::json!({
            "error": err.to_string(),
            "state": err.run_state().map(|s| s.as_str()),
            "fault": err.fault_kind(),
        });
        println!("{}", body);
    }
    eprintln!("Error: {}", err);
    std::process::exit(i32::from(err));
}

pub fn run() -> Result<()> {
    setup_signal_handlers()?;

    env_logger::init();

    // Unit panics are caught and reported as faults; keep the default hook quiet.
    std::panic::set_hook(Box::new(|info| {
        log::debug!("panic in unit code: {}", info);
    }));

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            unit,
            mode,
            config,
            setup_timeout_ms,
            interval_budget_ms,
            over_budget,
            audit_log,
            json,
        } => {
            if let Err(e) = crate::observability::audit::init_audit_logger(audit_log) {
                exit_with(&e, json);
            }

            let mut timing = match load_config(config.as_deref()) {
                Ok(timing) => timing,
                Err(e) => exit_with(&e, json),
            };
            if let Some(ms) = setup_timeout_ms {
                timing = timing.with_setup_timeout_ms(ms);
            }
            if let Some(ms) = interval_budget_ms {
                timing = timing.with_interval_budget_ms(ms);
            }
            if let Some(policy) = over_budget {
                timing = timing.with_over_budget_policy(policy.into());
            }
            let timing = match validated(timing) {
                Ok(timing) => timing,
                Err(e) => exit_with(&e, json),
            };

            let registry = units::builtin_registry();
            match run_session(&unit, &mode, &registry, units::bench_capabilities(), &timing) {
                Ok(report) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        eprintln!(
                            "{} {} finished: {} after {:.3}s, {} main iteration(s)",
                            report.unit,
                            report.mode,
                            report.state,
                            report.elapsed.as_secs_f64(),
                            report.iterations
                        );
                        for symbol in &report.stubbed_symbols {
                            eprintln!("  stub: {}", symbol);
                        }
                        if report.budget_overruns > 0 {
                            eprintln!("  budget overruns: {}", report.budget_overruns);
                        }
                    }
                    Ok(())
                }
                Err(e) => exit_with(&e, json),
            }
        }
        Commands::Units => {
            for (name, description) in units::CATALOG {
                println!("{:<12} {}", name, description);
            }
            Ok(())
        }
        Commands::CheckConfig { config } => match checked_config(config.as_deref()) {
            Ok(timing) => {
                println!("{}", serde_json::to_string_pretty(&timing)?);
                Ok(())
            }
            Err(e) => exit_with(&e, false),
        },
    }
}
