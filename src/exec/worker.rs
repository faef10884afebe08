//! Protected calls into unit code
//!
//! Unit code runs on one dedicated worker thread per session. The controlling
//! thread hands it a phase function over a bounded channel and waits for the
//! report until the armed deadline. A panic inside the unit is caught on the
//! worker and reported as a fault.
//!
//! When the deadline passes first the call is abandoned: the worker is marked
//! lost, the controlling thread moves on, and the worker's eventual report is
//! never read. A lost worker is detached on drop instead of joined, so a unit
//! that never returns cannot hold the harness hostage. It keeps its thread until
//! it returns or the process exits.

use crate::capability::CapabilityBundle;
use crate::config::types::{FaultCause, FaultOrigin, HarnessError, Result, UnitError};
use crate::loader::PhaseFunction;
use crossbeam_channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, trace, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Outcome of one protected call, as seen by the controlling thread
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallResult {
    /// The function returned normally before the deadline
    Returned,
    /// The function failed before the deadline
    Raised(FaultCause),
    /// The deadline passed first; the call was abandoned
    Interrupted,
}

type Report = std::result::Result<(), FaultCause>;

/// Worker thread executing phase functions one at a time
pub struct PhaseWorker {
    jobs: Option<Sender<PhaseFunction>>,
    reports: Receiver<Report>,
    handle: Option<JoinHandle<()>>,
    lost: bool,
}

impl PhaseWorker {
    pub fn spawn(capabilities: CapabilityBundle) -> Result<Self> {
        let (job_tx, job_rx) = crossbeam_channel::bounded::<PhaseFunction>(1);
        let (report_tx, report_rx) = crossbeam_channel::bounded::<Report>(1);

        let handle = thread::Builder::new()
            .name("phasebox-worker".to_string())
            .spawn(move || worker_loop(job_rx, report_tx, capabilities))
            .map_err(|e| HarnessError::Worker(format!("failed to spawn worker thread: {}", e)))?;

        Ok(Self {
            jobs: Some(job_tx),
            reports: report_rx,
            handle: Some(handle),
            lost: false,
        })
    }

    /// Run `function` on the worker, waiting no later than `wait_until`.
    ///
    /// After an `Interrupted` result the worker is lost and every later call
    /// fails immediately; a stale report can never answer a newer call.
    pub fn call(&mut self, function: &PhaseFunction, wait_until: Instant) -> CallResult {
        if self.lost {
            return CallResult::Raised(FaultCause::new(
                FaultOrigin::Worker,
                "worker abandoned by an earlier interruption",
            ));
        }
        let Some(jobs) = self.jobs.as_ref() else {
            return CallResult::Raised(FaultCause::new(FaultOrigin::Worker, "worker shut down"));
        };

        trace!("Calling {}", function.symbol());
        if jobs.send(function.clone()).is_err() {
            self.lost = true;
            return CallResult::Raised(FaultCause::new(
                FaultOrigin::Worker,
                "worker thread exited",
            ));
        }

        match self.reports.recv_deadline(wait_until) {
            Ok(Ok(())) => CallResult::Returned,
            Ok(Err(cause)) => CallResult::Raised(cause),
            Err(RecvTimeoutError::Timeout) => {
                debug!("{} interrupted at deadline", function.symbol());
                self.lost = true;
                CallResult::Interrupted
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.lost = true;
                CallResult::Raised(FaultCause::new(
                    FaultOrigin::Worker,
                    "worker thread exited without reporting",
                ))
            }
        }
    }

    /// True once a call has been abandoned
    pub fn is_lost(&self) -> bool {
        self.lost
    }
}

impl Drop for PhaseWorker {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop.
        self.jobs.take();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.lost {
            warn!("Detaching worker thread still running an abandoned call");
            return;
        }
        if handle.join().is_err() {
            warn!("Worker thread panicked during shutdown");
        }
    }
}

fn worker_loop(
    jobs: Receiver<PhaseFunction>,
    reports: Sender<Report>,
    capabilities: CapabilityBundle,
) {
    for function in jobs.iter() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| function.call(&capabilities)));
        let report = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(UnitError::Cancelled)) => Err(FaultCause::new(
                FaultOrigin::Cancelled,
                format!("{} touched a capability after its deadline", function.symbol()),
            )),
            Ok(Err(err)) => Err(FaultCause::new(FaultOrigin::Error, err.to_string())),
            Err(payload) => Err(FaultCause::new(
                FaultOrigin::Panic,
                panic_message(payload.as_ref()),
            )),
        };

        // Receiver gone: the session is over.
        if reports.send(report).is_err() {
            break;
        }
    }
    trace!("Worker loop finished");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
