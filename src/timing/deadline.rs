//! Single live deadline for a session
//!
//! [`DeadlineTimer::arm`] hands out a [`DeadlineGuard`] that mutably borrows the
//! timer, so a second deadline cannot be armed while one is live:
//!
//! ```compile_fail
//! use phasebox::capability::CancelToken;
//! use phasebox::timing::deadline::DeadlineTimer;
//! use std::time::Duration;
//!
//! let mut timer = DeadlineTimer::new(CancelToken::new());
//! let setup = timer.arm(Duration::from_secs(2));
//! let nested = timer.arm(Duration::from_secs(1));
//! drop(setup);
//! ```
//!
//! Dropping the guard disarms the timer on every exit path, including early
//! returns through `?`. Replacing the live deadline goes through
//! [`DeadlineGuard::rearm`].
//!
//! ```
//! use phasebox::capability::CancelToken;
//! use phasebox::timing::deadline::DeadlineTimer;
//! use std::time::Duration;
//!
//! let mut timer = DeadlineTimer::new(CancelToken::new());
//! {
//!     let mut guard = timer.arm(Duration::from_secs(2));
//!     guard.rearm(Duration::from_secs(5));
//!     assert!(!guard.expired());
//! }
//! assert!(!timer.is_armed());
//! ```

use crate::capability::CancelToken;
use log::debug;
use std::time::{Duration, Instant};

// Upper bound for deadlines too large to represent as an Instant.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn instant_after(start: Instant, duration: Duration) -> Instant {
    start
        .checked_add(duration)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// A scheduled one-shot deadline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArmedDeadline {
    pub armed_at: Instant,
    pub expires_at: Instant,
    pub duration: Duration,
}

impl ArmedDeadline {
    fn starting_now(duration: Duration) -> Self {
        let armed_at = Instant::now();
        Self {
            armed_at,
            expires_at: instant_after(armed_at, duration),
            duration,
        }
    }
}

/// Owner of the session's armed deadline
#[derive(Debug)]
pub struct DeadlineTimer {
    armed: Option<ArmedDeadline>,
    token: CancelToken,
}

impl DeadlineTimer {
    /// `token` is tripped when an expiry interrupts a call
    pub fn new(token: CancelToken) -> Self {
        Self { armed: None, token }
    }

    /// Arm a deadline `duration` from now
    pub fn arm(&mut self, duration: Duration) -> DeadlineGuard<'_> {
        let deadline = ArmedDeadline::starting_now(duration);
        debug!("Deadline armed for {:?}", duration);
        self.armed = Some(deadline);
        DeadlineGuard {
            timer: self,
            deadline,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn armed(&self) -> Option<ArmedDeadline> {
        self.armed
    }

    fn disarm(&mut self) {
        if let Some(deadline) = self.armed.take() {
            debug!(
                "Deadline disarmed after {:?} of {:?}",
                deadline.armed_at.elapsed(),
                deadline.duration
            );
        }
    }
}

/// Scoped ownership of the armed deadline. Disarms on drop.
#[derive(Debug)]
pub struct DeadlineGuard<'t> {
    timer: &'t mut DeadlineTimer,
    deadline: ArmedDeadline,
}

impl DeadlineGuard<'_> {
    pub fn expires_at(&self) -> Instant {
        self.deadline.expires_at
    }

    pub fn remaining(&self) -> Duration {
        self.deadline
            .expires_at
            .saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline.expires_at
    }

    /// Replace the live deadline with one `duration` from now
    pub fn rearm(&mut self, duration: Duration) {
        let deadline = ArmedDeadline::starting_now(duration);
        debug!(
            "Deadline re-armed for {:?} (was {:?})",
            duration, self.deadline.duration
        );
        self.deadline = deadline;
        self.timer.armed = Some(deadline);
    }

    /// Expiry interrupted a call: trip the cancellation token so the abandoned
    /// call fails at its next capability access.
    pub fn fire(&self) {
        debug!("Deadline fired after {:?}", self.deadline.armed_at.elapsed());
        self.timer.token.cancel();
    }

    pub fn disarm(self) {}
}

impl Drop for DeadlineGuard<'_> {
    fn drop(&mut self) {
        self.timer.disarm();
    }
}
