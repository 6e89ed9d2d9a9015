use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Why a blocking wait gave up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitError {
    TimedOut,
    /// the object waited on was torn down
    Closed,
}

/// A monotonic deadline computed once at call entry.
///
/// Every wait step sleeps for "deadline minus now", so spurious wakeups
/// never extend the caller's timeout.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// `0` means wait forever
    pub fn from_timeout_ms(timeout_ms: u64) -> Self {
        if timeout_ms == 0 {
            Self::never()
        } else {
            Self::after(Duration::from_millis(timeout_ms))
        }
    }

    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
        }
    }

    pub const fn never() -> Self {
        Self { at: None }
    }

    #[inline]
    pub fn is_infinite(&self) -> bool {
        self.at.is_none()
    }

    /// `None` for an infinite deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        match self.at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }
}

/// Lock a mutex, recovering the data if a holder panicked.
#[inline]
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wait on `cv` until notified or `deadline` passes.
///
/// Returns the reacquired guard and whether the deadline had passed.
pub fn wait_until<'a, T>(
    cv: &Condvar,
    guard: MutexGuard<'a, T>,
    deadline: &Deadline,
) -> (MutexGuard<'a, T>, bool) {
    match deadline.remaining() {
        None => (cv.wait(guard).unwrap_or_else(PoisonError::into_inner), false),
        Some(rem) if rem.is_zero() => (guard, true),
        Some(rem) => {
            let (guard, res) = cv
                .wait_timeout(guard, rem)
                .unwrap_or_else(PoisonError::into_inner);
            (guard, res.timed_out())
        }
    }
}
