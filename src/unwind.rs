//! Panic capture at job boundaries.
//!
//! A panic inside a job is caught where the job runs, carried to the joining
//! thread as a payload, and resumed there. This mirrors what `rayon_core` does.

use std::eprintln;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::panic::resume_unwind;
use std::process::abort;

/// The value produced by a job closure, or the payload of its panic.
pub type Outcome<T> = std::thread::Result<T>;

/// Runs `f`, turning a panic into `Err`.
///
/// Every caught panic is later handed to [`resume`], so `f` need not be unwind
/// safe: nothing observes its state between the two.
#[inline(always)]
pub fn catch<F, R>(f: F) -> Outcome<R>
where
    F: FnOnce() -> R,
{
    catch_unwind(AssertUnwindSafe(f))
}

/// Returns the value of an outcome, or resumes its panic on this thread with
/// the original payload.
#[inline(always)]
pub fn resume<R>(outcome: Outcome<R>) -> R {
    match outcome {
        Ok(value) => value,
        Err(payload) => resume_unwind(payload),
    }
}

/// Aborts the process if dropped. Must be forgotten on the normal path.
pub struct AbortGuard;

impl Drop for AbortGuard {
    fn drop(&mut self) {
        eprintln!("parloop: panic while running job bookkeeping; aborting");
        abort();
    }
}
