//! Fork-join parallel loops and reductions over stepped integer ranges.
//!
//! Parloop runs a body once for every index of a range, or computes a value
//! for every index and combines them, on a pool of worker threads. A range is
//! cut in two recursively until the pieces are no longer than a configurable
//! chunk; the upper half of every cut is offered to idle workers, which steal
//! it from the deque of the worker that made the cut, while the lower half is
//! processed right away. Every call blocks until the whole range is done.
//!
//! ```
//! use parloop::IndexRange;
//!
//! // Sum of squares over 0..8, two indices per serial chunk.
//! let range = IndexRange::new(0, 8).with_chunk(2).unwrap();
//! let sum = parloop::reduce_with(range, |i| i * i, |a, b| a + b);
//! assert_eq!(sum, Some(140));
//! ```
//!
//! The free functions run on the process-wide [`THREAD_POOL`], which starts
//! one worker per core, or `PARLOOP_NUM_THREADS` workers if that environment
//! variable is set. Other pools can be declared as statics and sized by hand;
//! see [`ThreadPool`].
//!
//! Loops and reductions may be nested freely. When a body running on a worker
//! starts another loop on the same pool, the inner loop runs on that worker
//! instead of waiting in line behind the outer one.
//!
//! A panic inside a body is carried back to the thread that started the loop,
//! with its original payload, after all the work that was already running on
//! other workers has finished. The pool stays usable afterwards.
//!
//! # Acknowledgments
//!
//! The job and unwinding code is adapted from `rayon_core`, and the stealing
//! from `crossbeam-deque`.

#![no_std]
#![cfg_attr(loom, allow(dead_code, unused_imports))]

// -----------------------------------------------------------------------------
// Boilerplate for building without the standard library

extern crate alloc;
extern crate std;

// -----------------------------------------------------------------------------
// Modules

mod compile_fail;
mod config;
mod error;
mod job;
mod loops;
mod range;
mod reduce;
mod signal;
mod thread_pool;
mod unwind;
mod util;

// -----------------------------------------------------------------------------
// Platform support

// The pool is model-checked with `loom`, which needs every threading primitive
// it schedules around to be its own mock. Code inside the crate takes them from
// here instead of from `core` or `std`.

#[cfg(not(loom))]
mod platform {
    pub use alloc::sync::Arc;
    pub use core::sync::atomic::AtomicBool;
    pub use core::sync::atomic::AtomicU32;
    pub use core::sync::atomic::AtomicUsize;
    pub use core::sync::atomic::Ordering;
    pub use core::sync::atomic::fence;
    pub use std::sync::Condvar;
    pub use std::sync::Mutex;
    pub use std::sync::MutexGuard;
    pub use std::sync::RwLock;
    pub use std::thread::Builder as ThreadBuilder;
    pub use std::thread::JoinHandle;
    pub use std::thread::current as current_thread;
    pub use std::thread_local;

    // Futex

    pub use atomic_wait::wait;
    pub use atomic_wait::wake_one;
}

#[cfg(loom)]
mod platform {
    pub use loom::sync::Arc;
    pub use loom::sync::Condvar;
    pub use loom::sync::Mutex;
    pub use loom::sync::MutexGuard;
    pub use loom::sync::RwLock;
    pub use loom::sync::atomic::AtomicBool;
    pub use loom::sync::atomic::AtomicU32;
    pub use loom::sync::atomic::AtomicUsize;
    pub use loom::sync::atomic::Ordering;
    pub use loom::sync::atomic::fence;
    pub use loom::thread::Builder as ThreadBuilder;
    pub use loom::thread::JoinHandle;
    pub use loom::thread::current as current_thread;
    pub use loom::thread_local;

    // Futex

    /// Loom can not park on an address. Yield to the other threads instead;
    /// callers re-check the value in a loop, as they must for a real futex.
    pub fn wait(atomic: &AtomicU32, value: u32) {
        if atomic.load(Ordering::Acquire) == value {
            loom::thread::yield_now();
        }
    }

    pub fn wake_one(_atomic: *const AtomicU32) {}
}

// -----------------------------------------------------------------------------
// Top-level exports

pub use config::NUM_THREADS_VAR;
pub use error::RangeError;
pub use loops::LoopBody;
pub use loops::LoopTask;
#[cfg(not(loom))]
pub use loops::for_each;
#[cfg(not(loom))]
pub use loops::try_for_each;
pub use range::IndexRange;
pub use range::Split;
pub use range::middle;
pub use reduce::ReduceBody;
pub use reduce::ReduceFn;
pub use reduce::ReduceTask;
#[cfg(not(loom))]
pub use reduce::reduce;
#[cfg(not(loom))]
pub use reduce::reduce_with;
#[cfg(not(loom))]
pub use reduce::try_reduce;
#[cfg(not(loom))]
pub use thread_pool::THREAD_POOL;
pub use thread_pool::ThreadPool;
pub use thread_pool::Worker;
#[cfg(not(loom))]
pub use thread_pool::global_pool;
#[cfg(not(loom))]
pub use thread_pool::join;

/// The types and functions most programs need.
pub mod prelude {
    pub use crate::IndexRange;
    pub use crate::LoopBody;
    pub use crate::ReduceBody;
    pub use crate::ReduceFn;
    pub use crate::ThreadPool;
    pub use crate::Worker;
    #[cfg(not(loom))]
    pub use crate::for_each;
    #[cfg(not(loom))]
    pub use crate::reduce;
    #[cfg(not(loom))]
    pub use crate::reduce_with;
}
