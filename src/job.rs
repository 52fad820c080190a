//! This module defines the executable unit of work scheduled on the pool. There
//! is a single job type, [`StackJob`], which lives in the stack frame of the
//! thread that forked it.
//!
//! After a job is allocated, we refer to it by a [`JobRef`]. Job refs are
//! type-erased, and can be pushed onto a deque and stolen by another thread
//! without moving the underlying job.
//!
//! When using a job, one must be extremely careful to ensure that:
//! (a) The job does not outlive anything it closes over.
//! (b) The job remains valid until it is executed for the last time.
//! (c) Each job reference is executed exactly once.

use core::cell::UnsafeCell;
use core::mem::ManuallyDrop;
use core::ptr::NonNull;

use crossbeam_deque::Stealer;
use crossbeam_deque::Worker as Deque;

use crate::signal::Signal;
use crate::thread_pool::Worker;
use crate::unwind;
use crate::unwind::Outcome;

// -----------------------------------------------------------------------------
// Shared JobRef

/// Effectively a job trait object: a pointer to some type-erased job and the
/// function that knows how to run it.
pub struct JobRef {
    job_pointer: NonNull<()>,
    execute_fn: unsafe fn(NonNull<()>, &Worker),
}

impl JobRef {
    /// Creates a new `JobRef` from raw pointers.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `job_pointer` remains valid to pass to
    /// `execute_fn` until the job is executed.
    #[inline(always)]
    pub unsafe fn new_raw(
        job_pointer: NonNull<()>,
        execute_fn: unsafe fn(NonNull<()>, &Worker),
    ) -> JobRef {
        JobRef {
            job_pointer,
            execute_fn,
        }
    }

    /// Returns an opaque handle that can be saved and compared, without making
    /// `JobRef` itself `Copy + Eq`.
    #[inline(always)]
    pub fn id(&self) -> impl Eq + use<> {
        self.job_pointer
    }

    /// Executes the `JobRef` by passing the job pointer to the execute function.
    #[inline(always)]
    pub fn execute(self, worker: &Worker) {
        // SAFETY: The constructor of `JobRef` is required to ensure this is valid.
        unsafe { (self.execute_fn)(self.job_pointer, worker) }
    }
}

// SAFETY: !Send for raw pointers is not for safety, just as a lint. Every job
// behind a `JobRef` closes only over `Send` data.
unsafe impl Send for JobRef {}

// -----------------------------------------------------------------------------
// Job queue

/// The local deque of a worker. The owning worker pushes and pops at the back
/// (LIFO), while other workers steal from the front through a [`Stealer`],
/// taking the oldest and therefore largest piece of a recursive split.
pub struct JobQueue {
    deque: Deque<JobRef>,
}

impl JobQueue {
    pub fn new() -> JobQueue {
        JobQueue {
            deque: Deque::new_lifo(),
        }
    }

    /// Creates a handle other workers can steal through.
    pub fn stealer(&self) -> Stealer<JobRef> {
        self.deque.stealer()
    }

    #[inline(always)]
    pub fn push(&self, job_ref: JobRef) {
        self.deque.push(job_ref);
    }

    #[inline(always)]
    pub fn pop(&self) -> Option<JobRef> {
        self.deque.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }
}

// -----------------------------------------------------------------------------
// Stack allocated work function

/// A [`StackJob`] is a job that's allocated on the stack. It's efficient, but
/// relies on us preventing the stack frame from being dropped before the job
/// has run. The closure's outcome, including a panic payload, is sent back
/// over the attached signal.
pub struct StackJob<F, T> {
    f: UnsafeCell<ManuallyDrop<F>>,
    signal: Signal<Outcome<T>>,
}

impl<F, T> StackJob<F, T>
where
    F: FnOnce(&Worker) -> T + Send,
    T: Send,
{
    /// Creates a new `StackJob`.
    #[inline(always)]
    pub fn new(f: F) -> StackJob<F, T> {
        StackJob {
            f: UnsafeCell::new(ManuallyDrop::new(f)),
            signal: Signal::new(),
        }
    }

    /// Creates a `JobRef` pointing to this job.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the `StackJob` lives (and does not move)
    /// until the `JobRef` is executed, or until the `JobRef` has been reclaimed
    /// and discarded. The caller must also ensure that they never create two
    /// different `JobRef`s that point to the same `StackJob`.
    #[inline(always)]
    pub unsafe fn as_job_ref(&self) -> JobRef {
        let job_pointer = NonNull::from(self).cast();
        // SAFETY: The caller ensures the `StackJob` will outlive the `JobRef`,
        // so it will remain valid to pass this pointer to `Self::execute`.
        unsafe { JobRef::new_raw(job_pointer, Self::execute) }
    }

    /// Unwraps the stack job back into a closure, so that it can be run inline
    /// (or dropped) by the thread that created it.
    ///
    /// # Safety
    ///
    /// This may only be called if the job has not been, and never will be,
    /// executed through a `JobRef`.
    #[inline(always)]
    pub unsafe fn unwrap(mut self) -> F {
        // SAFETY: `execute` has not taken the closure and never will.
        unsafe { ManuallyDrop::take(self.f.get_mut()) }
    }

    /// Returns the signal over which the outcome of the closure is sent.
    #[inline(always)]
    pub fn signal(&self) -> &Signal<Outcome<T>> {
        &self.signal
    }

    /// Executes a `StackJob` through a type-erased pointer.
    ///
    /// # Safety
    ///
    /// `this` must point to a live `StackJob<F, T>` and this must be called at
    /// most once per job. After the signal is sent the job may be deallocated.
    #[inline(always)]
    unsafe fn execute(this: NonNull<()>, worker: &Worker) {
        // SAFETY: The caller ensures `this` points to a live job.
        let this = unsafe { this.cast::<Self>().as_ref() };
        // If anything below panics outside of the closure itself, the joining
        // thread could free the job while we still use it. Abort instead.
        let abort_guard = unwind::AbortGuard;
        // SAFETY: The closure is only taken here or in `unwrap`, which is never
        // called for a job that is executed, and this runs only once.
        let f = unsafe { ManuallyDrop::take(&mut *this.f.get()) };
        let result = unwind::catch(|| f(worker));
        // SAFETY: The job, and therefore its signal, is valid until the signal
        // is sent. We do not touch `this` afterwards.
        unsafe { Signal::send(&this.signal, result) };
        core::mem::forget(abort_guard);
    }
}
