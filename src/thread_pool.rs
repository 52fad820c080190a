//! This module contains the api and worker logic for the thread pool that runs
//! every parallel loop and reduction.

use alloc::collections::VecDeque;
use alloc::format;
use alloc::vec::Vec;
use core::cell::Cell;
use core::cmp;
use core::num::NonZero;
use core::ptr;
#[cfg(not(loom))]
use std::sync::Once;
use std::sync::PoisonError;
use std::thread::available_parallelism;

use crossbeam_deque::Steal;
use crossbeam_deque::Stealer;
use tracing::debug;
use tracing::trace;
use tracing::trace_span;
use tracing::warn;

#[cfg(not(loom))]
use crate::config;
use crate::job::JobQueue;
use crate::job::JobRef;
use crate::job::StackJob;
use crate::platform::Arc;
use crate::platform::AtomicBool;
use crate::platform::AtomicUsize;
use crate::platform::Condvar;
use crate::platform::JoinHandle;
use crate::platform::Mutex;
use crate::platform::MutexGuard;
use crate::platform::Ordering;
use crate::platform::RwLock;
use crate::platform::ThreadBuilder;
use crate::platform::current_thread;
use crate::platform::fence;
use crate::platform::thread_local;
use crate::signal::Signal;
use crate::unwind;
use crate::util::VictimRng;

// -----------------------------------------------------------------------------
// Thread pool worker leases

/// A lease is a capability that the thread pool hands out to threads, allowing
/// them to act as a worker on that pool. It owns the worker's local deque,
/// whose stealer has already been published to the other workers.
struct Lease {
    thread_pool: &'static ThreadPool,
    index: usize,
    queue: JobQueue,
}

// -----------------------------------------------------------------------------
// Thread pool types

/// The `ThreadPool` object is used to orchestrate and distribute work to a pool
/// of threads. Every parallel loop and reduction runs on one.
///
/// # Creating Thread Pools
///
/// Thread pools must be static and const constructed. To create a new thread
/// pool, just call [`ThreadPool::new`]. Most programs never need to: the free
/// functions such as [`crate::for_each`] and [`crate::reduce`] use the
/// process-wide [`THREAD_POOL`].
///
/// ```
/// use parloop::IndexRange;
/// use parloop::ThreadPool;
///
/// // Allocate a new thread pool.
/// static THREAD_POOL: ThreadPool = ThreadPool::new();
///
/// // Give it four worker threads.
/// THREAD_POOL.resize_to(4);
///
/// // Sum the squares of 0..8, two indices per serial chunk.
/// let range = IndexRange::new(0, 8).with_chunk(2).unwrap();
/// let sum = THREAD_POOL.reduce_with(range, |i| i * i, |a, b| a + b);
/// assert_eq!(sum, Some(140));
///
/// // Halt all the threads in the pool.
/// THREAD_POOL.depopulate();
/// ```
///
/// # Resizing Thread Pools
///
/// Thread pools are dynamically sized; they start with zero threads and you
/// add threads by resizing them. The simplest way to resize a pool is via
/// [`ThreadPool::resize_to_available`], which starts one worker per available
/// core. More granular control is possible through [`ThreadPool::grow`],
/// [`ThreadPool::shrink`], [`ThreadPool::resize_to`] or
/// [`ThreadPool::resize_per_core`].
///
/// A call into an empty pool starts a single worker, so that the call can make
/// progress.
pub struct ThreadPool {
    state: Mutex<ThreadPoolState>,
    /// One slot per lease; idle workers steal through these.
    stealers: RwLock<Vec<Option<Stealer<JobRef>>>>,
    /// Signalled when a job becomes available to sleeping workers.
    job_is_ready: Condvar,
    /// Number of workers blocked on `job_is_ready`.
    sleeping: AtomicUsize,
    /// Number of jobs in `ThreadPoolState::injected_jobs`.
    injected: AtomicUsize,
    /// Number of managed worker threads.
    size: AtomicUsize,
}

struct ThreadPoolState {
    /// Jobs submitted by threads that are not workers of this pool.
    injected_jobs: VecDeque<JobRef>,
    /// Worker threads spawned by the pool.
    managed_workers: Vec<ManagedWorker>,
}

impl ThreadPoolState {
    fn claim_injected_job(&mut self, injected: &AtomicUsize) -> Option<JobRef> {
        let job = self.injected_jobs.pop_front();
        if job.is_some() {
            injected.fetch_sub(1, Ordering::Relaxed);
        }
        job
    }
}

/// Represents a worker thread that is managed by the pool.
struct ManagedWorker {
    /// Tells the thread to shut down when set to true.
    halt: Arc<AtomicBool>,
    /// The handle used to wait for the thread to complete.
    handle: JoinHandle<()>,
}

/// The process-wide pool used by the free functions of this crate.
///
/// It is populated on first use (see [`global_pool`]) and lives for the rest
/// of the program. It can be resized like any other pool.
#[cfg(not(loom))]
pub static THREAD_POOL: ThreadPool = ThreadPool::new();

#[cfg(not(loom))]
static GLOBAL_POOL_INIT: Once = Once::new();

/// Returns the process-wide pool, starting its workers if this is the first
/// call.
///
/// The initial size comes from the `PARLOOP_NUM_THREADS` environment variable
/// when it holds a positive integer, and from the number of available cores
/// otherwise. If the pool was already resized by hand, it is left alone.
#[cfg(not(loom))]
pub fn global_pool() -> &'static ThreadPool {
    GLOBAL_POOL_INIT.call_once(|| {
        let size = config::num_threads();
        debug!("initializing global thread pool with {} thread(s)", size);
        THREAD_POOL.resize(|current_size| {
            if current_size == 0 {
                size
            } else {
                current_size
            }
        });
    });
    &THREAD_POOL
}

// -----------------------------------------------------------------------------
// Thread pool creation and maintenance

#[allow(clippy::new_without_default)]
impl ThreadPool {
    /// Creates a new thread pool with no threads.
    #[cfg(not(loom))]
    pub const fn new() -> ThreadPool {
        ThreadPool {
            state: Mutex::new(ThreadPoolState {
                injected_jobs: VecDeque::new(),
                managed_workers: Vec::new(),
            }),
            stealers: RwLock::new(Vec::new()),
            job_is_ready: Condvar::new(),
            sleeping: AtomicUsize::new(0),
            injected: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
        }
    }

    /// Non-const constructor variant for loom, whose primitives can not be
    /// built in a const context.
    #[cfg(loom)]
    pub fn new() -> ThreadPool {
        ThreadPool {
            state: Mutex::new(ThreadPoolState {
                injected_jobs: VecDeque::new(),
                managed_workers: Vec::new(),
            }),
            stealers: RwLock::new(Vec::new()),
            job_is_ready: Condvar::new(),
            sleeping: AtomicUsize::new(0),
            injected: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ThreadPoolState> {
        // No job ever runs while the lock is held, so a poisoned lock still
        // holds consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the number of worker threads currently managed by the pool.
    pub fn num_threads(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Resizes the thread pool to one worker per available core. Returns the
    /// new size of the pool.
    pub fn resize_to_available(&'static self) -> usize {
        self.resize_per_core(1)
    }

    /// Resizes the thread pool to `multiple` workers per available core.
    /// Returns the new size of the pool.
    pub fn resize_per_core(&'static self, multiple: usize) -> usize {
        let available = available_parallelism().map(NonZero::get).unwrap_or(1);
        self.resize_to(available.saturating_mul(multiple))
    }

    /// Resizes the pool to the specified number of threads. Returns the new
    /// size of the thread pool, which may be smaller than requested.
    pub fn resize_to(&'static self, new_size: usize) -> usize {
        self.resize(|_| new_size)
    }

    /// Adds the given number of threads to the thread pool. Returns the new
    /// size of the pool, which may be smaller than requested.
    pub fn grow(&'static self, added_threads: usize) -> usize {
        self.resize(|current_size| current_size.saturating_add(added_threads))
    }

    /// Removes the given number of threads from the thread pool. Returns the
    /// new size of the pool.
    pub fn shrink(&'static self, terminated_threads: usize) -> usize {
        self.resize(|current_size| current_size.saturating_sub(terminated_threads))
    }

    /// Ensures that there is at least one worker thread attached to the thread
    /// pool. Returns the new size of the pool, which will be either the old
    /// size or one.
    pub fn populate(&'static self) -> usize {
        self.resize(
            |current_size| {
                if current_size == 0 { 1 } else { current_size }
            },
        )
    }

    /// Removes all worker threads from the thread pool. Calls that are still
    /// running on the pool when this happens will never complete, so this
    /// should only be done once the pool is idle.
    pub fn depopulate(&'static self) -> usize {
        self.resize_to(0)
    }

    /// Resizes the pool, and returns the new size.
    ///
    /// Note that the new size may be different from the size requested, if
    /// the operating system refuses to start more threads.
    #[cold]
    pub fn resize<F>(&'static self, get_size: F) -> usize
    where
        F: Fn(usize) -> usize,
    {
        debug!("starting thread pool resize");

        // Resizing a pool is a critical section; only one thread can resize the
        // pool at a time. This is implemented using the state mutex.
        let mut state = self.lock_state();

        let current_size = state.managed_workers.len();
        let new_size = get_size(current_size);

        trace!(
            "attempting to resize thread pool from {} to {} thread(s)",
            current_size, new_size
        );

        match new_size.cmp(&current_size) {
            cmp::Ordering::Equal => {
                debug!("completed thread pool resize, size unchanged");
                return current_size;
            }
            cmp::Ordering::Greater => {
                for _ in current_size..new_size {
                    let lease = self.claim_lease();
                    let index = lease.index;
                    debug!("spawning managed worker with index {}", index);
                    let halt = Arc::new(AtomicBool::new(false));
                    let worker_halt = halt.clone();
                    let spawned = ThreadBuilder::new()
                        .name(format!("parloop-worker-{index}"))
                        .spawn(move || managed_worker(lease, worker_halt));
                    match spawned {
                        Ok(handle) => state.managed_workers.push(ManagedWorker { halt, handle }),
                        Err(error) => {
                            // The lease was dropped with the closure; free its slot.
                            self.release_lease(index);
                            warn!("failed to spawn worker thread {}: {}", index, error);
                            break;
                        }
                    }
                }
            }
            cmp::Ordering::Less => {
                // Pull the workers we intend to halt out of the state.
                let terminating_workers = state.managed_workers.split_off(new_size);

                for worker in &terminating_workers {
                    worker.halt.store(true, Ordering::Relaxed);
                }

                // Wake any sleeping workers to ensure they will see the halt flag.
                self.job_is_ready.notify_all();
                self.size.store(state.managed_workers.len(), Ordering::Relaxed);
                drop(state);

                let own_id = current_thread().id();
                for worker in terminating_workers {
                    // It's possible we may be trying to terminate ourselves, in
                    // which case we can skip the thread-join.
                    if worker.handle.thread().id() != own_id {
                        let _ = worker.handle.join();
                    }
                }

                debug!("completed thread pool resize");
                return self.num_threads();
            }
        }

        let size = state.managed_workers.len();
        self.size.store(size, Ordering::Relaxed);
        debug!("completed thread pool resize");
        size
    }

    /// Claims a lease on the thread pool: creates a local deque and publishes
    /// its stealer in the first free slot.
    fn claim_lease(&'static self) -> Lease {
        let queue = JobQueue::new();
        let stealer = queue.stealer();
        let mut stealers = self.stealers.write().unwrap_or_else(PoisonError::into_inner);

        let index = match stealers.iter().position(Option::is_none) {
            Some(index) => {
                stealers[index] = Some(stealer);
                index
            }
            None => {
                stealers.push(Some(stealer));
                stealers.len() - 1
            }
        };

        Lease {
            thread_pool: self,
            index,
            queue,
        }
    }

    /// Frees the stealer slot of a lease whose worker has exited.
    fn release_lease(&self, index: usize) {
        let mut stealers = self.stealers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = stealers.get_mut(index) {
            *slot = None;
        }
    }

    /// Returns true if `other` is this thread pool.
    #[inline(always)]
    pub fn is(&self, other: &ThreadPool) -> bool {
        ptr::eq(self, other)
    }

    /// Runs the provided closure on a worker of this pool, and returns the
    /// result.
    ///
    /// This is the nested-call guard: if the calling thread is already a
    /// worker of this pool, the closure runs right here, on the calling worker,
    /// and any work it forks goes to that worker's deque. Submitting it to the
    /// pool instead could leave every worker blocked on work that no free
    /// worker is left to run. Any other thread injects the closure into the
    /// pool as a single job and sleeps until it has completed.
    #[inline]
    pub fn in_worker<F, R>(&'static self, f: F) -> R
    where
        F: FnOnce(&Worker) -> R + Send,
        R: Send,
    {
        Worker::with_current(|worker| match worker {
            Some(worker) if worker.thread_pool.is(self) => {
                trace!("nested call on worker {}, running inline", worker.index);
                f(worker)
            }
            _ => self.in_worker_cold(f),
        })
    }

    /// Injects the closure into the pool and blocks until it has run.
    ///
    /// This is the slow path of `in_worker`, covering "external calls" from
    /// outside the pool. Never call this directly.
    #[cold]
    fn in_worker_cold<F, R>(&'static self, f: F) -> R
    where
        F: FnOnce(&Worker) -> R + Send,
        R: Send,
    {
        if self.num_threads() == 0 {
            self.populate();
        }

        let stack_job = StackJob::new(f);

        // SAFETY: The `StackJob` lives on this stack frame and is not moved. The
        // frame does not return before the job's signal has been received, and
        // the job is sent out exactly once.
        let job_ref = unsafe { stack_job.as_job_ref() };
        self.inject(job_ref);

        // SAFETY: This thread is the only receiver of this signal.
        let result = unsafe { stack_job.signal().recv() };
        unwind::resume(result)
    }

    /// Queues a job from outside the pool and wakes a worker to take it.
    fn inject(&self, job_ref: JobRef) {
        trace!("injecting job into thread pool");
        let mut state = self.lock_state();
        state.injected_jobs.push_back(job_ref);
        self.injected.fetch_add(1, Ordering::Relaxed);
        self.job_is_ready.notify_one();
    }

    /// Wakes one sleeping worker, if there is any, after a job was pushed on a
    /// worker deque.
    #[inline]
    fn notify_job_ready(&self) {
        // Pairs with the fence in `managed_worker`: either the sleeper sees the
        // new job when it re-checks, or we see the sleeper here.
        fence(Ordering::SeqCst);
        if self.sleeping.load(Ordering::Relaxed) > 0 {
            let _state = self.lock_state();
            self.job_is_ready.notify_one();
        }
    }

    /// Takes a job that was injected from outside, or steals one from another
    /// worker's deque, starting at a random victim.
    fn find_shared_job(&self, thief: &Worker) -> Option<JobRef> {
        if self.injected.load(Ordering::Relaxed) > 0 {
            if let Some(job) = self.lock_state().claim_injected_job(&self.injected) {
                return Some(job);
            }
        }
        self.steal(thief)
    }

    fn steal(&self, thief: &Worker) -> Option<JobRef> {
        let stealers = self.stealers.read().unwrap_or_else(PoisonError::into_inner);
        let num_stealers = stealers.len();
        if num_stealers <= 1 {
            return None;
        }

        let start = thief.rng.below(num_stealers);

        (start..num_stealers)
            .chain(0..start)
            .filter(|&index| index != thief.index)
            .filter_map(|index| stealers[index].as_ref())
            .find_map(|stealer| loop {
                match stealer.steal() {
                    Steal::Success(job) => break Some(job),
                    Steal::Empty => break None,
                    Steal::Retry => continue,
                }
            })
    }
}

// -----------------------------------------------------------------------------
// Worker thread data

thread_local! {
    static WORKER_PTR: Cell<*const Worker> = const { Cell::new(ptr::null()) };
}

/// Holds the local context for a thread pool member, which allows forking,
/// executing and stealing jobs on the pool.
///
/// Every worker thread has exactly one worker, which may be accessed at any
/// time by calling [`Worker::with_current`]. Code running on the pool usually
/// receives a `&Worker` directly, and can use it to run nested loops and
/// reductions without going through the nested-call check again.
pub struct Worker {
    thread_pool: &'static ThreadPool,
    index: usize,
    queue: JobQueue,
    rng: VictimRng,
}

impl Worker {
    /// Calls the provided closure on the thread's worker instance, if it has one.
    ///
    /// Rust's thread locals are fairly costly, so this function is expensive.
    /// If you can avoid calling it, do so.
    #[inline]
    pub fn map_current<F, R>(f: F) -> Option<R>
    where
        F: FnOnce(&Worker) -> R,
    {
        Worker::with_current(|worker| worker.map(f))
    }

    /// Looks up the current `Worker` instance from the thread local.
    ///
    /// Rust's thread locals are fairly costly, so this function is expensive.
    /// If you can avoid calling it, do so.
    #[inline]
    pub fn with_current<F, R>(f: F) -> R
    where
        F: FnOnce(Option<&Worker>) -> R,
    {
        let worker_ptr = WORKER_PTR.with(Cell::get);
        if worker_ptr.is_null() {
            f(None)
        } else {
            // SAFETY: The `WORKER_PTR` static is only set by `occupy`, and it's
            // always set to a stack-allocated `Worker` which is never moved and
            // is only accessed through shared references. It is reset before
            // that worker is dropped. Therefore, if the pointer is non-null, it
            // must be safe to dereference.
            //
            // This creates a reference with an unbounded lifetime. To avoid
            // turning it into a `'static`, we pass it in to a closure.
            f(Some(unsafe { &*worker_ptr }))
        }
    }

    /// Returns true if the calling thread is a worker of any thread pool.
    #[inline]
    pub fn is_worker_thread() -> bool {
        !WORKER_PTR.with(Cell::get).is_null()
    }

    /// Turns the calling thread into the worker described by `lease` for the
    /// duration of the closure.
    fn occupy<F, R>(lease: Lease, f: F) -> R
    where
        F: FnOnce(&Worker) -> R,
    {
        trace!("occupying lease");

        let span = trace_span!("occupy", lease = lease.index);
        let _enter = span.enter();

        let Lease {
            thread_pool,
            index,
            queue,
        } = lease;

        let worker = Worker {
            thread_pool,
            index,
            queue,
            rng: VictimRng::new(),
        };

        let outer_ptr = WORKER_PTR.with(|ptr| ptr.replace(&worker));

        let result = f(&worker);

        // Execute the work queue until it's empty.
        while let Some(job_ref) = worker.queue.pop() {
            job_ref.execute(&worker);
        }
        debug_assert!(worker.queue.is_empty());

        WORKER_PTR.with(|ptr| ptr.set(outer_ptr));
        thread_pool.release_lease(index);

        trace!("vacating lease");

        result
    }

    /// Returns the index of this worker within its pool.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the pool this worker belongs to.
    #[inline]
    pub fn thread_pool(&self) -> &'static ThreadPool {
        self.thread_pool
    }

    /// Tries to find a job to execute: first in the local deque, then among
    /// the jobs injected from outside, then by stealing from other workers.
    #[inline]
    fn find_work(&self) -> Option<JobRef> {
        self.queue
            .pop()
            .or_else(|| self.thread_pool.find_shared_job(self))
    }

    /// Runs jobs until the provided signal is received. When this thread runs
    /// out of local or shared work and the signal is still yet to be received,
    /// this puts the thread to sleep, and the thread will not wake again until
    /// the signal is received.
    fn wait_for_signal<T>(&self, signal: &Signal<T>) -> T
    where
        T: Send,
    {
        loop {
            // SAFETY: `try_recv` and `recv` are only called by the thread that
            // owns the stack frame holding the signal.
            if let Some(value) = unsafe { signal.try_recv() } {
                return value;
            }

            match self.find_work() {
                Some(job_ref) => job_ref.execute(self),
                // SAFETY: As above.
                None => return unsafe { signal.recv() },
            }
        }
    }

    /// Takes two closures and *potentially* runs them in parallel, then returns
    /// the results.
    ///
    /// The closure `b` is pushed onto this worker's deque, where any idle
    /// worker may steal it, while `a` runs right away on this thread. If
    /// nobody stole `b` by the time `a` finishes, this worker runs it too.
    ///
    /// A panic in either closure is resumed here, on the joining thread, after
    /// both closures have finished or `b` has been discarded unexecuted.
    #[inline]
    pub fn join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce(&Worker) -> RA + Send,
        B: FnOnce(&Worker) -> RB + Send,
        RA: Send,
        RB: Send,
    {
        let stack_job = StackJob::new(b);

        // SAFETY: The `StackJob` is allocated on the stack just above, is never
        // moved while the `JobRef` exists, and this function does not return or
        // unwind before the `JobRef` has either been executed or reclaimed from
        // the deque. We also clearly never create more than one `JobRef` for it.
        let job_ref = unsafe { stack_job.as_job_ref() };
        let job_ref_id = job_ref.id();

        self.queue.push(job_ref);
        self.thread_pool.notify_job_ready();

        // Run the first closure directly. A panic is held until `b` is settled.
        let result_a = unwind::catch(|| a(self));

        // Attempt to recover the job from the deque. It should still be there
        // if nobody stole it.
        if let Some(job) = self.queue.pop() {
            if job.id() == job_ref_id {
                // SAFETY: Because the ids match, the `JobRef` we just popped
                // points to `stack_job`, which therefore has not been executed,
                // and the `JobRef` is discarded here.
                let b = unsafe { stack_job.unwrap() };
                // If `a` panicked, `b` is dropped without running.
                let result_a = unwind::resume(result_a);
                return (result_a, b(self));
            }

            // Our job was stolen. This one belongs to an enclosing join on this
            // thread, and it still has to run.
            job.execute(self);
        }

        let result_b = self.wait_for_signal(stack_job.signal());
        (unwind::resume(result_a), unwind::resume(result_b))
    }
}

// -----------------------------------------------------------------------------
// Thread pool scheduling api

impl ThreadPool {
    /// Executes the two closures, possibly in parallel, and returns the
    /// results.
    ///
    /// See also: [`Worker::join`] and [`join`].
    #[inline]
    pub fn join<A, B, RA, RB>(&'static self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce(&Worker) -> RA + Send,
        B: FnOnce(&Worker) -> RB + Send,
        RA: Send,
        RB: Send,
    {
        self.in_worker(|worker| worker.join(a, b))
    }
}

/// Executes two closures on the global thread pool and returns the results.
///
/// See also: [`Worker::join`] and [`ThreadPool::join`].
#[cfg(not(loom))]
pub fn join<A, B, RA, RB>(a: A, b: B) -> (RA, RB)
where
    A: FnOnce(&Worker) -> RA + Send,
    B: FnOnce(&Worker) -> RB + Send,
    RA: Send,
    RB: Send,
{
    global_pool().join(a, b)
}

// -----------------------------------------------------------------------------
// Main worker loop

/// This is the main loop for a worker thread. It's in charge of executing jobs.
/// Operating on the principle that you should finish what you start before
/// starting something new, workers will first execute their own deque, then
/// injected jobs, then steal from other workers, and only then go to sleep.
fn managed_worker(lease: Lease, halt: Arc<AtomicBool>) {
    trace!("starting managed worker");

    Worker::occupy(lease, |worker| {
        let thread_pool = worker.thread_pool;
        loop {
            if let Some(job) = worker.find_work() {
                job.execute(worker);
                continue;
            }

            let mut state = thread_pool.lock_state();
            if halt.load(Ordering::Relaxed) {
                break;
            }

            // Announce that we are about to sleep, then look one last time.
            // Pairs with the fence in `ThreadPool::notify_job_ready`.
            thread_pool.sleeping.fetch_add(1, Ordering::Relaxed);
            fence(Ordering::SeqCst);

            let job = state
                .claim_injected_job(&thread_pool.injected)
                .or_else(|| thread_pool.steal(worker));

            if let Some(job) = job {
                thread_pool.sleeping.fetch_sub(1, Ordering::Relaxed);
                drop(state);
                job.execute(worker);
                continue;
            }

            state = thread_pool
                .job_is_ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            thread_pool.sleeping.fetch_sub(1, Ordering::Relaxed);
            drop(state);
        }
    });

    trace!("exiting managed worker");
}
