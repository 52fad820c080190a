//! A one-shot signal used to hand the outcome of a forked job back to the
//! thread that is joining on it.
//!
//! The waiting side parks on a futex (through `atomic-wait`) instead of
//! spinning, so an external caller blocked on a whole task tree costs nothing
//! while the pool works.

use core::cell::UnsafeCell;

use crate::platform::AtomicU32;
use crate::platform::Ordering;
use crate::platform::wait;
use crate::platform::wake_one;

// -----------------------------------------------------------------------------
// States

/// Nothing sent, nobody waiting.
const IDLE: u32 = 0b00;

/// Set by the receiver before it parks; tells the sender to wake it.
const WAIT: u32 = 0b01;

/// Set by the sender once the value has been written.
const SENT: u32 = 0b10;

// -----------------------------------------------------------------------------
// Signal

/// Transmits a single value across threads, exactly once.
///
/// A signal has exactly one receiving thread (the owner of the stack frame it
/// lives in) and at most one sender. After `send` returns the signal may
/// already have been deallocated by the receiver.
pub struct Signal<T> {
    state: AtomicU32,
    value: UnsafeCell<Option<T>>,
}

impl<T: Send> Signal<T> {
    /// Creates a new, unsent signal.
    pub fn new() -> Self {
        Self {
            state: AtomicU32::new(IDLE),
            value: UnsafeCell::new(None),
        }
    }

    /// Returns true if a value has been sent and not yet received.
    #[inline(always)]
    pub fn is_sent(&self) -> bool {
        self.state.load(Ordering::Acquire) & SENT != 0
    }

    /// Receives the value if it has been sent, without blocking.
    ///
    /// # Panics
    ///
    /// Panics if the value has already been received.
    ///
    /// # Safety
    ///
    /// `try_recv` and `recv` must only ever be called from one thread.
    #[inline]
    pub unsafe fn try_recv(&self) -> Option<T> {
        if self.is_sent() {
            // SAFETY: The sender writes the value exactly once, before setting
            // SENT with release ordering, and never touches it afterwards. The
            // acquire load above synchronizes with that write, and the caller
            // guarantees no other thread is receiving.
            Some(unsafe { self.take() })
        } else {
            None
        }
    }

    /// Receives the value, parking the thread until it has been sent.
    ///
    /// # Panics
    ///
    /// Panics if the value has already been received.
    ///
    /// # Safety
    ///
    /// `try_recv` and `recv` must only ever be called from one thread.
    #[cold]
    pub unsafe fn recv(&self) -> T {
        loop {
            let state = self.state.fetch_or(WAIT, Ordering::Acquire);
            if state & SENT != 0 {
                // SAFETY: See `try_recv`.
                return unsafe { self.take() };
            }
            // Sleep only while the state is still "waiting, not sent"; a
            // concurrent send changes the state and makes this return.
            wait(&self.state, state | WAIT);
        }
    }

    /// Moves the value out of the cell.
    ///
    /// # Safety
    ///
    /// The SENT bit must have been observed with acquire ordering, and the
    /// caller must be the single receiving thread.
    unsafe fn take(&self) -> T {
        // SAFETY: Guaranteed by the caller; the sender is done with the cell.
        let value = unsafe { (*self.value.get()).take() };
        match value {
            Some(value) => value,
            None => panic!("attempted to receive a signal twice"),
        }
    }

    /// Sends a value to the receiving thread, waking it if it is parked.
    ///
    /// # Panics
    ///
    /// Panics if the signal has already been sent.
    ///
    /// # Safety
    ///
    /// `signal` must be valid to dereference on entry. Setting the SENT bit
    /// may let the receiver return and free the signal, which is why this takes
    /// a raw pointer instead of `&self`; the caller must not touch the signal
    /// after this returns.
    #[inline(always)]
    pub unsafe fn send(signal: *const Self, value: T) {
        // SAFETY: Valid on entry per the caller, and the receiver cannot free it
        // before SENT is set below.
        let this = unsafe { &*signal };
        let state_ptr: *const AtomicU32 = &this.state;

        if this.state.load(Ordering::Relaxed) & SENT != 0 {
            panic!("attempted to send value over signal, but signal has already been sent");
        }

        // SAFETY: The receiver only reads the cell after observing SENT, which
        // has not been set yet, so this thread has exclusive access.
        unsafe { *this.value.get() = Some(value) };

        // Note: After this, `this` may dangle.
        let state = this.state.fetch_or(SENT, Ordering::Release);
        if state & WAIT != 0 {
            // The receiver is parked or about to park on this address. The
            // futex wake only uses the address, it never reads the memory.
            wake_one(state_ptr);
        }
    }
}

impl<T: Send> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: References to signals cross threads (one sender, one receiver), and
// the value itself is moved between them, so `T: Send` is all that is needed.
unsafe impl<T: Send> Sync for Signal<T> {}
