use core::cell::Cell;
#[cfg(not(loom))]
use core::hash::Hasher;
#[cfg(not(loom))]
use core::sync::atomic::AtomicU64;
#[cfg(not(loom))]
use core::sync::atomic::Ordering;
#[cfg(not(loom))]
use std::hash::DefaultHasher;

/// Picks the deque a worker tries to steal from first, so that idle workers
/// spread out instead of all hitting the same victim.
///
/// This is a [xorshift*] generator; its quality hardly matters here.
///
/// [xorshift*]: https://en.wikipedia.org/wiki/Xorshift#xorshift*
pub struct VictimRng {
    state: Cell<u64>,
}

impl VictimRng {
    #[cfg(not(loom))]
    pub fn new() -> VictimRng {
        static NEXT_SEED: AtomicU64 = AtomicU64::new(0);
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(NEXT_SEED.fetch_add(1, Ordering::Relaxed));
        // The state must never be zero.
        VictimRng {
            state: Cell::new(hasher.finish() | 1),
        }
    }

    /// Under loom every execution of a model must make the same choices.
    #[cfg(loom)]
    pub fn new() -> VictimRng {
        VictimRng {
            state: Cell::new(0x9e37_79b9_7f4a_7c15),
        }
    }

    /// Returns a value in `0..n`. `n` must not be zero.
    pub fn below(&self, n: usize) -> usize {
        debug_assert!(n > 0);
        let mut x = self.state.get();
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state.set(x);
        let r = x.wrapping_mul(0x2545_f491_4f6c_dd1d);
        // Multiply-shift range reduction.
        ((u128::from(r) * n as u128) >> 64) as usize
    }
}
