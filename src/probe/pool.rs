//! Bounded pool of invocation records.
//!
//! Slot ownership is a bit in one atomic word, so acquire and release are
//! lock-free and never sleep. An exhausted pool does not wait: the caller
//! is told to let the real call run unhooked and the miss is counted.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU64, Ordering};

use super::{InvocationRecord, MAX_ACTIVE};

/// Fixed-capacity record pool, `N <= 64`.
pub struct RecordPool<const N: usize = MAX_ACTIVE> {
    bitmap: AtomicU64,
    missed: AtomicU64,
    slots: [UnsafeCell<InvocationRecord>; N],
}

// A record is only reached through the `Slot` that owns its bitmap bit.
unsafe impl<const N: usize> Sync for RecordPool<N> {}

impl<const N: usize> RecordPool<N> {
    const CAPACITY_CHECK: () = assert!(N > 0 && N <= 64, "record pool holds 1..=64 slots");

    const FULL: u64 = if N == 64 { u64::MAX } else { (1u64 << N) - 1 };

    pub const fn new() -> Self {
        let () = Self::CAPACITY_CHECK;
        Self {
            bitmap: AtomicU64::new(0),
            missed: AtomicU64::new(0),
            slots: [const { UnsafeCell::new(InvocationRecord::EMPTY) }; N],
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Claim a free slot with a fresh record. `None` on overflow, which
    /// also bumps the missed counter.
    pub fn acquire(&self) -> Option<Slot<'_, N>> {
        self.acquire_within(N)
    }

    /// Like [`acquire`](Self::acquire), but only the lowest `limit` slots
    /// are eligible, so at most `limit` records are ever in use at once.
    pub fn acquire_within(&self, limit: usize) -> Option<Slot<'_, N>> {
        let mask = if limit >= N {
            Self::FULL
        } else {
            (1u64 << limit) - 1
        };
        let mut current = self.bitmap.load(Ordering::Relaxed);
        loop {
            let free = !current & mask;
            if free == 0 {
                self.missed.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            let index = free.trailing_zeros() as usize;
            match self.bitmap.compare_exchange_weak(
                current,
                current | (1u64 << index),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    let mut slot = Slot { pool: self, index };
                    *slot.record() = InvocationRecord::EMPTY;
                    return Some(slot);
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, index: usize) {
        self.bitmap.fetch_and(!(1u64 << index), Ordering::Release);
    }

    /// Slots currently held by in-flight calls.
    pub fn in_use(&self) -> usize {
        self.bitmap.load(Ordering::Relaxed).count_ones() as usize
    }

    /// Calls that found the pool exhausted.
    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }
}

impl<const N: usize> Default for RecordPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive claim on one record. Dropping it returns the slot.
pub struct Slot<'a, const N: usize = MAX_ACTIVE> {
    pool: &'a RecordPool<N>,
    index: usize,
}

impl<const N: usize> Slot<'_, N> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn record(&mut self) -> &mut InvocationRecord {
        // SAFETY: this slot owns bit `index` until dropped.
        unsafe { &mut *self.pool.slots[self.index].get() }
    }
}

impl<const N: usize> Drop for Slot<'_, N> {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}
