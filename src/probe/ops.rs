//! Glue between the hook and the host's interposition facility.
//!
//! A kretprobe-capable host implements [`InterposeOps`] over its own probe
//! registration; a host without one patches a wrapper into the single call
//! site and uses [`CallSiteOps`].

use core::sync::atomic::{AtomicUsize, Ordering};

/// Linux `EBUSY`: another interposition already owns the target.
pub const EBUSY: i32 = 16;
/// Linux `EINVAL`.
pub const EINVAL: i32 = 22;

/// Host interposition facility.
///
/// Errors are negative errno values, passed through to the caller of
/// `install()` unchanged.
pub trait InterposeOps: Sync {
    /// Start firing the hook's entry/exit handlers around `addr`, with at
    /// most `max_active` invocations tracked at once.
    fn activate(&self, addr: usize, max_active: usize) -> Result<(), i32>;

    /// Stop interposing on `addr`. Must leave no residue once it returns.
    fn deactivate(&self, addr: usize);

    /// Invocations the facility itself dropped for lack of instances
    /// (kretprobe `nmissed`).
    fn missed(&self, _addr: usize) -> u64 {
        0
    }
}

/// Call-site wrapper facility: activation claims the target address.
///
/// The wrapper patched into the kernel routes the call through
/// [`MountHook::around`](super::manager::MountHook::around), which runs
/// the handlers only while the hook is active.
#[derive(Debug, Default)]
pub struct CallSiteOps {
    claimed: AtomicUsize,
}

impl CallSiteOps {
    pub const fn new() -> Self {
        Self {
            claimed: AtomicUsize::new(0),
        }
    }

    /// Address currently claimed, if any.
    pub fn claimed(&self) -> Option<usize> {
        match self.claimed.load(Ordering::Acquire) {
            0 => None,
            addr => Some(addr),
        }
    }
}

impl InterposeOps for CallSiteOps {
    fn activate(&self, addr: usize, max_active: usize) -> Result<(), i32> {
        if addr == 0 || max_active == 0 {
            return Err(-EINVAL);
        }
        self.claimed
            .compare_exchange(0, addr, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| -EBUSY)
    }

    fn deactivate(&self, addr: usize) {
        let _ = self
            .claimed
            .compare_exchange(addr, 0, Ordering::AcqRel, Ordering::Acquire);
    }
}
