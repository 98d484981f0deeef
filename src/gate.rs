//! Process-wide gate consulted on every intercepted attach.
//!
//! Every field is an independent single-word atomic. A write becomes
//! visible to interceptors "eventually": calls already past the gate check
//! keep the decision they made, there is no barrier with in-flight calls.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

/// Device name prefix of loop-backed sources (the managed image).
pub const LOOP_DEVICE_PREFIX: &[u8] = b"/dev/block/loop";

/// Longest device name the fingerprint can hold.
pub const FINGERPRINT_MAX: usize = 64;

const EMPTY: u8 = 0;
const CAPTURING: u8 = 1;
const CAPTURED: u8 = 2;
/// First loop source did not fit; the latch is spent and matches nothing.
const UNUSABLE: u8 = 3;

/// Whether `name` looks like a loop-backed source device.
pub fn is_loop_device(name: &[u8]) -> bool {
    name.starts_with(LOOP_DEVICE_PREFIX)
}

pub(crate) fn printable(name: &[u8]) -> &str {
    core::str::from_utf8(name).unwrap_or("<non-utf8>")
}

/// Write-once device name.
///
/// A single compare-and-set claims the buffer, so exactly one caller ever
/// writes it; readers only look at the payload after the `CAPTURED` store.
pub struct Fingerprint {
    state: AtomicU8,
    len: AtomicUsize,
    buf: UnsafeCell<[u8; FINGERPRINT_MAX]>,
}

// The buffer is written once by the CAS winner before the Release store of
// CAPTURED, and only read after observing CAPTURED with Acquire.
unsafe impl Sync for Fingerprint {}

impl Fingerprint {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            len: AtomicUsize::new(0),
            buf: UnsafeCell::new([0; FINGERPRINT_MAX]),
        }
    }

    pub fn is_captured(&self) -> bool {
        self.state.load(Ordering::Acquire) == CAPTURED
    }

    /// Whether the first loop source has already been seen, usable or not.
    pub fn is_settled(&self) -> bool {
        self.state.load(Ordering::Acquire) != EMPTY
    }

    /// The captured name, or `None` while unset or mid-capture.
    pub fn get(&self) -> Option<&[u8]> {
        if !self.is_captured() {
            return None;
        }
        let len = self.len.load(Ordering::Relaxed);
        // SAFETY: no writer exists once CAPTURED is visible.
        Some(unsafe { &(&*self.buf.get())[..len] })
    }

    pub fn matches(&self, name: &[u8]) -> bool {
        self.get() == Some(name)
    }

    /// Capture `candidate` if it is a loop device and nothing was captured
    /// yet. Returns `true` only for the call that performed the capture.
    ///
    /// A first loop source too long to store still consumes the latch, so
    /// a later device can never be mistaken for it.
    pub fn try_capture(&self, candidate: &[u8]) -> bool {
        if !is_loop_device(candidate) {
            return false;
        }
        if candidate.len() > FINGERPRINT_MAX {
            if self
                .state
                .compare_exchange(EMPTY, UNUSABLE, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                warn!(
                    "mount_hook: device name of {} bytes exceeds fingerprint limit {}, no device will match",
                    candidate.len(),
                    FINGERPRINT_MAX
                );
            }
            return false;
        }
        if self
            .state
            .compare_exchange(EMPTY, CAPTURING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        // SAFETY: the CAS above made us the only writer, and readers ignore
        // the buffer until CAPTURED is published.
        unsafe { (&mut *self.buf.get())[..candidate.len()].copy_from_slice(candidate) };
        self.len.store(candidate.len(), Ordering::Relaxed);
        self.state.store(CAPTURED, Ordering::Release);
        true
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new()
    }
}

/// Pause switch, milestone latch and device fingerprint.
pub struct GateState {
    paused: AtomicBool,
    milestone: AtomicBool,
    fingerprint: Fingerprint,
}

impl GateState {
    pub const fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            milestone: AtomicBool::new(false),
            fingerprint: Fingerprint::new(),
        }
    }

    /// Enable or disable the SHARED override for subsequent attaches.
    pub fn set_paused(&self, enabled: bool) {
        if enabled {
            info!("mount_hook: pausing mount propagation");
        } else {
            info!("mount_hook: resuming mount propagation");
        }
        self.paused.store(enabled, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Latch the milestone. Later calls are no-ops.
    pub fn signal_milestone(&self) {
        if !self.milestone.swap(true, Ordering::AcqRel) {
            info!("mount_hook: milestone reached, override narrowed to the captured device");
        }
    }

    pub fn milestone_reached(&self) -> bool {
        self.milestone.load(Ordering::Acquire)
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// See [`Fingerprint::try_capture`].
    pub fn try_capture_fingerprint(&self, candidate: &[u8]) -> bool {
        let captured = self.fingerprint.try_capture(candidate);
        if captured {
            info!(
                "mount_hook: captured device fingerprint {}",
                printable(candidate)
            );
        }
        captured
    }
}

impl Default for GateState {
    fn default() -> Self {
        Self::new()
    }
}
