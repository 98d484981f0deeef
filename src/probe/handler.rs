//! Entry and exit interceptors for `attach_recursive_mnt`.
//!
//! Entry decides whether this attach should see a private destination and,
//! if so, clears `MNT_SHARED` on it after saving the original word. Exit
//! writes the saved word back. Both run inline on the mount path: no
//! locks, no allocation, bounded work.

use core::ffi::CStr;
use core::sync::atomic::{AtomicU64, Ordering};

use super::{AttachArgs, InvocationRecord};
use crate::gate::{self, GateState};
use crate::mount::{MntFlags, MountLayout, MountRef};

/// Why the entry interceptor left the destination alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Hook is not (or no longer) active.
    Inactive,
    /// Null source or destination mount.
    InvalidArgument,
    /// Propagation is not paused.
    NotPaused,
    /// Past the milestone and the source is not the captured device.
    DeviceMismatch,
    /// Destination is already private.
    AlreadyPrivate,
}

/// Outcome of one entry interception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDecision {
    Spoofed,
    Skipped(SkipReason),
}

/// Override/restore counters.
#[derive(Debug, Default)]
pub struct HookStats {
    overrides: AtomicU64,
    restores: AtomicU64,
}

impl HookStats {
    pub const fn new() -> Self {
        Self {
            overrides: AtomicU64::new(0),
            restores: AtomicU64::new(0),
        }
    }

    pub fn overrides(&self) -> u64 {
        self.overrides.load(Ordering::Relaxed)
    }

    pub fn restores(&self) -> u64 {
        self.restores.load(Ordering::Relaxed)
    }
}

/// Everything the interceptors read, borrowed from the owning hook.
#[derive(Clone, Copy)]
pub struct Interceptor<'a> {
    gate: &'a GateState,
    layout: MountLayout,
    stats: &'a HookStats,
}

impl<'a> Interceptor<'a> {
    pub fn new(gate: &'a GateState, layout: MountLayout, stats: &'a HookStats) -> Self {
        Self {
            gate,
            layout,
            stats,
        }
    }

    /// Runs right before the real attach. Always resets `record` first.
    pub fn on_entry(&self, args: AttachArgs, record: &mut InvocationRecord) -> EntryDecision {
        *record = InvocationRecord::EMPTY;

        // SAFETY: the interposition hands us the live arguments of the call
        // being intercepted; both mounts outlive it.
        let source = unsafe { MountRef::from_raw(args.source, self.layout) };
        let dest = unsafe { MountRef::from_raw(args.dest, self.layout) };
        let (Some(source), Some(dest)) = (source, dest) else {
            trace!(
                "mount_hook: ignoring attach with source={:p} dest={:p}",
                args.source,
                args.dest
            );
            return EntryDecision::Skipped(SkipReason::InvalidArgument);
        };

        let source_name = source.devname().map(CStr::to_bytes);

        if let Some(name) = source_name {
            if !self.gate.fingerprint().is_settled() && gate::is_loop_device(name) {
                self.gate.try_capture_fingerprint(name);
            }
        }

        if !self.gate.is_paused() {
            return EntryDecision::Skipped(SkipReason::NotPaused);
        }

        if self.gate.milestone_reached() {
            let ours = source_name.is_some_and(|name| self.gate.fingerprint().matches(name));
            if !ours {
                debug!(
                    "mount_hook: source {} is not the captured device, leaving {:p} shared",
                    source_name.map_or("<none>", gate::printable),
                    dest.as_ptr()
                );
                return EntryDecision::Skipped(SkipReason::DeviceMismatch);
            }
        }

        if !dest.flags().contains(MntFlags::SHARED) {
            return EntryDecision::Skipped(SkipReason::AlreadyPrivate);
        }

        info!(
            "mount_hook: propagation paused, spoofing shared mount {:p} to private",
            dest.as_ptr()
        );
        self.stats.overrides.fetch_add(1, Ordering::Relaxed);

        // Override window opens here and stays open until `on_exit`. It is
        // only sound while nothing else writes dest's mnt_flags meanwhile;
        // the host's namespace locking is what provides that.
        record.original_flags = dest.clear_flags(MntFlags::SHARED);
        record.target = Some(dest);
        record.spoofed = true;
        EntryDecision::Spoofed
    }

    /// Runs right after the real attach returns. Returns `true` if flags
    /// were written back. A record is restored at most once.
    pub fn on_exit(&self, record: &mut InvocationRecord) -> bool {
        if !record.spoofed {
            return false;
        }
        let Some(target) = record.target.take() else {
            return false;
        };

        target.store_flags(record.original_flags);
        // Override window closed.

        self.stats.restores.fetch_add(1, Ordering::Relaxed);
        info!(
            "mount_hook: restored original shared flags to mount {:p}",
            target.as_ptr()
        );
        true
    }
}
