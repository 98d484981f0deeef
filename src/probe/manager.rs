//! Mount hook lifecycle.
//!
//! Resolves `attach_recursive_mnt`, activates interposition through the
//! host facility, and owns the gate, record pool and counters that the
//! interceptors share. Install/uninstall take a spin lock; the call path
//! never does.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use axerrno::AxError;
use spin::{Mutex, Once};

use super::handler::{EntryDecision, HookStats, Interceptor, SkipReason};
use super::ops::{CallSiteOps, InterposeOps};
use super::pool::RecordPool;
use super::{AttachArgs, InvocationRecord, MAX_ACTIVE, TARGET_SYMBOL};
use crate::gate::GateState;
use crate::mount::MountLayout;

/// Symbol resolver: name to kernel address.
pub type Resolver = fn(&str) -> Option<u64>;

/// Error types for hook lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Target symbol could not be resolved.
    SymbolNotFound(&'static str),
    /// Host interposition facility refused activation (negative errno).
    RegistrationFailed(i32),
    /// `install()` was already called on this hook.
    AlreadyInstalled,
    /// Mount layout offsets are unusable.
    InvalidLayout(&'static str),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::SymbolNotFound(name) => write!(f, "Symbol not found: {}", name),
            Self::RegistrationFailed(code) => write!(f, "Probe registration failed: {}", code),
            Self::AlreadyInstalled => write!(f, "Mount hook already installed"),
            Self::InvalidLayout(why) => write!(f, "Invalid mount layout: {}", why),
        }
    }
}

impl core::error::Error for Error {}

impl From<Error> for AxError {
    fn from(err: Error) -> Self {
        match err {
            Error::SymbolNotFound(_) => AxError::NotFound,
            Error::RegistrationFailed(_) => AxError::ResourceBusy,
            Error::AlreadyInstalled => AxError::AlreadyExists,
            Error::InvalidLayout(_) => AxError::InvalidInput,
        }
    }
}

#[cfg(feature = "symbols")]
fn default_resolver() -> Option<Resolver> {
    Some(crate::symbols::resolve_function)
}

#[cfg(not(feature = "symbols"))]
fn default_resolver() -> Option<Resolver> {
    None
}

/// Install-time configuration.
#[derive(Debug, Clone, Copy)]
pub struct HookConfig {
    symbol: &'static str,
    max_active: usize,
    layout: MountLayout,
    resolver: Option<Resolver>,
    enabled: bool,
}

impl HookConfig {
    /// Hook `attach_recursive_mnt` on a kernel whose `struct mount` matches
    /// `layout`.
    pub fn new(layout: MountLayout) -> Self {
        Self {
            symbol: TARGET_SYMBOL,
            max_active: MAX_ACTIVE,
            layout,
            resolver: default_resolver(),
            enabled: true,
        }
    }

    /// Build without probe support: `install()` succeeds and does nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(MountLayout::new(0, 0))
        }
    }

    pub fn with_symbol(mut self, symbol: &'static str) -> Self {
        self.symbol = symbol;
        self
    }

    /// Concurrency limit handed to the facility, capped at [`MAX_ACTIVE`].
    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = max_active;
        self
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn symbol(&self) -> &'static str {
        self.symbol
    }

    pub fn max_active(&self) -> usize {
        self.max_active.clamp(1, MAX_ACTIVE)
    }

    pub fn layout(&self) -> MountLayout {
        self.layout
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

enum HookState {
    Uninstalled,
    /// Configuration disabled the hook; nothing was registered.
    Inert,
    Installed {
        symbol: &'static str,
        addr: usize,
        ops: &'static dyn InterposeOps,
    },
    Failed,
    Removed,
}

/// Snapshot for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookStatus<'a> {
    pub installed: bool,
    pub paused: bool,
    pub milestone_reached: bool,
    pub fingerprint: Option<&'a [u8]>,
    pub overrides: u64,
    pub restores: u64,
    pub missed: u64,
    pub in_flight: usize,
}

/// One interposition on the attach call plus the state it consults.
pub struct MountHook {
    gate: GateState,
    pool: RecordPool<MAX_ACTIVE>,
    stats: HookStats,
    layout: Once<MountLayout>,
    max_active: AtomicUsize,
    active: AtomicBool,
    state: Mutex<HookState>,
}

impl MountHook {
    pub const fn new() -> Self {
        Self {
            gate: GateState::new(),
            pool: RecordPool::new(),
            stats: HookStats::new(),
            layout: Once::new(),
            max_active: AtomicUsize::new(MAX_ACTIVE),
            active: AtomicBool::new(false),
            state: Mutex::new(HookState::Uninstalled),
        }
    }

    pub fn gate(&self) -> &GateState {
        &self.gate
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Resolve the target and activate interposition. Call once.
    ///
    /// On any failure the hook stays inert: no attach is ever affected.
    pub fn install(&self, config: &HookConfig, ops: &'static dyn InterposeOps) -> Result<(), Error> {
        let mut state = self.state.lock();
        if !matches!(*state, HookState::Uninstalled) {
            error!("mount_hook: install called twice");
            return Err(Error::AlreadyInstalled);
        }

        if !config.is_enabled() {
            info!("mount_hook: mount hook not enabled in this build");
            *state = HookState::Inert;
            return Ok(());
        }

        let result = self.activate(config, ops);
        *state = match result {
            Ok(addr) => HookState::Installed {
                symbol: config.symbol(),
                addr,
                ops,
            },
            Err(_) => HookState::Failed,
        };
        result.map(|_| ())
    }

    fn activate(&self, config: &HookConfig, ops: &'static dyn InterposeOps) -> Result<usize, Error> {
        let symbol = config.symbol();
        config.layout().validate().map_err(|why| {
            error!("mount_hook: unusable mount layout: {}", why);
            Error::InvalidLayout(why)
        })?;

        let addr = config
            .resolver
            .and_then(|resolve| resolve(symbol))
            .filter(|addr| *addr != 0)
            .ok_or_else(|| {
                error!("mount_hook: could not find symbol '{}', hooking failed", symbol);
                Error::SymbolNotFound(symbol)
            })? as usize;

        let max_active = config.max_active();
        if max_active != config.max_active {
            warn!(
                "mount_hook: max_active {} clamped to {}",
                config.max_active, max_active
            );
        }

        // Handlers that fire before `active` is set skip the call.
        self.layout.call_once(|| config.layout());
        self.max_active.store(max_active, Ordering::Relaxed);
        if let Err(code) = ops.activate(addr, max_active) {
            error!("mount_hook: probe registration failed, returned {}", code);
            return Err(Error::RegistrationFailed(code));
        }
        self.active.store(true, Ordering::Release);

        info!(
            "mount_hook: propagation hook registered on {} at {:#x} (max_active={})",
            symbol, addr, max_active
        );
        Ok(addr)
    }

    /// Deactivate interposition and report missed invocations.
    ///
    /// Calls already inside the window still restore their destination.
    pub fn uninstall(&self) -> u64 {
        let mut state = self.state.lock();
        match core::mem::replace(&mut *state, HookState::Removed) {
            HookState::Installed { symbol, addr, ops } => {
                self.active.store(false, Ordering::Release);
                ops.deactivate(addr);
                info!("mount_hook: propagation hook unregistered");

                let missed = self.pool.missed() + ops.missed(addr);
                if missed > 0 {
                    warn!("mount_hook: missed {} instances of {} probe", missed, symbol);
                }
                missed
            }
            HookState::Inert => {
                info!("mount_hook: mount hook not enabled, nothing to unregister");
                0
            }
            previous => {
                *state = previous;
                warn!("mount_hook: uninstall without a successful install");
                0
            }
        }
    }

    fn interceptor(&self) -> Option<Interceptor<'_>> {
        self.layout
            .get()
            .map(|layout| Interceptor::new(&self.gate, *layout, &self.stats))
    }

    /// Entry handler for facilities that own the per-call record.
    pub fn entry_handler(&self, args: AttachArgs, record: &mut InvocationRecord) -> EntryDecision {
        match self.interceptor() {
            Some(interceptor) if self.is_active() => interceptor.on_entry(args, record),
            _ => {
                *record = InvocationRecord::EMPTY;
                EntryDecision::Skipped(SkipReason::Inactive)
            }
        }
    }

    /// Exit handler paired with [`entry_handler`](Self::entry_handler).
    /// Restores even after deactivation so no override outlives its call.
    pub fn exit_handler(&self, record: &mut InvocationRecord) -> bool {
        self.interceptor()
            .is_some_and(|interceptor| interceptor.on_exit(record))
    }

    /// Run `real` (the attach call) with entry/exit interception.
    ///
    /// More than the configured `max_active` calls in flight runs `real`
    /// untouched and counts a miss.
    pub fn around<R>(&self, args: AttachArgs, real: impl FnOnce() -> R) -> R {
        if !self.is_active() {
            return real();
        }
        let Some(interceptor) = self.interceptor() else {
            return real();
        };
        let limit = self.max_active.load(Ordering::Relaxed);
        let Some(mut slot) = self.pool.acquire_within(limit) else {
            return real();
        };

        interceptor.on_entry(args, slot.record());
        let invocation = Invocation { interceptor, slot };
        let ret = real();
        drop(invocation);
        ret
    }

    pub fn status(&self) -> HookStatus<'_> {
        let facility_missed = match *self.state.lock() {
            HookState::Installed { addr, ops, .. } => ops.missed(addr),
            _ => 0,
        };
        HookStatus {
            installed: self.is_active(),
            paused: self.gate.is_paused(),
            milestone_reached: self.gate.milestone_reached(),
            fingerprint: self.gate.fingerprint().get(),
            overrides: self.stats.overrides(),
            restores: self.stats.restores(),
            missed: self.pool.missed() + facility_missed,
            in_flight: self.pool.in_use(),
        }
    }
}

impl Default for MountHook {
    fn default() -> Self {
        Self::new()
    }
}

/// Restores on drop, then releases the slot.
struct Invocation<'a> {
    interceptor: Interceptor<'a>,
    slot: super::pool::Slot<'a, MAX_ACTIVE>,
}

impl Drop for Invocation<'_> {
    fn drop(&mut self) {
        self.interceptor.on_exit(self.slot.record());
    }
}

// === Module-level convenience functions ===

/// The hook driven by the control plane.
pub(crate) static MOUNT_HOOK: MountHook = MountHook::new();

static CALL_SITE_OPS: CallSiteOps = CallSiteOps::new();

/// Install on the call-site wrapper facility.
pub fn install(config: &HookConfig) -> Result<(), Error> {
    MOUNT_HOOK.install(config, &CALL_SITE_OPS)
}

/// Install on a host-provided facility.
pub fn install_with(config: &HookConfig, ops: &'static dyn InterposeOps) -> Result<(), Error> {
    MOUNT_HOOK.install(config, ops)
}

pub fn uninstall() -> u64 {
    MOUNT_HOOK.uninstall()
}

pub fn set_paused(enabled: bool) {
    MOUNT_HOOK.gate().set_paused(enabled);
}

pub fn signal_milestone() {
    MOUNT_HOOK.gate().signal_milestone();
}

pub fn status() -> HookStatus<'static> {
    MOUNT_HOOK.status()
}

/// Wrapper for the patched call site of `attach_recursive_mnt`.
pub fn attach_recursive_mnt<R>(source: *mut u8, dest: *mut u8, real: impl FnOnce() -> R) -> R {
    MOUNT_HOOK.around(AttachArgs::new(source, dest), real)
}

/// Entry handler for a kretprobe-style facility (`ri->data` as `record`).
pub fn entry_handler(args: AttachArgs, record: &mut InvocationRecord) -> EntryDecision {
    MOUNT_HOOK.entry_handler(args, record)
}

/// Return handler for a kretprobe-style facility.
pub fn exit_handler(record: &mut InvocationRecord) -> bool {
    MOUNT_HOOK.exit_handler(record)
}
