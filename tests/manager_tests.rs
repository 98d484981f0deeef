//! Integration tests for the hook lifecycle: install, uninstall, failures.

mod common;

use std::sync::atomic::{AtomicU64, Ordering};

use axerrno::AxError;
use axmnthook::probe::ops::{EBUSY, EINVAL};
use axmnthook::{
    EntryDecision, Error, HookConfig, InterposeOps, InvocationRecord, MountLayout, SkipReason,
};
use common::{
    FakeMount, TARGET_ADDR, args, config, installed_hook, leaked_ops, new_hook, resolve_nothing,
};

/// Facility that records what it was asked to do and reports its own misses.
struct RecordingOps {
    activated: AtomicU64,
    deactivated: AtomicU64,
    max_active: AtomicU64,
    nmissed: u64,
    reject: Option<i32>,
}

impl RecordingOps {
    fn leak(nmissed: u64, reject: Option<i32>) -> &'static Self {
        Box::leak(Box::new(Self {
            activated: AtomicU64::new(0),
            deactivated: AtomicU64::new(0),
            max_active: AtomicU64::new(0),
            nmissed,
            reject,
        }))
    }
}

impl InterposeOps for RecordingOps {
    fn activate(&self, addr: usize, max_active: usize) -> Result<(), i32> {
        if let Some(code) = self.reject {
            return Err(code);
        }
        self.activated.store(addr as u64, Ordering::SeqCst);
        self.max_active.store(max_active as u64, Ordering::SeqCst);
        Ok(())
    }

    fn deactivate(&self, addr: usize) {
        self.deactivated.store(addr as u64, Ordering::SeqCst);
    }

    fn missed(&self, _addr: usize) -> u64 {
        self.nmissed
    }
}

// =============================================================================
// Install Tests
// =============================================================================

#[test]
fn test_install_success() {
    let hook = new_hook();
    let ops = RecordingOps::leak(0, None);

    assert_eq!(hook.install(&config(), ops), Ok(()));
    assert!(hook.is_active());
    assert!(hook.status().installed);
    assert_eq!(ops.activated.load(Ordering::SeqCst), TARGET_ADDR);
    assert_eq!(ops.max_active.load(Ordering::SeqCst), 64);
}

#[test]
fn test_install_symbol_not_found() {
    let hook = new_hook();
    let ops = RecordingOps::leak(0, None);
    let config = config().with_resolver(resolve_nothing);

    assert_eq!(
        hook.install(&config, ops),
        Err(Error::SymbolNotFound("attach_recursive_mnt"))
    );
    assert!(!hook.is_active());
    assert_eq!(ops.activated.load(Ordering::SeqCst), 0);
}

#[test]
fn test_install_unknown_symbol_name() {
    let hook = new_hook();
    let config = config().with_symbol("do_add_mount");

    assert_eq!(
        hook.install(&config, leaked_ops()),
        Err(Error::SymbolNotFound("do_add_mount"))
    );
}

#[test]
fn test_install_registration_failed() {
    let hook = new_hook();
    let ops = RecordingOps::leak(0, Some(-EINVAL));

    assert_eq!(
        hook.install(&config(), ops),
        Err(Error::RegistrationFailed(-EINVAL))
    );
    assert!(!hook.is_active());
}

#[test]
fn test_conflicting_interposition_is_busy() {
    let ops = leaked_ops();
    let first = new_hook();
    let second = new_hook();

    first.install(&config(), ops).unwrap();
    assert_eq!(
        second.install(&config(), ops),
        Err(Error::RegistrationFailed(-EBUSY))
    );
    assert!(first.is_active());
    assert!(!second.is_active());
}

#[test]
fn test_install_twice_is_rejected() {
    let hook = installed_hook();
    assert_eq!(
        hook.install(&config(), leaked_ops()),
        Err(Error::AlreadyInstalled)
    );
    assert!(hook.is_active());
}

#[test]
fn test_retry_after_failure_is_rejected() {
    let hook = new_hook();
    let bad = config().with_resolver(resolve_nothing);
    assert!(hook.install(&bad, leaked_ops()).is_err());
    assert_eq!(
        hook.install(&config(), leaked_ops()),
        Err(Error::AlreadyInstalled)
    );
}

#[test]
fn test_install_invalid_layout() {
    let hook = new_hook();
    let ops = RecordingOps::leak(0, None);
    let config = HookConfig::new(MountLayout::new(3, 40)).with_resolver(common::resolve_target);

    assert!(matches!(
        hook.install(&config, ops),
        Err(Error::InvalidLayout(_))
    ));
    assert_eq!(ops.activated.load(Ordering::SeqCst), 0);
}

#[test]
fn test_max_active_is_clamped() {
    let hook = new_hook();
    let ops = RecordingOps::leak(0, None);
    hook.install(&config().with_max_active(1024), ops).unwrap();
    assert_eq!(ops.max_active.load(Ordering::SeqCst), 64);

    let hook = new_hook();
    let ops = RecordingOps::leak(0, None);
    hook.install(&config().with_max_active(16), ops).unwrap();
    assert_eq!(ops.max_active.load(Ordering::SeqCst), 16);
}

#[test]
fn test_disabled_config_is_inert() {
    let hook = new_hook();
    let ops = RecordingOps::leak(0, None);

    assert_eq!(hook.install(&HookConfig::disabled(), ops), Ok(()));
    assert!(!hook.is_active());
    assert_eq!(ops.activated.load(Ordering::SeqCst), 0);
    assert_eq!(hook.uninstall(), 0);
}

// =============================================================================
// Failed Install Leaves Mounts Alone
// =============================================================================

#[test]
fn test_failed_install_never_touches_mounts() {
    let hook = new_hook();
    let _ = hook.install(&config().with_resolver(resolve_nothing), leaked_ops());
    hook.gate().set_paused(true);
    hook.gate().signal_milestone();

    let source = FakeMount::shared("/dev/block/loop5");
    let dest = FakeMount::shared("/dev/root");

    assert!(hook.around(args(&source, &dest), || dest.is_shared()));

    let mut record = InvocationRecord::new();
    assert_eq!(
        hook.entry_handler(args(&source, &dest), &mut record),
        EntryDecision::Skipped(SkipReason::Inactive)
    );
    assert!(dest.is_shared());
    assert_eq!(hook.status().missed, 0);
}

// =============================================================================
// Uninstall Tests
// =============================================================================

#[test]
fn test_uninstall_reports_facility_misses() {
    let hook = new_hook();
    let ops = RecordingOps::leak(7, None);
    hook.install(&config(), ops).unwrap();

    assert_eq!(hook.status().missed, 7);
    assert_eq!(hook.uninstall(), 7);
    assert!(!hook.is_active());
    assert_eq!(ops.deactivated.load(Ordering::SeqCst), TARGET_ADDR);
}

#[test]
fn test_uninstall_without_install() {
    let hook = new_hook();
    assert_eq!(hook.uninstall(), 0);
    // Still installable afterwards.
    assert_eq!(hook.install(&config(), leaked_ops()), Ok(()));
}

#[test]
fn test_uninstall_releases_call_site() {
    let ops = leaked_ops();
    let hook = new_hook();
    hook.install(&config(), ops).unwrap();
    assert_eq!(ops.claimed(), Some(TARGET_ADDR as usize));

    hook.uninstall();
    assert_eq!(ops.claimed(), None);

    let source = FakeMount::shared("/dev/sda1");
    let dest = FakeMount::shared("/dev/root");
    hook.gate().set_paused(true);
    assert!(hook.around(args(&source, &dest), || dest.is_shared()));
}

#[test]
fn test_in_flight_call_restores_after_uninstall() {
    let hook = installed_hook();
    hook.gate().set_paused(true);
    let source = FakeMount::shared("/dev/sda1");
    let dest = FakeMount::shared("/dev/root");
    let before = dest.flags();

    hook.around(args(&source, &dest), || {
        assert!(!dest.is_shared());
        hook.uninstall();
    });

    assert_eq!(dest.flags(), before);
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_error_display() {
    assert!(format!("{}", Error::SymbolNotFound("attach_recursive_mnt")).contains("attach_recursive_mnt"));
    assert!(format!("{}", Error::RegistrationFailed(-16)).contains("-16"));
    assert!(format!("{}", Error::AlreadyInstalled).contains("already installed"));
    assert!(format!("{}", Error::InvalidLayout("misaligned")).contains("misaligned"));
}

#[test]
fn test_error_into_axerror() {
    assert!(matches!(AxError::from(Error::SymbolNotFound("x")), AxError::NotFound));
    assert!(matches!(AxError::from(Error::RegistrationFailed(-EBUSY)), AxError::ResourceBusy));
    assert!(matches!(AxError::from(Error::AlreadyInstalled), AxError::AlreadyExists));
}
