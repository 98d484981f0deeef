//! Mount propagation pause hook.
//!
//! Intercepts the kernel's `attach_recursive_mnt` and, while propagation is
//! paused, hides `MNT_SHARED` on the destination mount for the duration of
//! that one call. The original flags are written back as soon as the call
//! returns, so nothing else in the kernel sees a persisted change.
//!
//! # Features
//!
//! - `symbols` - Kernel symbol table lookup used to locate the target (default)
//!
//! # Quick Start
//!
//! ```ignore
//! use axmnthook::{HookConfig, MountLayout, mount_hook};
//!
//! // Offsets of mnt.mnt_flags and mnt_devname in this kernel's struct mount.
//! let config = HookConfig::new(MountLayout::new(0x30, 0xd0));
//! mount_hook::install(&config)?;
//!
//! // From the control plane:
//! mount_hook::set_paused(true);
//! // ... mounts attached here do not inherit shared propagation ...
//! mount_hook::signal_milestone();
//! mount_hook::set_paused(false);
//!
//! mount_hook::uninstall();
//! ```

#![no_std]

#[macro_use]
extern crate log;

pub mod gate;
pub mod mount;
pub mod probe;

#[cfg(feature = "symbols")]
pub mod symbols;

pub use gate::GateState;
pub use mount::{MntFlags, MountLayout, MountRef};
pub use probe::handler::{EntryDecision, SkipReason};
pub use probe::manager::{Error, HookConfig, HookStatus, MountHook};
pub use probe::ops::{CallSiteOps, InterposeOps};
pub use probe::{AttachArgs, InvocationRecord, MAX_ACTIVE, TARGET_SYMBOL};

pub use probe::manager as mount_hook;

/// Load the kernel symbol table so `install()` can locate the target.
///
/// # Arguments
/// * `kallsyms_data` - The kallsyms.bin binary blob (static lifetime required)
/// * `stext` - Start address of kernel text section (_stext)
/// * `etext` - End address of kernel text section (_etext)
#[cfg(feature = "symbols")]
pub fn init_with_symbols(kallsyms_data: &'static [u8], stext: u64, etext: u64) {
    info!("mount_hook: loading symbol table");

    // The ksym library expects the blob to be page-aligned in memory.
    let ptr = kallsyms_data.as_ptr() as usize;
    if ptr % 4096 != 0 {
        warn!("mount_hook: kallsyms data is not page-aligned (ptr % 4096 = {})", ptr % 4096);
    }

    match symbols::init(kallsyms_data, stext, etext) {
        Ok(()) => info!(
            "mount_hook: symbol table loaded ({} bytes, text {:#x} - {:#x})",
            kallsyms_data.len(),
            stext,
            etext
        ),
        Err(e) => error!("mount_hook: failed to load symbol table: {}", e),
    }
}
