//! Return-probe style interposition on `attach_recursive_mnt`.
//!
//! - `pool`: bounded per-invocation record slots
//! - `handler`: entry/exit interceptors (override and restore)
//! - `ops`: host interposition facility glue
//! - `manager`: install/uninstall lifecycle and the global hook

use crate::mount::{MntFlags, MountRef};

pub mod handler;
pub mod manager;
pub mod ops;
pub mod pool;

/// Kernel function whose entry/exit is intercepted.
pub const TARGET_SYMBOL: &str = "attach_recursive_mnt";

/// Concurrent invocations that can be tracked before calls are missed.
pub const MAX_ACTIVE: usize = 64;

/// The two arguments of the attach call the hook looks at.
///
/// `attach_recursive_mnt(struct mount *source_mnt, struct mount *dest_mnt, ...)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachArgs {
    pub source: *mut u8,
    pub dest: *mut u8,
}

impl AttachArgs {
    pub const fn new(source: *mut u8, dest: *mut u8) -> Self {
        Self { source, dest }
    }

    /// Decode from the first two argument registers (PARM1, PARM2).
    pub fn from_regs(arg0: u64, arg1: u64) -> Self {
        Self::new(arg0 as usize as *mut u8, arg1 as usize as *mut u8)
    }
}

/// Per-call state handed from the entry interceptor to the matching exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationRecord {
    pub(crate) target: Option<MountRef>,
    pub(crate) original_flags: MntFlags,
    pub(crate) spoofed: bool,
}

impl InvocationRecord {
    pub const EMPTY: Self = Self {
        target: None,
        original_flags: MntFlags::empty(),
        spoofed: false,
    };

    pub const fn new() -> Self {
        Self::EMPTY
    }

    /// True iff the entry interceptor cleared SHARED on the destination.
    pub fn is_spoofed(&self) -> bool {
        self.spoofed
    }

    /// Destination flags saved before the override.
    pub fn original_flags(&self) -> MntFlags {
        self.original_flags
    }

    /// Destination still awaiting restoration, if any.
    pub fn pending_target(&self) -> Option<*mut u8> {
        self.target.map(|t| t.as_ptr())
    }
}

impl Default for InvocationRecord {
    fn default() -> Self {
        Self::EMPTY
    }
}
