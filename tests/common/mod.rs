//! Shared fixtures: a fake `struct mount` and a privately installed hook.

#![allow(dead_code)]

use std::ffi::{CString, c_char};
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use axmnthook::{AttachArgs, CallSiteOps, HookConfig, MntFlags, MountHook, MountLayout};

/// Address the fake resolver hands out for `attach_recursive_mnt`.
pub const TARGET_ADDR: u64 = 0xffff_8000_0812_3400;

/// Stand-in for the kernel's `struct mount`, with filler around the two
/// fields the hook touches.
#[repr(C)]
pub struct FakeMount {
    _hash: [usize; 2],
    _parent: usize,
    flags: AtomicU32,
    _count: u32,
    _mountpoint: usize,
    devname: AtomicPtr<c_char>,
    owned_name: Option<CString>,
}

impl FakeMount {
    pub fn new(devname: Option<&str>, flags: MntFlags) -> Self {
        let owned_name = devname.map(|name| CString::new(name).unwrap());
        let ptr = owned_name
            .as_ref()
            .map_or(std::ptr::null_mut(), |name| name.as_ptr() as *mut c_char);
        Self {
            _hash: [0; 2],
            _parent: 0,
            flags: AtomicU32::new(flags.bits()),
            _count: 1,
            _mountpoint: 0,
            devname: AtomicPtr::new(ptr),
            owned_name,
        }
    }

    /// Shared destination with a few unrelated bits set.
    pub fn shared(devname: &str) -> Self {
        Self::new(Some(devname), MntFlags::SHARED | MntFlags::NOSUID | MntFlags::NODEV)
    }

    pub fn private(devname: &str) -> Self {
        Self::new(Some(devname), MntFlags::NOSUID | MntFlags::NODEV)
    }

    pub fn layout() -> MountLayout {
        MountLayout::new(
            std::mem::offset_of!(FakeMount, flags),
            std::mem::offset_of!(FakeMount, devname),
        )
    }

    pub fn flags(&self) -> MntFlags {
        MntFlags::from_bits_retain(self.flags.load(Ordering::Relaxed))
    }

    pub fn set_flags(&self, flags: MntFlags) {
        self.flags.store(flags.bits(), Ordering::Relaxed);
    }

    pub fn is_shared(&self) -> bool {
        self.flags().contains(MntFlags::SHARED)
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self as *const Self as *mut u8
    }
}

pub fn args(source: &FakeMount, dest: &FakeMount) -> AttachArgs {
    AttachArgs::new(source.as_ptr(), dest.as_ptr())
}

pub fn resolve_target(name: &str) -> Option<u64> {
    (name == "attach_recursive_mnt").then_some(TARGET_ADDR)
}

pub fn resolve_nothing(_name: &str) -> Option<u64> {
    None
}

pub fn config() -> HookConfig {
    HookConfig::new(FakeMount::layout()).with_resolver(resolve_target)
}

pub fn leaked_ops() -> &'static CallSiteOps {
    Box::leak(Box::new(CallSiteOps::new()))
}

pub fn new_hook() -> &'static MountHook {
    Box::leak(Box::new(MountHook::new()))
}

/// A hook installed on its own call-site facility.
pub fn installed_hook() -> &'static MountHook {
    let hook = new_hook();
    hook.install(&config(), leaked_ops()).expect("install must succeed");
    hook
}
