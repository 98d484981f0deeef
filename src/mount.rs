//! Non-owning view of a live kernel `struct mount`.
//!
//! The crate is not built against the kernel's private `fs/mount.h`, so the
//! two fields the hook touches (`mnt.mnt_flags` and `mnt_devname`) are
//! located through a [`MountLayout`] supplied by the host at install time.

use core::ffi::{CStr, c_char};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

bitflags::bitflags! {
    /// `MNT_*` flags stored in `vfsmount::mnt_flags`.
    ///
    /// Only the bits this crate cares about are named; anything else the
    /// kernel keeps in the word is retained untouched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MntFlags: u32 {
        const NOSUID = 0x01;
        const NODEV = 0x02;
        const NOEXEC = 0x04;
        const NOATIME = 0x08;
        const NODIRATIME = 0x10;
        const RELATIME = 0x20;
        const READONLY = 0x40;
        const SHRINKABLE = 0x100;
        const WRITE_HOLD = 0x200;
        /// Peer-group propagation: new mounts below replicate to peers.
        const SHARED = 0x1000;
        const UNBINDABLE = 0x2000;
        const INTERNAL = 0x4000;
        const LOCKED = 0x0080_0000;
        const DOOMED = 0x0100_0000;
        const UMOUNT = 0x0800_0000;

        const _ = !0;
    }
}

/// Byte offsets of the hooked fields inside the kernel's `struct mount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountLayout {
    /// Offset of `mnt.mnt_flags` (a 32-bit `int`).
    pub flags_offset: usize,
    /// Offset of `mnt_devname` (a `const char *`).
    pub devname_offset: usize,
}

impl MountLayout {
    pub const fn new(flags_offset: usize, devname_offset: usize) -> Self {
        Self {
            flags_offset,
            devname_offset,
        }
    }

    /// Check the offsets allow aligned atomic access to both fields.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.flags_offset % core::mem::align_of::<AtomicU32>() != 0 {
            return Err("mnt_flags offset is not 4-byte aligned");
        }
        if self.devname_offset % core::mem::align_of::<AtomicPtr<c_char>>() != 0 {
            return Err("mnt_devname offset is not pointer aligned");
        }
        let flags = self.flags_offset..self.flags_offset + core::mem::size_of::<u32>();
        let devname =
            self.devname_offset..self.devname_offset + core::mem::size_of::<*const c_char>();
        if flags.start < devname.end && devname.start < flags.end {
            return Err("mnt_flags and mnt_devname overlap");
        }
        Ok(())
    }
}

/// Weak reference to a kernel mount. Never owns or frees the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountRef {
    base: NonNull<u8>,
    layout: MountLayout,
}

impl MountRef {
    /// Wrap a raw `struct mount *`. Returns `None` for null.
    ///
    /// # Safety
    /// A non-null `ptr` must point to a live mount laid out according to
    /// `layout`, and stay live for as long as the returned view is used.
    pub unsafe fn from_raw(ptr: *mut u8, layout: MountLayout) -> Option<Self> {
        NonNull::new(ptr).map(|base| Self { base, layout })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    fn flags_word(&self) -> &AtomicU32 {
        // SAFETY: `from_raw` contract plus `MountLayout::validate` alignment.
        unsafe { AtomicU32::from_ptr(self.base.as_ptr().add(self.layout.flags_offset).cast()) }
    }

    /// Current propagation flags.
    pub fn flags(&self) -> MntFlags {
        MntFlags::from_bits_retain(self.flags_word().load(Ordering::Relaxed))
    }

    /// Overwrite the whole flags word.
    pub fn store_flags(&self, flags: MntFlags) {
        self.flags_word().store(flags.bits(), Ordering::Relaxed);
    }

    /// Clear `flags` and return the word as it was just before.
    pub fn clear_flags(&self, flags: MntFlags) -> MntFlags {
        MntFlags::from_bits_retain(self.flags_word().fetch_and(!flags.bits(), Ordering::Relaxed))
    }

    /// Backing device name (`mnt_devname`), if set.
    pub fn devname(&self) -> Option<&CStr> {
        // SAFETY: `from_raw` contract plus `MountLayout::validate` alignment.
        let slot = unsafe {
            AtomicPtr::<c_char>::from_ptr(
                self.base.as_ptr().add(self.layout.devname_offset).cast(),
            )
        };
        let name = slot.load(Ordering::Relaxed);
        if name.is_null() {
            None
        } else {
            // SAFETY: the kernel keeps mnt_devname NUL-terminated for the
            // lifetime of the mount.
            Some(unsafe { CStr::from_ptr(name) })
        }
    }
}
