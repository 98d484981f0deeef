//! Kernel symbol table.
//!
//! Supplies the default resolver used to locate `attach_recursive_mnt`
//! when the host has not exported it.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};
use ksym::KallsymsMapped;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

struct GlobalSymbolTable(UnsafeCell<Option<KallsymsMapped<'static>>>);
unsafe impl Sync for GlobalSymbolTable {}
static SYMBOL_TABLE: GlobalSymbolTable = GlobalSymbolTable(UnsafeCell::new(None));

const KSYM_NAME_LEN: usize = 512;

/// Error types for symbol operations.
#[derive(Debug)]
pub enum Error {
    /// Symbol table has already been initialized.
    AlreadyInitialized,
    /// Failed to parse the symbol table blob.
    ParseError(&'static str),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "Symbol table already initialized"),
            Self::ParseError(e) => write!(f, "Failed to parse symbol table: {}", e),
        }
    }
}

impl core::error::Error for Error {}

/// Load the kallsyms blob.
///
/// `data` must stay mapped for the life of the kernel. Call once, before
/// `install()`.
pub fn init(data: &'static [u8], stext: u64, etext: u64) -> Result<(), Error> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(Error::AlreadyInitialized);
    }

    let table = KallsymsMapped::from_blob(data, stext, etext).map_err(Error::ParseError)?;

    // SAFETY: the INITIALIZED swap above admits a single writer, and
    // readers see `None` until this store.
    unsafe {
        *SYMBOL_TABLE.0.get() = Some(table);
    }

    Ok(())
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}

fn table() -> Option<&'static KallsymsMapped<'static>> {
    // SAFETY: written once in `init`, never again.
    unsafe { (&*SYMBOL_TABLE.0.get()).as_ref() }
}

/// Address of `name`, if present in the table.
pub fn lookup_addr(name: &str) -> Option<u64> {
    table()?.lookup_name(name)
}

/// Address of `name` if it is the entry point of a text symbol.
///
/// Rejects data symbols and addresses that fall inside another function,
/// which would put the hook on the wrong instruction. An alias sharing the
/// address is accepted.
pub fn resolve_function(name: &str) -> Option<u64> {
    let table = table()?;
    let addr = table.lookup_name(name)?;

    let mut name_buf = [0u8; KSYM_NAME_LEN];
    let (found, _size, offset, ty) = table.lookup_address(addr, &mut name_buf)?;
    if !is_function_entry(offset == 0, ty) {
        warn!(
            "symbols: {} resolved to {:#x} = {}+{:#x} ({}), not a function entry",
            name, addr, found, offset, ty
        );
        return None;
    }
    if found != name {
        debug!("symbols: {} at {:#x} is listed as {}", name, addr, found);
    }
    Some(addr)
}

/// The listed name is not consulted: aliases share the entry address.
fn is_function_entry(at_entry: bool, ty: char) -> bool {
    at_entry && matches!(ty, 'T' | 't')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_entry_needs_text_at_offset_zero() {
        assert!(is_function_entry(true, 'T'));
        assert!(is_function_entry(true, 't'));
        assert!(!is_function_entry(false, 'T'));
        assert!(!is_function_entry(true, 'D'));
        assert!(!is_function_entry(true, 'b'));
    }
}
