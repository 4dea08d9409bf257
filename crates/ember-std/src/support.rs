//! Small helpers shared by every type module.

use std::ffi::CString;
use std::os::raw::c_char;

/// Leaks a `CString` so its pointer is valid for the process lifetime, as
/// required of every `Definition::namespace`/`name` and `MethodEntry::name`.
pub(crate) fn leak_c_str(s: &str) -> *const c_char {
    Box::leak(Box::new(CString::new(s).expect("no interior nul"))).as_ptr()
}
