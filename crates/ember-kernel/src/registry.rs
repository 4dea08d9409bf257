//! The append-only `(namespace, name) -> Definition` table.

use ember_abi::Definition;
use std::ffi::CStr;

/// Append-only table of published definitions. The loader is trusted not
/// to hand back duplicate `(namespace, name)` pairs; the registry does
/// not attempt to detect or reject duplicates.
#[derive(Default)]
pub struct Registry {
    defs: Vec<*const Definition>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self { defs: Vec::new() }
    }

    /// Appends every definition in `defs` to the registry. `defs` must
    /// remain valid for the life of the process: the registry only ever
    /// stores the pointers, never copies the pointees.
    pub(crate) fn register(&mut self, defs: &[Definition]) {
        self.defs.reserve(defs.len());
        for def in defs {
            self.defs.push(def as *const Definition);
        }
    }

    /// Linear scan by `(namespace, name)`. The registry is expected to
    /// hold tens to hundreds of definitions, so no index is built.
    pub fn find(&self, namespace: &str, name: &str) -> Option<&Definition> {
        self.defs.iter().find_map(|&def_ptr| {
            // SAFETY: every pointer in `self.defs` came from `register`,
            // which requires the caller to keep the definitions alive for
            // the process lifetime.
            let def = unsafe { &*def_ptr };
            if c_str_eq(def.namespace, namespace) && c_str_eq(def.name, name) {
                Some(def)
            } else {
                None
            }
        })
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Definition> {
        self.defs.iter().map(|&ptr| unsafe { &*ptr })
    }
}

fn c_str_eq(raw: *const std::os::raw::c_char, other: &str) -> bool {
    if raw.is_null() {
        return false;
    }
    // SAFETY: every `Definition` the loader hands us is required to carry
    // nul-terminated, valid-for-the-process-lifetime strings.
    let cstr = unsafe { CStr::from_ptr(raw) };
    cstr.to_bytes() == other.as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_abi::{ConstructFn, DestroyFn, TraceFn};
    use std::ffi::CString;

    unsafe extern "C" fn noop_construct(_fields: *mut u8) {}
    unsafe extern "C" fn noop_destroy(_fields: *mut u8) {}
    unsafe extern "C" fn noop_trace(_fields: *const u8, _mark: ember_abi::MarkFn, _ctx: ember_abi::MarkCtx) {}

    fn make_definition(namespace: &'static CString, name: &'static CString) -> Definition {
        Definition {
            namespace: namespace.as_ptr(),
            name: name.as_ptr(),
            instance_size: 0,
            methods: std::ptr::null(),
            method_count: 0,
            construct: noop_construct as ConstructFn,
            destroy: noop_destroy as DestroyFn,
            trace: noop_trace as TraceFn,
            trace_static: None,
            static_data: std::ptr::null_mut(),
        }
    }

    #[test]
    fn find_after_register() {
        let ns = Box::leak(Box::new(CString::new("std").unwrap()));
        let name = Box::leak(Box::new(CString::new("String").unwrap()));
        let def = make_definition(ns, name);
        let defs = vec![def];

        let mut registry = Registry::new();
        registry.register(&defs);

        assert!(registry.find("std", "String").is_some());
        assert!(registry.find("std", "List").is_none());
        assert!(registry.find("other", "String").is_none());
    }

    #[test]
    fn empty_registry_finds_nothing() {
        let registry = Registry::new();
        assert!(registry.find("std", "String").is_none());
        assert_eq!(registry.len(), 0);
        assert!(registry.is_empty());
    }
}
