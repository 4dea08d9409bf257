//! `std::String` — an owned, unmanaged byte buffer. Holds no managed
//! pointers, so its trace callback is a no-op.

use crate::support::leak_c_str;
use ember_abi::{ConstructFn, Definition, DestroyFn, MarkCtx, MarkFn, MethodEntry, TraceFn};
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

#[repr(C)]
struct StringFields {
    ptr: *mut u8,
    len: usize,
}

static DESTROY_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Number of times a `String` destructor has run. Exposed for tests that
/// need to observe a destructor fired exactly once, since the kernel
/// gives no other externally visible signal of a sweep having happened.
pub fn destroy_count() -> usize {
    DESTROY_COUNT.load(Ordering::SeqCst)
}

unsafe extern "C" fn construct(fields: *mut u8) {
    // SAFETY: `fields` addresses `size_of::<StringFields>()` fresh bytes.
    unsafe {
        let fields = fields.cast::<StringFields>();
        (*fields).ptr = std::ptr::null_mut();
        (*fields).len = 0;
    }
}

unsafe extern "C" fn destroy(fields: *mut u8) {
    // SAFETY: `fields` addresses a live, constructed `StringFields`.
    unsafe {
        let fields = fields.cast::<StringFields>();
        let len = (*fields).len;
        if len > 0 {
            let layout = Layout::array::<u8>(len).expect("string length overflowed a layout");
            dealloc((*fields).ptr, layout);
            (crate::api::api().sub_alloc)(crate::api::api().state, len as u64);
        }
    }
    DESTROY_COUNT.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn trace(_fields: *const u8, _mark: MarkFn, _ctx: MarkCtx) {}

/// `Init(fields, bytes, len)` — copies `len` bytes from `bytes` into a
/// freshly allocated buffer, replacing whatever the instance held before.
unsafe extern "C" fn init(fields: *mut u8, bytes: *const u8, len: usize) {
    // SAFETY: `fields` is a live `StringFields`; `bytes` addresses at
    // least `len` readable bytes, per this method's documented contract.
    unsafe {
        let fields = fields.cast::<StringFields>();
        if (*fields).len > 0 {
            let old_layout = Layout::array::<u8>((*fields).len).unwrap();
            dealloc((*fields).ptr, old_layout);
            (crate::api::api().sub_alloc)(crate::api::api().state, (*fields).len as u64);
        }

        if len == 0 {
            (*fields).ptr = std::ptr::null_mut();
            (*fields).len = 0;
            return;
        }

        let layout = Layout::array::<u8>(len).expect("string length overflowed a layout");
        let buf = alloc(layout);
        if buf.is_null() {
            handle_alloc_error(layout);
        }
        std::ptr::copy_nonoverlapping(bytes, buf, len);
        (*fields).ptr = buf;
        (*fields).len = len;
        (crate::api::api().add_alloc)(crate::api::api().state, len as u64);
    }
}

/// `Len(fields) -> usize`.
unsafe extern "C" fn len(fields: *const u8) -> usize {
    // SAFETY: `fields` is a live `StringFields`.
    unsafe { (*fields.cast::<StringFields>()).len }
}

/// `Bytes(fields) -> *const u8` — the raw buffer, valid as long as the
/// instance is not reinitialized or destroyed.
unsafe extern "C" fn bytes(fields: *const u8) -> *const u8 {
    // SAFETY: `fields` is a live `StringFields`.
    unsafe { (*fields.cast::<StringFields>()).ptr }
}

pub mod method_index {
    pub const INIT: usize = 0;
    pub const LEN: usize = 1;
    pub const BYTES: usize = 2;
}

pub(crate) fn definition() -> Definition {
    let methods: &'static [MethodEntry] = Box::leak(Box::new([
        MethodEntry {
            name: leak_c_str("Init"),
            func: init as *const c_void,
        },
        MethodEntry {
            name: leak_c_str("Len"),
            func: len as *const c_void,
        },
        MethodEntry {
            name: leak_c_str("Bytes"),
            func: bytes as *const c_void,
        },
    ]));

    Definition {
        namespace: leak_c_str("std"),
        name: leak_c_str("String"),
        instance_size: std::mem::size_of::<StringFields>(),
        methods: methods.as_ptr(),
        method_count: methods.len(),
        construct: construct as ConstructFn,
        destroy: destroy as DestroyFn,
        trace: trace as TraceFn,
        trace_static: None,
        static_data: std::ptr::null_mut(),
    }
}
