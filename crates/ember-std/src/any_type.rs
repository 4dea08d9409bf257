//! `std::Any` — a single boxed managed reference. Used to build and
//! exercise cyclic object graphs.

use crate::support::leak_c_str;
use ember_abi::{ConstructFn, Definition, DestroyFn, InstancePtr, MarkCtx, MarkFn, MethodEntry, TraceFn};
use std::ffi::c_void;

#[repr(C)]
struct AnyFields {
    value: InstancePtr,
}

unsafe extern "C" fn construct(fields: *mut u8) {
    // SAFETY: `fields` addresses `size_of::<AnyFields>()` fresh bytes.
    unsafe { (*fields.cast::<AnyFields>()).value = std::ptr::null_mut() };
}

unsafe extern "C" fn destroy(_fields: *mut u8) {}

unsafe extern "C" fn trace(fields: *const u8, mark: MarkFn, ctx: MarkCtx) {
    // SAFETY: `fields` addresses a live `AnyFields`.
    unsafe { mark(ctx, (*fields.cast::<AnyFields>()).value) };
}

/// `SetValue(fields, value)`.
unsafe extern "C" fn set_value(fields: *mut u8, value: InstancePtr) {
    // SAFETY: `fields` addresses a live `AnyFields`.
    unsafe { (*fields.cast::<AnyFields>()).value = value };
}

/// `GetValue(fields) -> InstancePtr`.
unsafe extern "C" fn get_value(fields: *const u8) -> InstancePtr {
    // SAFETY: `fields` addresses a live `AnyFields`.
    unsafe { (*fields.cast::<AnyFields>()).value }
}

pub mod method_index {
    pub const SET_VALUE: usize = 0;
    pub const GET_VALUE: usize = 1;
}

pub(crate) fn definition() -> Definition {
    let methods: &'static [MethodEntry] = Box::leak(Box::new([
        MethodEntry {
            name: leak_c_str("SetValue"),
            func: set_value as *const c_void,
        },
        MethodEntry {
            name: leak_c_str("GetValue"),
            func: get_value as *const c_void,
        },
    ]));

    Definition {
        namespace: leak_c_str("std"),
        name: leak_c_str("Any"),
        instance_size: std::mem::size_of::<AnyFields>(),
        methods: methods.as_ptr(),
        method_count: methods.len(),
        construct: construct as ConstructFn,
        destroy: destroy as DestroyFn,
        trace: trace as TraceFn,
        trace_static: None,
        static_data: std::ptr::null_mut(),
    }
}
