//! `std::List` — a growable array of managed pointers.

use crate::support::leak_c_str;
use ember_abi::{ConstructFn, Definition, DestroyFn, InstancePtr, MarkCtx, MarkFn, MethodEntry, TraceFn};
use std::alloc::{alloc, dealloc, handle_alloc_error, realloc, Layout};
use std::ffi::c_void;

#[repr(C)]
struct ListFields {
    items: *mut InstancePtr,
    len: usize,
    cap: usize,
}

fn layout_for(cap: usize) -> Layout {
    Layout::array::<InstancePtr>(cap).expect("list capacity overflowed a layout")
}

unsafe extern "C" fn construct(fields: *mut u8) {
    // SAFETY: `fields` addresses `size_of::<ListFields>()` fresh bytes.
    unsafe {
        let fields = fields.cast::<ListFields>();
        (*fields).items = std::ptr::null_mut();
        (*fields).len = 0;
        (*fields).cap = 0;
    }
}

unsafe extern "C" fn destroy(fields: *mut u8) {
    // SAFETY: `fields` addresses a live, constructed `ListFields`.
    unsafe {
        let fields = fields.cast::<ListFields>();
        if (*fields).cap > 0 {
            dealloc((*fields).items.cast::<u8>(), layout_for((*fields).cap));
            let freed = (*fields).cap * std::mem::size_of::<InstancePtr>();
            (crate::api::api().sub_alloc)(crate::api::api().state, freed as u64);
        }
    }
}

unsafe extern "C" fn trace(fields: *const u8, mark: MarkFn, ctx: MarkCtx) {
    // SAFETY: `fields` addresses a live `ListFields`.
    unsafe {
        let fields = fields.cast::<ListFields>();
        let items = std::slice::from_raw_parts((*fields).items, (*fields).len);
        for &item in items {
            mark(ctx, item);
        }
    }
}

/// `Append(fields, item)` — grows the backing buffer by doubling
/// (starting at 4) whenever it is full.
unsafe extern "C" fn append(fields: *mut u8, item: InstancePtr) {
    // SAFETY: `fields` addresses a live `ListFields`.
    unsafe {
        let fields = fields.cast::<ListFields>();
        if (*fields).len == (*fields).cap {
            let old_cap = (*fields).cap;
            let new_cap = if old_cap == 0 { 4 } else { old_cap * 2 };
            let new_layout = layout_for(new_cap);
            let new_items = if old_cap == 0 {
                alloc(new_layout)
            } else {
                realloc((*fields).items.cast::<u8>(), layout_for(old_cap), new_layout.size())
            };
            if new_items.is_null() {
                handle_alloc_error(new_layout);
            }
            (*fields).items = new_items.cast::<InstancePtr>();
            (*fields).cap = new_cap;

            let grew = (new_cap - old_cap) * std::mem::size_of::<InstancePtr>();
            (crate::api::api().add_alloc)(crate::api::api().state, grew as u64);
        }

        *(*fields).items.add((*fields).len) = item;
        (*fields).len += 1;
    }
}

/// `Count(fields) -> usize`.
unsafe extern "C" fn count(fields: *const u8) -> usize {
    // SAFETY: `fields` is a live `ListFields`.
    unsafe { (*fields.cast::<ListFields>()).len }
}

/// `Get(fields, index) -> InstancePtr`. Returns null for an out-of-range
/// index rather than aborting: indexing is a mutator-level concern the
/// caller is expected to guard.
unsafe extern "C" fn get(fields: *const u8, index: usize) -> InstancePtr {
    // SAFETY: `fields` is a live `ListFields`.
    unsafe {
        let fields = fields.cast::<ListFields>();
        if index >= (*fields).len {
            std::ptr::null_mut()
        } else {
            *(*fields).items.add(index)
        }
    }
}

pub mod method_index {
    pub const APPEND: usize = 0;
    pub const COUNT: usize = 1;
    pub const GET: usize = 2;
}

pub(crate) fn definition() -> Definition {
    let methods: &'static [MethodEntry] = Box::leak(Box::new([
        MethodEntry {
            name: leak_c_str("Append"),
            func: append as *const c_void,
        },
        MethodEntry {
            name: leak_c_str("Count"),
            func: count as *const c_void,
        },
        MethodEntry {
            name: leak_c_str("Get"),
            func: get as *const c_void,
        },
    ]));

    Definition {
        namespace: leak_c_str("std"),
        name: leak_c_str("List"),
        instance_size: std::mem::size_of::<ListFields>(),
        methods: methods.as_ptr(),
        method_count: methods.len(),
        construct: construct as ConstructFn,
        destroy: destroy as DestroyFn,
        trace: trace as TraceFn,
        trace_static: None,
        static_data: std::ptr::null_mut(),
    }
}
