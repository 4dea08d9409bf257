//! The `extern "C"` functions behind every `ApiTable` entry, each
//! recovering an `&mut Runtime` from the opaque `state` pointer and
//! delegating to it.

use ember_abi::{ApiTable, InstancePtr};
use ember_kernel::Runtime;
use std::ffi::{c_void, CStr};
use std::os::raw::c_char;

pub(crate) fn build_api_table(runtime: &mut Runtime) -> ApiTable {
    ApiTable {
        defs: std::ptr::null(),
        count: 0,
        state: runtime as *mut Runtime as *mut c_void,
        new_instance: trampoline_new_instance,
        new_local: trampoline_new_local,
        shadow_stack_head: runtime.shadow_stack_head_ptr(),
        gc: trampoline_gc,
        gc_force: trampoline_gc_force,
        add_alloc: trampoline_add_alloc,
        sub_alloc: trampoline_sub_alloc,
        mark: ember_kernel::mark_fn(),
        null_coalesce: trampoline_null_coalesce,
        unwrap: trampoline_unwrap,
        load_package: trampoline_load_package,
        free_all: trampoline_free_all,
        runtime_throw: None,
        runtime_exception: None,
    }
}

unsafe fn runtime_from_state<'a>(state: *mut c_void) -> &'a mut Runtime {
    // SAFETY: `state` is always `ApiTable::state`, set by `build_api_table`
    // to a live `&mut Runtime` that outlives every call through the table.
    unsafe { &mut *(state as *mut Runtime) }
}

unsafe fn str_from_c(ptr: *const c_char) -> &'static str {
    if ptr.is_null() {
        return "";
    }
    // SAFETY: every namespace/name string crossing the ABI is a
    // nul-terminated string valid at least for the call's duration.
    unsafe { CStr::from_ptr(ptr) }.to_str().unwrap_or("")
}

unsafe extern "C" fn trampoline_new_instance(
    state: *mut c_void,
    namespace: *const c_char,
    name: *const c_char,
) -> InstancePtr {
    let runtime = unsafe { runtime_from_state(state) };
    let namespace = unsafe { str_from_c(namespace) };
    let name = unsafe { str_from_c(name) };
    runtime.new_instance(namespace, name).unwrap_or(std::ptr::null_mut())
}

unsafe extern "C" fn trampoline_new_local(
    state: *mut c_void,
    addr_of_slot: *mut InstancePtr,
    prev: *mut c_void,
) -> *mut c_void {
    let runtime = unsafe { runtime_from_state(state) };
    unsafe { runtime.raw_new_local(addr_of_slot, prev) }
}

unsafe extern "C" fn trampoline_gc(state: *mut c_void) {
    let runtime = unsafe { runtime_from_state(state) };
    runtime.gc();
}

unsafe extern "C" fn trampoline_gc_force(state: *mut c_void) {
    let runtime = unsafe { runtime_from_state(state) };
    runtime.gc_force();
}

unsafe extern "C" fn trampoline_add_alloc(state: *mut c_void, bytes: u64) {
    let runtime = unsafe { runtime_from_state(state) };
    runtime.add_alloc(bytes);
}

unsafe extern "C" fn trampoline_sub_alloc(state: *mut c_void, bytes: u64) {
    let runtime = unsafe { runtime_from_state(state) };
    runtime.sub_alloc(bytes);
}

unsafe extern "C" fn trampoline_null_coalesce(a: InstancePtr, b: InstancePtr) -> InstancePtr {
    Runtime::null_coalesce(a, b)
}

unsafe extern "C" fn trampoline_unwrap(p: InstancePtr, line: u32) -> InstancePtr {
    Runtime::unwrap(p, line)
}

unsafe extern "C" fn trampoline_load_package(state: *mut c_void, path: *const c_char) -> bool {
    if path.is_null() {
        return false;
    }
    let runtime = unsafe { runtime_from_state(state) };
    let path = unsafe { str_from_c(path) };
    // A recursively loaded package is handed a fresh `Loader` rather than
    // sharing the caller's: its library handle still outlives the process
    // because it's leaked into the caller's address space by `libloading`
    // on open and the kernel only needs the handshake to have happened.
    let mut nested = crate::Loader::new();
    let ok = nested.load_package(runtime, std::path::Path::new(path)).is_ok();
    std::mem::forget(nested);
    ok
}

unsafe extern "C" fn trampoline_free_all(state: *mut c_void) {
    let runtime = unsafe { runtime_from_state(state) };
    runtime.free_all();
}
