//! The C ABI exchanged between the Ember kernel and compiled packages.
//!
//! Everything here is `#[repr(C)]` and deals only in raw pointers: this
//! crate is linked independently into the kernel binary and into every
//! package `cdylib`, so no type here may depend on Rust's unstable layout
//! guarantees (no `Vec`, `String`, or trait objects crossing the boundary).
//!
//! An instance pointer (`InstancePtr`) always points at the *user fields*
//! of a live instance; the kernel keeps an [`InstanceHeader`] immediately
//! before that address in the same allocation. Packages never see the
//! header directly.

use std::ffi::c_void;
use std::os::raw::c_char;

/// Pointer to the user-field region of a live instance, or null.
pub type InstancePtr = *mut u8;

/// Pointer to an opaque collector worklist, threaded through `mark` calls
/// during a single trace pass. Packages must treat this as opaque.
pub type MarkCtx = *mut c_void;

/// Called by a package's trace callbacks to report a managed field.
/// A null `instance` is a documented no-op.
pub type MarkFn = unsafe extern "C" fn(ctx: MarkCtx, instance: InstancePtr);

/// Zeroes/initializes the raw byte region of a freshly allocated instance.
/// Does not run user-level `init` logic; that is a method call the
/// producing package makes itself after `new_instance` returns.
pub type ConstructFn = unsafe extern "C" fn(fields: *mut u8);

/// Releases unmanaged resources owned by an instance. Must not touch the
/// managed graph: calling `mark`, allocating, or creating new instances
/// from within a destructor is undefined behavior.
pub type DestroyFn = unsafe extern "C" fn(fields: *mut u8);

/// Enumerates an instance's managed pointer fields to the collector by
/// calling `mark` once per field (skipping nulls is the callback's job,
/// though the kernel's `mark` also tolerates null for free).
pub type TraceFn = unsafe extern "C" fn(fields: *const u8, mark: MarkFn, ctx: MarkCtx);

/// Enumerates a definition's static roots (interned singletons, caches)
/// to the collector. Optional: most definitions have no static roots.
pub type StaticTraceFn = unsafe extern "C" fn(static_data: *mut c_void, mark: MarkFn, ctx: MarkCtx);

/// An opaque method pointer. The kernel only ever calls one method by a
/// known signature (`App::Main`, a parameterless `extern "C" fn()`);
/// every other entry exists purely for the compiler-generated caller to
/// cast back to its real signature. Method names may repeat — dispatch
/// is by index within `Definition::methods`, names are diagnostic only.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MethodEntry {
    pub name: *const c_char,
    pub func: *const c_void,
}

/// The static description of an instance kind, published by a package
/// into the kernel's registry at handshake time. Immutable once
/// registered; identity is the `(namespace, name)` pair.
#[repr(C)]
pub struct Definition {
    pub namespace: *const c_char,
    pub name: *const c_char,
    pub instance_size: usize,
    pub methods: *const MethodEntry,
    pub method_count: usize,
    pub construct: ConstructFn,
    pub destroy: DestroyFn,
    pub trace: TraceFn,
    /// Null if the definition has no static roots.
    pub trace_static: Option<StaticTraceFn>,
    /// Opaque package-owned static storage, passed back to `trace_static`.
    pub static_data: *mut c_void,
}

/// The record a package hands back to the kernel via [`ApiTable::defs`].
/// This array is treated as package-owned and must remain valid for the
/// lifetime of the process (packages are never unloaded before teardown,
/// so a `static` array is the natural choice).
#[repr(C)]
pub struct DefinitionTable {
    pub defs: *const Definition,
    pub count: usize,
}

/// The bidirectional handshake record. A package's `getDefinitions`
/// export populates `defs`/`count`; the kernel populates every other
/// field before the call and the package is expected to cache the
/// function pointers it needs into its own module-local globals.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ApiTable {
    // package -> kernel
    pub defs: *const Definition,
    pub count: usize,

    // kernel -> package
    /// Opaque handle to the kernel's runtime state, threaded through
    /// every other call below.
    pub state: *mut c_void,

    pub new_instance: unsafe extern "C" fn(
        state: *mut c_void,
        namespace: *const c_char,
        name: *const c_char,
    ) -> InstancePtr,

    /// Builds a shadow-stack slot record referencing `addr_of_slot` (the
    /// storage location of a managed local) with `prev` as its link.
    /// Does **not** install the slot as the new head; the caller writes
    /// the returned pointer into `*head_field` itself, a single write
    /// plus link.
    pub new_local: unsafe extern "C" fn(
        state: *mut c_void,
        addr_of_slot: *mut InstancePtr,
        prev: *mut c_void,
    ) -> *mut c_void,

    /// Address of the kernel's shadow-stack head field. Compiled code
    /// pushes by writing a node from `new_local` here directly, and pops
    /// by restoring the value it read before pushing.
    pub shadow_stack_head: *mut *mut c_void,

    pub gc: unsafe extern "C" fn(state: *mut c_void),
    pub gc_force: unsafe extern "C" fn(state: *mut c_void),
    pub add_alloc: unsafe extern "C" fn(state: *mut c_void, bytes: u64),
    pub sub_alloc: unsafe extern "C" fn(state: *mut c_void, bytes: u64),
    pub mark: MarkFn,
    pub null_coalesce: unsafe extern "C" fn(a: InstancePtr, b: InstancePtr) -> InstancePtr,
    pub unwrap: unsafe extern "C" fn(p: InstancePtr, line: u32) -> InstancePtr,

    /// Loads another package by path, merging its definitions into the
    /// same registry. Returns `false` (and logs) on failure; loading
    /// continues regardless.
    pub load_package: unsafe extern "C" fn(state: *mut c_void, path: *const c_char) -> bool,

    /// Destroys every live instance unconditionally. Used by teardown;
    /// exposed to packages that implement their own shutdown protocol.
    pub free_all: unsafe extern "C" fn(state: *mut c_void),

    /// Package-defined exception hooks. The kernel never calls these; it
    /// only carries the function pointers so a package's own runtime
    /// support code can wire them up.
    pub runtime_throw: Option<unsafe extern "C" fn(state: *mut c_void, message: *const c_char)>,
    pub runtime_exception:
        Option<unsafe extern "C" fn(state: *mut c_void, message: *const c_char) -> InstancePtr>,
}

/// The single symbol every conforming package must export.
pub const HANDSHAKE_SYMBOL: &[u8] = b"getDefinitions";

/// Signature of the exported handshake function.
pub type GetDefinitionsFn = unsafe extern "C" fn(table: *mut ApiTable);
