//! `Runtime`: the kernel's single piece of mutable state, tying the
//! registry, instance pool, shadow stack, and collector together.

use crate::collector::Collector;
use crate::error::RuntimeError;
use crate::instance::RawInstance;
use crate::registry::Registry;
use crate::shadow_stack::{LocalHandle, ShadowStack};
use ember_abi::{Definition, InstancePtr};
use tracing::{error, warn};

/// The entire mutable state of a running Ember process. Deliberately a
/// single struct behind no mutex: nothing in this codebase ever touches
/// it from more than one thread, and the spec explicitly scopes
/// concurrent mutator execution out.
pub struct Runtime {
    registry: Registry,
    pool: Vec<RawInstance>,
    shadow_stack: ShadowStack,
    collector: Collector,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_gc_floor(None)
    }

    /// Constructs a runtime, optionally overriding the collector's
    /// minimum threshold (the CLI's `--gc-floor-mib` flag).
    pub fn with_gc_floor(floor_mib: Option<u64>) -> Self {
        let mut collector = Collector::new();
        if let Some(mib) = floor_mib {
            collector.set_floor_bytes(mib.saturating_mul(1 << 20));
        }
        Self {
            registry: Registry::new(),
            pool: Vec::new(),
            shadow_stack: ShadowStack::new(),
            collector,
        }
    }

    /// Merges a package's published definitions into the registry. The
    /// caller (the loader) guarantees `defs` stays valid for the life of
    /// the process.
    pub fn register(&mut self, defs: &[Definition]) {
        self.registry.register(defs);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Finds the definition, runs its constructor, and appends the fresh
    /// instance to the pool with the mark stamped as the current epoch (not
    /// its opposite): the collector only flips epoch once per collection,
    /// so a freshly stamped instance must still read as unmarked *after*
    /// that next flip, before it has ever been traced. Stamping with the
    /// epoch in effect at allocation time guarantees that; stamping with
    /// its opposite would make every never-yet-traced instance collide
    /// with the post-flip epoch and incorrectly survive its first sweep.
    pub fn new_instance(&mut self, namespace: &str, name: &str) -> Option<InstancePtr> {
        let def = match self.registry.find(namespace, name) {
            Some(def) => def as *const Definition,
            None => {
                warn!(namespace, name, "new_instance: no such definition");
                return None;
            }
        };
        // SAFETY: `def` was just looked up from the registry and the
        // registry only holds pointers the loader guarantees outlive the
        // process.
        let def_ref = unsafe { &*def };
        let instance = RawInstance::alloc(def_ref, self.collector.epoch());
        self.collector.add_alloc(def_ref.instance_size as u64);
        self.pool.push(instance);
        Some(instance.as_instance_ptr())
    }

    pub fn new_local(&mut self, initial: InstancePtr) -> LocalHandle {
        LocalHandle::new(&mut self.shadow_stack, initial)
    }

    /// The raw FFI-facing primitive behind `ApiTable::new_local`: builds a
    /// slot node without linking it in. The caller writes the result into
    /// `shadow_stack_head_ptr()` itself.
    ///
    /// # Safety
    /// `addr_of_slot` must remain valid for as long as the returned node
    /// stays reachable from the shadow stack, and `prev` must be either
    /// null or a node this function previously returned.
    pub unsafe fn raw_new_local(
        &self,
        addr_of_slot: *mut InstancePtr,
        prev: *mut std::ffi::c_void,
    ) -> *mut std::ffi::c_void {
        crate::shadow_stack::build_raw_node(addr_of_slot, prev as *mut crate::shadow_stack::LocalSlotNode)
            as *mut std::ffi::c_void
    }

    /// Address of the shadow stack's head field, exposed so compiled
    /// packages can push a slot with a single write plus link.
    pub fn shadow_stack_head_ptr(&mut self) -> *mut *mut std::ffi::c_void {
        self.shadow_stack.head_ptr() as *mut *mut std::ffi::c_void
    }

    pub fn gc(&mut self) {
        self.collector
            .collect_if_due(&mut self.pool, &self.shadow_stack, &self.registry);
    }

    pub fn gc_force(&mut self) {
        self.collector
            .collect(&mut self.pool, &self.shadow_stack, &self.registry);
    }

    pub fn add_alloc(&mut self, bytes: u64) {
        self.collector.add_alloc(bytes);
    }

    pub fn sub_alloc(&mut self, bytes: u64) {
        self.collector.sub_alloc(bytes);
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.collector.allocated_bytes()
    }

    pub fn gc_threshold(&self) -> u64 {
        self.collector.threshold()
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// `a` if non-null, else `b`. Exposed to compiled packages as
    /// `ApiTable::null_coalesce`.
    pub fn null_coalesce(a: InstancePtr, b: InstancePtr) -> InstancePtr {
        if a.is_null() {
            b
        } else {
            a
        }
    }

    /// Returns `p` if non-null; otherwise aborts the process after
    /// logging the source line. There is no recoverable null-dereference
    /// path in this runtime.
    pub fn unwrap(p: InstancePtr, line: u32) -> InstancePtr {
        if p.is_null() {
            error!(line, "unwrap on null reference");
            // The process is about to abort; a buffered log sink might
            // never flush, so also write directly to stderr.
            eprintln!("ember: unwrap on null reference at line {line}");
            std::process::abort();
        }
        p
    }

    /// Scans the registry for `App::Main` and invokes it as a
    /// parameterless function returning nothing. Returns
    /// [`RuntimeError::MissingEntryPoint`] if no such method exists.
    ///
    /// The scan matches `App` by name alone, across every namespace: the
    /// entry point is looked up differently from `new_instance`, which
    /// keys on the full `(namespace, name)` pair.
    ///
    /// # Safety
    /// The located method must actually have signature `extern "C"
    /// fn()`; this is guaranteed for any package built against
    /// `ember-abi`'s conventions but cannot be checked at runtime, since
    /// `MethodEntry::func` is an untyped pointer.
    pub unsafe fn run_entry_point(&mut self) -> Result<(), RuntimeError> {
        let main_fn = self
            .registry
            .iter()
            .find(|def| definition_name_is(def, "App"))
            .and_then(|def| {
                // SAFETY: `def.methods` points at `def.method_count`
                // contiguous `MethodEntry` records, per the ABI contract
                // every loaded package is required to uphold.
                let methods = unsafe { std::slice::from_raw_parts(def.methods, def.method_count) };
                methods.iter().find(|m| method_name_is(m, "Main"))
            })
            .map(|m| m.func)
            .ok_or(RuntimeError::MissingEntryPoint)?;

        // SAFETY: `main_fn` was looked up by name from a registered
        // definition's method table and is required by convention to have
        // signature `extern "C" fn()`.
        let main_fn: unsafe extern "C" fn() = unsafe { std::mem::transmute(main_fn) };
        unsafe { main_fn() };
        Ok(())
    }

    /// Destroys every live instance unconditionally, in pool order.
    /// Called once at teardown, after the entry point returns.
    pub fn free_all(&mut self) {
        for instance in self.pool.drain(..) {
            // SAFETY: teardown destroys every instance exactly once, and
            // nothing runs concurrently with it.
            unsafe { instance.destroy() };
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.free_all();
    }
}

fn method_name_is(entry: &ember_abi::MethodEntry, expected: &str) -> bool {
    if entry.name.is_null() {
        return false;
    }
    // SAFETY: every `MethodEntry` a conforming package publishes carries a
    // nul-terminated name valid for the process lifetime.
    let cstr = unsafe { std::ffi::CStr::from_ptr(entry.name) };
    cstr.to_bytes() == expected.as_bytes()
}

/// Matches a definition's `name` alone, ignoring `namespace`. The entry
/// dispatcher scans for `App` this way rather than through
/// `Registry::find`, which keys on the full `(namespace, name)` pair.
fn definition_name_is(def: &Definition, expected: &str) -> bool {
    if def.name.is_null() {
        return false;
    }
    // SAFETY: every `Definition` the loader hands us carries a
    // nul-terminated name valid for the process lifetime.
    let cstr = unsafe { std::ffi::CStr::from_ptr(def.name) };
    cstr.to_bytes() == expected.as_bytes()
}
