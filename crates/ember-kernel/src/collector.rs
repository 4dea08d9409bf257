//! Epoch-flipped mark-and-sweep, rooted at the shadow stack and every
//! definition's static roots, paced by a doubling byte-budget threshold.

use crate::instance::RawInstance;
use crate::registry::Registry;
use crate::shadow_stack::ShadowStack;
use ember_abi::{InstancePtr, MarkCtx};
use std::ffi::c_void;
use tracing::debug;

/// Never let the threshold fall below this many bytes, so a process that
/// allocates almost nothing doesn't collect on every other allocation.
const THRESHOLD_FLOOR: u64 = 1 << 20;

pub struct Collector {
    epoch: bool,
    allocated_bytes: u64,
    gc_threshold: u64,
    floor: u64,
}

impl Collector {
    pub(crate) fn new() -> Self {
        Self {
            epoch: false,
            allocated_bytes: 0,
            gc_threshold: THRESHOLD_FLOOR,
            floor: THRESHOLD_FLOOR,
        }
    }

    pub(crate) fn epoch(&self) -> bool {
        self.epoch
    }

    /// Overrides the collector's minimum threshold floor (the CLI's
    /// `--gc-floor-mib` flag). Only meaningful before the first
    /// collection; afterward the doubling policy takes over, still
    /// never dropping below this floor.
    pub(crate) fn set_floor_bytes(&mut self, floor: u64) {
        self.floor = floor.max(1);
        self.gc_threshold = self.gc_threshold.max(self.floor);
    }

    pub(crate) fn add_alloc(&mut self, bytes: u64) {
        self.allocated_bytes = self.allocated_bytes.saturating_add(bytes);
    }

    pub(crate) fn sub_alloc(&mut self, bytes: u64) {
        self.allocated_bytes = self.allocated_bytes.saturating_sub(bytes);
    }

    pub(crate) fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    pub(crate) fn threshold(&self) -> u64 {
        self.gc_threshold
    }

    /// Collects only if the allocation counter has crossed the threshold.
    pub(crate) fn collect_if_due(
        &mut self,
        pool: &mut Vec<RawInstance>,
        shadow_stack: &ShadowStack,
        registry: &Registry,
    ) {
        if self.allocated_bytes > self.gc_threshold {
            self.collect(pool, shadow_stack, registry);
        }
    }

    /// Collects unconditionally.
    pub(crate) fn collect(
        &mut self,
        pool: &mut Vec<RawInstance>,
        shadow_stack: &ShadowStack,
        registry: &Registry,
    ) {
        let before = pool.len();
        let started = std::time::Instant::now();

        self.epoch = !self.epoch;
        let epoch = self.epoch;

        let mut worklist: Vec<InstancePtr> = shadow_stack.roots().collect();

        for def in registry.iter() {
            if let Some(trace_static) = def.trace_static {
                let ctx = &mut worklist as *mut Vec<InstancePtr> as MarkCtx;
                // SAFETY: `ctx` is a valid `&mut Vec<InstancePtr>` for the
                // duration of this call, and `mark_into_worklist` is the
                // only function ever invoked with it.
                unsafe { trace_static(def.static_data, mark_into_worklist, ctx) };
            }
        }

        while let Some(ptr) = worklist.pop() {
            // SAFETY: every pointer pushed onto the worklist came from a
            // root (shadow stack or a static-root callback) or from a
            // trace callback on a live instance, both of which only ever
            // report instances the pool still owns.
            let Some(mut instance) = (unsafe { RawInstance::from_instance_ptr(ptr) }) else {
                continue;
            };
            if instance.header().mark == epoch {
                continue;
            }
            instance.set_mark(epoch);

            let def = instance.definition();
            let ctx = &mut worklist as *mut Vec<InstancePtr> as MarkCtx;
            let fields = instance.as_instance_ptr() as *const u8;
            // SAFETY: `fields` addresses a live instance's user region;
            // `ctx` is valid for the duration of this call.
            unsafe { (def.trace)(fields, mark_into_worklist, ctx) };
        }

        let mut freed_bytes: u64 = 0;
        let mut i = 0;
        while i < pool.len() {
            if pool[i].header().mark == epoch {
                i += 1;
            } else {
                let dead = pool.swap_remove(i);
                freed_bytes = freed_bytes.saturating_add(dead.definition().instance_size as u64);
                // SAFETY: `dead` has just been removed from the pool and
                // failed to mark, so nothing else can reach it.
                unsafe { dead.destroy() };
            }
        }
        self.sub_alloc(freed_bytes);

        self.gc_threshold = (self.allocated_bytes.saturating_mul(2)).max(self.floor);

        debug!(
            before,
            after = pool.len(),
            freed_bytes,
            allocated_bytes = self.allocated_bytes,
            gc_threshold = self.gc_threshold,
            elapsed_us = started.elapsed().as_micros() as u64,
            "collection finished"
        );
    }
}

/// The `MarkFn` every trace callback receives: appends a non-null
/// instance to the worklist behind `ctx`. A `mark(null)` call is a no-op.
/// Re-enqueueing an already-marked instance is tolerated; the idempotence
/// check happens when the worklist item is popped, not here.
///
/// Also exposed through `ApiTable::mark` so package code can report a
/// root outside of a trace callback's own call, with the same `ctx` it
/// was handed.
pub(crate) unsafe extern "C" fn mark_into_worklist(ctx: MarkCtx, instance: InstancePtr) {
    if instance.is_null() {
        return;
    }
    // SAFETY: `ctx` was produced by `Collector::collect` as a live
    // `&mut Vec<InstancePtr>` for the duration of the call that is
    // invoking this callback.
    let worklist = unsafe { &mut *(ctx as *mut c_void as *mut Vec<InstancePtr>) };
    worklist.push(instance);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use ember_abi::{ConstructFn, Definition, DestroyFn, TraceFn};

    unsafe extern "C" fn noop_construct(_fields: *mut u8) {}
    unsafe extern "C" fn noop_destroy(_fields: *mut u8) {}
    unsafe extern "C" fn noop_trace(_fields: *const u8, _mark: ember_abi::MarkFn, _ctx: MarkCtx) {}

    fn leaf_definition() -> Definition {
        Definition {
            namespace: std::ptr::null(),
            name: std::ptr::null(),
            instance_size: 8,
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
    fn unrooted_instance_is_swept() {
        let def = leaf_definition();
        let registry = Registry::new();
        let shadow_stack = ShadowStack::new();
        let mut collector = Collector::new();

        let mut pool = vec![RawInstance::alloc(&def, collector.epoch())];
        collector.add_alloc(def.instance_size as u64);
        assert_eq!(pool.len(), 1);

        collector.collect(&mut pool, &shadow_stack, &registry);
        assert!(pool.is_empty());
        assert_eq!(collector.allocated_bytes(), 0);
    }

    #[test]
    fn rooted_instance_survives_repeated_collections() {
        let def = leaf_definition();
        let registry = Registry::new();
        let mut shadow_stack = ShadowStack::new();
        let mut collector = Collector::new();

        let instance = RawInstance::alloc(&def, collector.epoch());
        let mut pool = vec![instance];
        collector.add_alloc(def.instance_size as u64);

        let local = crate::shadow_stack::LocalHandle::new(&mut shadow_stack, instance.as_instance_ptr());

        for _ in 0..5 {
            collector.collect(&mut pool, &shadow_stack, &registry);
            assert_eq!(pool.len(), 1);
        }

        drop(local);
        collector.collect(&mut pool, &shadow_stack, &registry);
        assert!(pool.is_empty());
    }

    #[test]
    fn threshold_doubles_after_collection() {
        let def = leaf_definition();
        let registry = Registry::new();
        let shadow_stack = ShadowStack::new();
        let mut collector = Collector::new();
        let mut pool = Vec::new();

        collector.collect(&mut pool, &shadow_stack, &registry);
        assert_eq!(collector.threshold(), THRESHOLD_FLOOR);

        collector.add_alloc(THRESHOLD_FLOOR * 3);
        collector.collect(&mut pool, &shadow_stack, &registry);
        assert_eq!(collector.threshold(), THRESHOLD_FLOOR * 6);
    }
}
