//! Random graphs of a single synthetic "Node" type, rooted at a random
//! subset, collected once: every instance reachable from a root must
//! survive and every unreachable one must be destroyed exactly once.
//!
//! Drives the collector purely through `Runtime`'s public surface, the
//! way a real package would, rather than reaching into the crate's
//! private collector/instance modules.

use ember_abi::{ConstructFn, Definition, DestroyFn, InstancePtr, MarkCtx, MarkFn, TraceFn};
use ember_kernel::Runtime;
use proptest::collection::vec as pvec;
use proptest::prelude::*;
use std::collections::HashSet;
use std::ffi::CString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

static DESTROY_COUNT: AtomicUsize = AtomicUsize::new(0);

fn namespace_cstr() -> &'static CString {
    static NS: OnceLock<CString> = OnceLock::new();
    NS.get_or_init(|| CString::new("prop").unwrap())
}

fn name_cstr() -> &'static CString {
    static NAME: OnceLock<CString> = OnceLock::new();
    NAME.get_or_init(|| CString::new("Node").unwrap())
}

unsafe extern "C" fn construct(fields: *mut u8) {
    // SAFETY: `fields` addresses `size_of::<InstancePtr>()` freshly
    // allocated bytes, wide enough for a single `InstancePtr`.
    unsafe { (fields as *mut InstancePtr).write(std::ptr::null_mut()) };
}

unsafe extern "C" fn destroy(_fields: *mut u8) {
    DESTROY_COUNT.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn trace(fields: *const u8, mark: MarkFn, ctx: MarkCtx) {
    // SAFETY: `fields` addresses a live Node's single `next` field.
    let next = unsafe { (fields as *const InstancePtr).read() };
    // SAFETY: `mark`/`ctx` come from the collector's own call to this
    // trace function and are valid for its duration.
    unsafe { mark(ctx, next) };
}

fn node_definition() -> Definition {
    Definition {
        namespace: namespace_cstr().as_ptr(),
        name: name_cstr().as_ptr(),
        instance_size: std::mem::size_of::<InstancePtr>(),
        methods: std::ptr::null(),
        method_count: 0,
        construct: construct as ConstructFn,
        destroy: destroy as DestroyFn,
        trace: trace as TraceFn,
        trace_static: None,
        static_data: std::ptr::null_mut(),
    }
}

unsafe fn set_next(ptr: InstancePtr, next: InstancePtr) {
    // SAFETY: `ptr` is a live Node instance's user-field pointer.
    unsafe { (ptr as *mut InstancePtr).write(next) };
}

/// From a root set and a `next` adjacency list (by index), computes
/// every index reachable by following `next` pointers.
fn reachable(roots: &[usize], next: &[Option<usize>]) -> HashSet<usize> {
    let mut seen = HashSet::new();
    let mut stack: Vec<usize> = roots.to_vec();
    while let Some(i) = stack.pop() {
        if !seen.insert(i) {
            continue;
        }
        if let Some(j) = next[i] {
            stack.push(j);
        }
    }
    seen
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reachable_nodes_survive_and_only_those(
        next_raw in pvec(prop::option::of(0usize..16), 1..16),
        root_flags in pvec(any::<bool>(), 1..16),
    ) {
        let count = next_raw.len().min(root_flags.len());
        let next: Vec<Option<usize>> = next_raw[..count]
            .iter()
            .map(|slot| slot.filter(|&j| j < count))
            .collect();
        let root_flags = &root_flags[..count];

        let mut runtime = Runtime::new();
        runtime.register(&[node_definition()]);

        let ptrs: Vec<InstancePtr> = (0..count)
            .map(|_| runtime.new_instance("prop", "Node").expect("Node is registered"))
            .collect();

        for (i, slot) in next.iter().enumerate() {
            if let Some(j) = slot {
                unsafe { set_next(ptrs[i], ptrs[*j]) };
            }
        }

        let roots: Vec<usize> = root_flags
            .iter()
            .enumerate()
            .filter_map(|(i, &rooted)| rooted.then_some(i))
            .collect();
        let locals: Vec<_> = roots.iter().map(|&i| runtime.new_local(ptrs[i])).collect();

        let expected = reachable(&roots, &next);
        let destroys_before = DESTROY_COUNT.load(Ordering::SeqCst);

        runtime.gc_force();

        prop_assert_eq!(runtime.pool_len(), expected.len());
        prop_assert_eq!(
            DESTROY_COUNT.load(Ordering::SeqCst) - destroys_before,
            count - expected.len()
        );

        drop(locals);
        runtime.gc_force();
        prop_assert_eq!(runtime.pool_len(), 0);
    }
}
