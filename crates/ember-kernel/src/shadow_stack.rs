//! The shadow stack of local references: the mutator's root set.
//!
//! Compiled code is expected to push a slot for every managed local on
//! frame entry and restore the head to its pre-entry value on exit.
//! This module provides that linked list plus a safe
//! RAII wrapper (`LocalHandle`) for the kernel's own Rust call sites
//! (the entry dispatcher, the standard package's Rust implementation).
//! The FFI-facing primitive used by compiled packages lives in
//! `ember-loader`, which builds nodes through the same linked list.

use ember_abi::InstancePtr;
use std::cell::Cell;

/// A node in the shadow-stack linked list: `{address_of_instance_pointer,
/// previous_slot}`. The address always points at storage the mutator
/// owns, so writes to it remain visible to the collector without a
/// write barrier.
pub(crate) struct LocalSlotNode {
    pub(crate) slot: *mut InstancePtr,
    pub(crate) prev: *mut LocalSlotNode,
}

/// The singly linked list of local-reference slots. The kernel exposes
/// `head` as a raw field so that pushing a slot is a single write plus
/// link, not a function call.
#[derive(Default)]
pub struct ShadowStack {
    pub(crate) head: *mut LocalSlotNode,
}

impl ShadowStack {
    pub(crate) fn new() -> Self {
        Self {
            head: std::ptr::null_mut(),
        }
    }

    /// Walks the linked list, yielding every non-null slot value. Null
    /// slots are skipped silently, matching the collector's treatment of
    /// null fields elsewhere.
    pub(crate) fn roots(&self) -> impl Iterator<Item = InstancePtr> + '_ {
        ShadowStackIter { node: self.head }
    }

    /// Address of the `head` field itself, handed to compiled packages so
    /// they can push a slot with a single write plus link.
    pub(crate) fn head_ptr(&mut self) -> *mut *mut LocalSlotNode {
        &mut self.head
    }
}

/// Builds a slot node referencing `addr_of_slot` with `prev` as its link,
/// without installing it as the new head. The caller (compiled package
/// code, via the API table) writes the returned pointer into the shadow
/// stack's head field itself. The node is never individually freed: a
/// frame popping past it only restores the head, matching the ABI's
/// "single write plus link" contract in both directions. The node is
/// reclaimed with the rest of the process's address space at exit.
pub(crate) fn build_raw_node(addr_of_slot: *mut InstancePtr, prev: *mut LocalSlotNode) -> *mut LocalSlotNode {
    Box::into_raw(Box::new(LocalSlotNode {
        slot: addr_of_slot,
        prev,
    }))
}

struct ShadowStackIter {
    node: *mut LocalSlotNode,
}

impl Iterator for ShadowStackIter {
    type Item = InstancePtr;

    fn next(&mut self) -> Option<InstancePtr> {
        loop {
            if self.node.is_null() {
                return None;
            }
            // SAFETY: every node reachable from `head` was linked in by
            // `LocalHandle::new` or the loader's `new_local` trampoline,
            // both of which keep the node alive until it is unlinked.
            let node = unsafe { &*self.node };
            let value = unsafe { *node.slot };
            self.node = node.prev;
            if !value.is_null() {
                return Some(value);
            }
        }
    }
}

/// An RAII local reference: pushes a slot referencing its own storage on
/// construction, restores the shadow-stack head on drop. Safe to use
/// from Rust call sites inside the kernel and the standard package;
/// compiled packages instead go through `ApiTable::new_local` and write
/// the returned node into `ApiTable::shadow_stack_head` directly.
pub struct LocalHandle {
    head_field: *mut *mut LocalSlotNode,
    node: *mut LocalSlotNode,
    storage: Box<Cell<InstancePtr>>,
}

impl LocalHandle {
    pub(crate) fn new(stack: &mut ShadowStack, initial: InstancePtr) -> Self {
        let storage = Box::new(Cell::new(initial));
        let slot: *mut InstancePtr = storage.as_ptr();
        let node = Box::into_raw(Box::new(LocalSlotNode {
            slot,
            prev: stack.head,
        }));
        stack.head = node;
        Self {
            head_field: &mut stack.head as *mut *mut LocalSlotNode,
            node,
            storage,
        }
    }

    pub fn get(&self) -> InstancePtr {
        self.storage.get()
    }

    pub fn set(&self, ptr: InstancePtr) {
        self.storage.set(ptr);
    }
}

impl Drop for LocalHandle {
    fn drop(&mut self) {
        // SAFETY: `head_field` points at the `ShadowStack` that created
        // this handle, which must outlive it (enforced by the `&mut
        // ShadowStack` borrow taken in `new`, which in practice means the
        // owning `Runtime` outlives every `LocalHandle` it hands out).
        unsafe {
            debug_assert_eq!(*self.head_field, self.node, "local handles must be dropped in LIFO order");
            *self.head_field = (*self.node).prev;
            drop(Box::from_raw(self.node));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_pop_restores_head() {
        let mut stack = ShadowStack::new();
        assert!(stack.head.is_null());

        {
            let local = LocalHandle::new(&mut stack, std::ptr::null_mut());
            assert!(!stack.head.is_null());
            local.set(0x1000 as InstancePtr);
            assert_eq!(stack.roots().collect::<Vec<_>>(), vec![0x1000 as InstancePtr]);
        }

        assert!(stack.head.is_null());
    }

    #[test]
    fn nested_locals_form_a_stack() {
        let mut stack = ShadowStack::new();
        let outer = LocalHandle::new(&mut stack, 0x1 as InstancePtr);
        let inner = LocalHandle::new(&mut stack, 0x2 as InstancePtr);

        let mut roots: Vec<_> = stack.roots().collect();
        roots.sort();
        assert_eq!(roots, vec![0x1 as InstancePtr, 0x2 as InstancePtr]);

        drop(inner);
        assert_eq!(stack.roots().collect::<Vec<_>>(), vec![0x1 as InstancePtr]);
        drop(outer);
        assert!(stack.head.is_null());
    }

    #[test]
    fn null_slots_are_skipped() {
        let mut stack = ShadowStack::new();
        let _local = LocalHandle::new(&mut stack, std::ptr::null_mut());
        assert_eq!(stack.roots().count(), 0);
    }
}
