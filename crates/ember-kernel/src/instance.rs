//! Instance headers and the raw heap allocation backing a live instance.

use ember_abi::{Definition, InstancePtr};
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;

/// All managed allocations are aligned to this boundary, wide enough for
/// any managed pointer field the package stores without a write barrier.
const HEADER_ALIGN: usize = 8;

/// `{definition, mark}`, stored immediately before an instance's user
/// fields in the same allocation. The mark's meaning depends on the
/// collector's current epoch parity (see `collector::Collector`).
#[repr(C)]
pub(crate) struct InstanceHeader {
    pub definition: *const Definition,
    pub mark: bool,
}

pub(crate) const fn header_size() -> usize {
    // Round up to HEADER_ALIGN so the user fields that follow start on an
    // aligned boundary regardless of InstanceHeader's own size.
    let raw = std::mem::size_of::<InstanceHeader>();
    (raw + HEADER_ALIGN - 1) / HEADER_ALIGN * HEADER_ALIGN
}

/// A single live instance: a pointer to the user-field region, with the
/// header recoverable by subtracting `header_size()`.
#[derive(Clone, Copy)]
pub(crate) struct RawInstance {
    user_ptr: NonNull<u8>,
}

impl RawInstance {
    /// Allocates `header_size() + def.instance_size` bytes, stamps the
    /// header, and invokes the definition's constructor on the user
    /// fields. Does not run any user-level `init` method.
    pub(crate) fn alloc(def: &Definition, initial_mark: bool) -> Self {
        let total = header_size() + def.instance_size;
        let layout = Layout::from_size_align(total, HEADER_ALIGN)
            .expect("instance size overflowed a valid layout");
        // SAFETY: layout has nonzero size (header alone is always > 0).
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            handle_alloc_error(layout);
        }

        // SAFETY: `base` is a fresh allocation of `total` bytes, large
        // enough for the header followed by `def.instance_size` bytes.
        unsafe {
            let header = base.cast::<InstanceHeader>();
            header.write(InstanceHeader {
                definition: def as *const Definition,
                mark: initial_mark,
            });

            let fields = base.add(header_size());
            (def.construct)(fields);

            Self {
                user_ptr: NonNull::new_unchecked(fields),
            }
        }
    }

    pub(crate) fn as_instance_ptr(self) -> InstancePtr {
        self.user_ptr.as_ptr()
    }

    /// # Safety
    /// `ptr` must be a live instance pointer previously returned by
    /// [`RawInstance::alloc`] (i.e. it addresses the user-field region of
    /// an allocation with a valid header immediately before it).
    pub(crate) unsafe fn from_instance_ptr(ptr: InstancePtr) -> Option<Self> {
        NonNull::new(ptr).map(|user_ptr| Self { user_ptr })
    }

    pub(crate) fn header(&self) -> &InstanceHeader {
        // SAFETY: the header always immediately precedes the user fields
        // in the allocation created by `alloc`.
        unsafe { &*self.user_ptr.as_ptr().sub(header_size()).cast::<InstanceHeader>() }
    }

    fn header_mut(&mut self) -> &mut InstanceHeader {
        // SAFETY: see `header`.
        unsafe { &mut *self.user_ptr.as_ptr().sub(header_size()).cast::<InstanceHeader>() }
    }

    pub(crate) fn set_mark(&mut self, mark: bool) {
        self.header_mut().mark = mark;
    }

    pub(crate) fn definition(&self) -> &Definition {
        // SAFETY: definitions outlive every instance they describe;
        // packages are never unloaded before teardown.
        unsafe { &*self.header().definition }
    }

    /// Runs the destructor and frees the backing allocation. The caller
    /// is responsible for having already removed `self` from the pool
    /// and adjusted the allocation counter.
    ///
    /// # Safety
    /// Must be called at most once per instance, and only once nothing
    /// else can observe `self` as live (mid-sweep, or during teardown).
    pub(crate) unsafe fn destroy(self) {
        let def = self.definition();
        let fields = self.user_ptr.as_ptr();
        // SAFETY: the destructor contract forbids touching the managed
        // graph; it only releases unmanaged resources.
        unsafe { (def.destroy)(fields) };

        let total = header_size() + def.instance_size;
        let layout = Layout::from_size_align(total, HEADER_ALIGN)
            .expect("instance size overflowed a valid layout");
        let base = unsafe { self.user_ptr.as_ptr().sub(header_size()) };
        // SAFETY: `base` is exactly the pointer returned by `alloc` with
        // this same `layout`.
        unsafe { dealloc(base, layout) };
    }
}
