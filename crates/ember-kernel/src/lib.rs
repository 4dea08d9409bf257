//! Definition registry, instance pool, shadow stack, and mark-and-sweep
//! collector for the Ember runtime.

mod collector;
mod error;
mod instance;
mod registry;
mod runtime;
mod shadow_stack;

pub use error::RuntimeError;
pub use registry::Registry;
pub use runtime::Runtime;
pub use shadow_stack::LocalHandle;

/// The `MarkFn` handed to packages through `ApiTable::mark`, the same
/// callback every trace call already receives as an argument.
pub fn mark_fn() -> ember_abi::MarkFn {
    collector::mark_into_worklist
}
