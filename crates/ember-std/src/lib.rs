//! The standard package: `String`, `List`, and `Any`.
//!
//! Built as a `cdylib` so `ember-loader` can load it like any other
//! package, and as an `rlib` so the workspace's own tests can depend on
//! `method_index` and call its methods by a known index.

mod any_type;
mod api;
mod list_type;
mod string_type;
mod support;

pub use any_type::method_index as any_methods;
pub use list_type::method_index as list_methods;
pub use string_type::{destroy_count as string_destroy_count, method_index as string_methods};

use ember_abi::ApiTable;
use std::sync::OnceLock;
use tracing::trace;

static DEFINITIONS: OnceLock<Vec<ember_abi::Definition>> = OnceLock::new();

fn definitions() -> &'static [ember_abi::Definition] {
    DEFINITIONS
        .get_or_init(|| vec![string_type::definition(), list_type::definition(), any_type::definition()])
        .as_slice()
}

/// The single symbol every conforming Ember package exports. Installs the
/// handed-in `ApiTable` into this package's own cache and reports its
/// published definitions back through the same table.
///
/// # Safety
/// `table` must be a valid, non-null pointer to an `ApiTable` the kernel
/// has fully populated except for `defs`/`count`, per the handshake
/// contract.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn getDefinitions(table: *mut ApiTable) {
    // SAFETY: see function-level safety comment.
    let table_ref = unsafe { &mut *table };
    api::install(*table_ref);

    let defs = definitions();
    table_ref.defs = defs.as_ptr();
    table_ref.count = defs.len();

    trace!(count = defs.len(), "ember-std published its definitions");
}
