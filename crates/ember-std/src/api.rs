//! The cached `ApiTable` every other module in this package calls
//! through, installed once at handshake time (`getDefinitions`).

use ember_abi::ApiTable;
use std::sync::OnceLock;

static API: OnceLock<ApiTable> = OnceLock::new();

pub(crate) fn install(table: ApiTable) {
    let _ = API.set(table);
}

pub(crate) fn api() -> &'static ApiTable {
    API.get()
        .expect("ember-std method called before getDefinitions installed its API table")
}
