//! Directory-based package loading and the `getDefinitions` handshake.

mod error;
mod trampolines;

pub use error::LoaderError;

use ember_abi::{GetDefinitionsFn, HANDSHAKE_SYMBOL};
use ember_kernel::Runtime;
use libloading::{Library, Symbol};
use std::path::Path;
use tracing::warn;

/// Keeps every loaded package's `Library` alive for the process lifetime
/// (never unloaded before teardown, per `ember-kernel`'s definition
/// ownership contract) and hands packages their `ApiTable` during the
/// handshake.
#[derive(Default)]
pub struct Loader {
    libraries: Vec<Library>,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the shared library at `path`, performs the handshake, and
    /// registers whatever definitions it published into `runtime`.
    pub fn load_package(&mut self, runtime: &mut Runtime, path: &Path) -> Result<(), LoaderError> {
        // SAFETY: loading and initializing an arbitrary shared library is
        // inherently unsafe; we trust `path` to name a conforming Ember
        // package, as the loader contract requires.
        let library = unsafe { Library::new(path) }.map_err(|source| LoaderError::LibraryLoad {
            path: path.to_path_buf(),
            source,
        })?;

        // SAFETY: `HANDSHAKE_SYMBOL` names the one export every package is
        // required to provide; the signature is asserted by `GetDefinitionsFn`.
        let get_definitions: Symbol<GetDefinitionsFn> =
            unsafe { library.get(HANDSHAKE_SYMBOL) }.map_err(|_| LoaderError::MissingSymbol {
                path: path.to_path_buf(),
            })?;

        let mut table = trampolines::build_api_table(runtime);
        // SAFETY: `table` is fully populated by `build_api_table` before
        // this call, matching `getDefinitions`'s documented contract.
        unsafe { get_definitions(&mut table) };

        if !table.defs.is_null() && table.count > 0 {
            // SAFETY: the package is required to keep `defs` valid for the
            // process lifetime; we keep its `Library` open to guarantee
            // that for the `static`/leaked storage the common case uses.
            let defs = unsafe { std::slice::from_raw_parts(table.defs, table.count) };
            runtime.register(defs);
        }

        self.libraries.push(library);
        Ok(())
    }

    /// Loads every recognized shared library directly inside `dir`
    /// (non-recursive), skipping anything that isn't a platform shared
    /// library and reporting (but not failing on) a package that doesn't
    /// load or handshake cleanly.
    pub fn load_from_directory(&mut self, runtime: &mut Runtime, dir: &Path) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || !is_package_extension(&path) {
                continue;
            }
            if let Err(err) = self.load_package(runtime, &path) {
                warn!(path = %path.display(), error = %err, "skipping package");
            }
        }
        Ok(())
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        // Unload in reverse order: a package's `Definition` records may
        // (in principle) reference static data whose finalizers a later
        // library's own teardown expects to still be mapped.
        while let Some(library) = self.libraries.pop() {
            drop(library);
        }
    }
}

#[cfg(target_os = "windows")]
fn is_package_extension(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("dll") | Some("DLL")
    )
}

#[cfg(target_os = "macos")]
fn is_package_extension(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("dylib"))
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn is_package_extension(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("so")
        || path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.contains(".so."))
            .unwrap_or(false)
}
