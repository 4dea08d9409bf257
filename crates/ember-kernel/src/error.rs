//! Error types surfaced by the kernel.

use thiserror::Error;

/// Errors the kernel itself can raise. Loader-side failures (bad shared
/// objects, missing handshake symbols) live in `ember-loader`'s own
/// error type and are reported, not propagated here: a package that
/// fails to load is skipped and the runtime continues. A missing
/// definition at `new_instance` is not one of these either — it returns
/// `None`, per spec.md §7, rather than an error value.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no App::Main entry point was registered")]
    MissingEntryPoint,
}
