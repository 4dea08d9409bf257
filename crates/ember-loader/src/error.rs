use std::path::PathBuf;
use thiserror::Error;

/// Failures opening or handshaking with a single shared library. Every
/// variant is reported and the offending library skipped; none of these
/// is a hard failure for the process as a whole.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to open shared library {path}: {source}")]
    LibraryLoad {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("{path} does not export the getDefinitions handshake symbol")]
    MissingSymbol { path: PathBuf },
}
