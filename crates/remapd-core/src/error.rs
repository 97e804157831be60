// Remapd Error Taxonomy
// Crate-wide error type returned by the coordinator surface

use crate::macros::parser::SyntaxError;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by lifecycle and load operations.
///
/// Runtime read errors inside an already-running session are logged and
/// terminate that session only; they never travel through this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or unreadable preset/config document.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed macro program text.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    /// A key or button name not present in the key name table.
    #[error("unknown key name \"{0}\"")]
    UnknownKeyName(String),

    /// A device could not be found, opened or grabbed.
    #[error("device error: {0}")]
    Device(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a serde_json failure as a config error for the given file.
    pub(crate) fn config_in(path: &std::path::Path, error: impl std::fmt::Display) -> Self {
        Error::Config(format!("{}: {}", path.display(), error))
    }
}
