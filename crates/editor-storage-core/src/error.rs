use thiserror::Error;

/// Errors reported by storage backends.
///
/// Every fallible backend operation completes with one of these instead of
/// panicking, so the editor always observes the end of the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Load error: {0}")]
    Load(String),

    #[error("Create error: {0}")]
    Create(String),

    #[error("Save error: {0}")]
    Save(String),

    /// The backend does not support the operation.
    #[error("Not implemented")]
    NotImplemented,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Watch error: {0}")]
    Watch(String),
}
