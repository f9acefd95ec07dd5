use async_trait::async_trait;
use tracing::debug;

use crate::autosave::AutosaveRegistry;
use crate::backend::{Backend, LoadedFile};
use crate::descriptor::{FileDescriptor, Location};
use crate::error::StorageError;

/// Backend with no storage behind it.
///
/// Every operation completes through its normal channel with the
/// "not implemented" outcome. Useful as a placeholder entry in the
/// registry while a real backend is being wired up.
#[derive(Debug, Default)]
pub struct NullBackend {
    autosave: AutosaveRegistry,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for NullBackend {
    fn backend_name(&self) -> &'static str {
        "null"
    }

    fn get_name(&self, _file: &FileDescriptor) -> String {
        String::new()
    }

    fn get_location(&self, _file: &FileDescriptor) -> Option<Location> {
        None
    }

    async fn find(&self, name: &str, _location: Option<&Location>) -> Option<FileDescriptor> {
        debug!("find({}) on null backend", name);
        None
    }

    async fn load(&self, _file: &FileDescriptor) -> Result<LoadedFile, StorageError> {
        Err(StorageError::NotImplemented)
    }

    async fn create(
        &self,
        _name: &str,
        _location: Option<&Location>,
        _mime_type: &str,
        _data: &str,
    ) -> Result<FileDescriptor, StorageError> {
        Err(StorageError::NotImplemented)
    }

    async fn save(&self, _file: &FileDescriptor, _data: &str) -> Result<(), StorageError> {
        Err(StorageError::NotImplemented)
    }

    fn autosave_registry(&self) -> &AutosaveRegistry {
        &self.autosave
    }
}
