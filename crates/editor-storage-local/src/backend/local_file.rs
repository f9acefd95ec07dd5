use std::io::{ErrorKind, Write as _};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use editor_storage_core::{
    AutosaveRegistry, Backend, FileDescriptor, LoadedFile, Location, StorageError,
};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::watch::NotifyFileWatcher;

pub const BACKEND_NAME: &str = "local";

/// Local filesystem backend.
///
/// Descriptors carry the absolute path of the file. Relative locations and
/// the default location resolve against the root directory. Loaded files
/// are watched for external changes; saves go through a temp file and a
/// rename so watchers never observe a half-written document.
pub struct LocalFileBackend {
    root: PathBuf,
    watcher: NotifyFileWatcher,
    autosave: AutosaveRegistry,
}

impl std::fmt::Debug for LocalFileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileBackend")
            .field("root", &self.root)
            .field("autosave", &self.autosave)
            .finish_non_exhaustive()
    }
}

impl LocalFileBackend {
    /// Create a new LocalFileBackend rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            watcher: NotifyFileWatcher::new(),
            autosave: AutosaveRegistry::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Descriptor for a path on disk.
    pub fn descriptor_for(path: &Path) -> FileDescriptor {
        FileDescriptor::new(BACKEND_NAME, path.to_string_lossy())
    }

    /// Get the file path from a descriptor.
    fn get_file_path(file: &FileDescriptor) -> Result<PathBuf, StorageError> {
        if !file.belongs_to(BACKEND_NAME) {
            return Err(StorageError::InvalidArgument(format!(
                "LocalFileBackend only supports local descriptors, got {:?}",
                file.backend
            )));
        }
        Ok(PathBuf::from(&file.uri))
    }

    /// Directory designated by a location.
    fn directory(&self, location: Option<&Location>) -> PathBuf {
        match location.map(Location::as_str) {
            None | Some("") => self.root.clone(),
            Some(dir) => self.root.join(dir),
        }
    }

    /// Path of `name` inside `location`. `name` must be a single file name.
    fn resolve(&self, name: &str, location: Option<&Location>) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.directory(location).join(name)),
            _ => Err(StorageError::InvalidArgument(format!(
                "Invalid file name {:?}",
                name
            ))),
        }
    }

    /// Compare a loaded file with its content on disk and fire its change
    /// signal if it differs. For platforms where filesystem events are lost.
    pub fn check_for_changes(&self, file: &FileDescriptor) -> Result<bool, StorageError> {
        let path = Self::get_file_path(file)?;
        Ok(self.watcher.check_for_changes(&path))
    }

    /// Stop change detection for a file.
    pub fn unwatch(&self, file: &FileDescriptor) -> Result<(), StorageError> {
        let path = Self::get_file_path(file)?;
        self.watcher.unwatch(&path);
        Ok(())
    }

    /// Write `data` to `path` atomically via a temp file in the same directory.
    async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), String> {
        let path = path.to_path_buf();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || Self::write_atomic_blocking(&path, &data))
            .await
            .map_err(|e| format!("Save task failed: {}", e))?
    }

    fn write_atomic_blocking(path: &Path, data: &[u8]) -> Result<(), String> {
        let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(format!("{} is not a file path", path.display()));
        };

        // Unique name per call: concurrent saves of one file get their own temp file
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name.to_string_lossy()))
            .suffix(".save.tmp")
            .tempfile_in(dir)
            .map_err(|e| format!("Failed to create temp file in {}: {}", dir.display(), e))?;

        temp.write_all(data).map_err(|e| {
            format!("Failed to write temp file {}: {}", temp.path().display(), e)
        })?;
        if let Ok(metadata) = std::fs::metadata(path) {
            temp.as_file()
                .set_permissions(metadata.permissions())
                .map_err(|e| format!("Failed to copy permissions of {}: {}", path.display(), e))?;
        }

        // The temp file is removed if the rename fails
        temp.persist(path).map_err(|e| {
            format!(
                "Failed to rename temp file to {}: {}",
                path.display(),
                e.error
            )
        })?;
        Ok(())
    }
}

#[async_trait]
impl Backend for LocalFileBackend {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn get_name(&self, file: &FileDescriptor) -> String {
        Path::new(&file.uri)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn get_location(&self, file: &FileDescriptor) -> Option<Location> {
        Path::new(&file.uri)
            .parent()
            .map(|p| Location::new(p.to_string_lossy()))
    }

    #[instrument(skip(self), level = "debug")]
    async fn find(&self, name: &str, location: Option<&Location>) -> Option<FileDescriptor> {
        let path = match self.resolve(name, location) {
            Ok(path) => path,
            Err(e) => {
                warn!("find: {}", e);
                return None;
            }
        };

        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Some(Self::descriptor_for(&path)),
            Ok(_) => {
                debug!("{} exists but is not a file", path.display());
                None
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to stat {}: {}", path.display(), e);
                None
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn load(&self, file: &FileDescriptor) -> Result<LoadedFile, StorageError> {
        let path = Self::get_file_path(file)?;

        let bytes = fs::read(&path).await.map_err(|e| {
            StorageError::Load(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let data = String::from_utf8(bytes).map_err(|e| {
            StorageError::Load(format!("{} is not valid UTF-8: {}", path.display(), e))
        })?;

        // A file that cannot be watched still loads
        let changes = match self.watcher.watch(&path, file.clone(), data.as_bytes()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!("Change detection unavailable for {}: {}", path.display(), e);
                None
            }
        };

        debug!("Loaded {} bytes from {}", data.len(), path.display());
        Ok(LoadedFile {
            descriptor: file.clone(),
            data,
            changes,
        })
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn create(
        &self,
        name: &str,
        location: Option<&Location>,
        mime_type: &str,
        data: &str,
    ) -> Result<FileDescriptor, StorageError> {
        let path = self
            .resolve(name, location)
            .map_err(|e| StorageError::Create(e.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::Create(format!(
                    "Failed to create parent directory for {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }

        let mut out = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    StorageError::Create(format!("{} already exists", path.display()))
                }
                _ => StorageError::Create(format!("Failed to create {}: {}", path.display(), e)),
            })?;

        let written = match out.write_all(data.as_bytes()).await {
            Ok(()) => out.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = fs::remove_file(&path).await;
            return Err(StorageError::Create(format!(
                "Failed to write {}: {}",
                path.display(),
                e
            )));
        }

        // MIME type is implied by the file extension on disk
        debug!("Created {} ({})", path.display(), mime_type);
        Ok(Self::descriptor_for(&path))
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn save(&self, file: &FileDescriptor, data: &str) -> Result<(), StorageError> {
        let path = Self::get_file_path(file)?;

        // Announced before the rename so it is not taken for an external change
        let _write = self.watcher.begin_own_write(&path, data.as_bytes());
        Self::write_atomic(&path, data.as_bytes())
            .await
            .map_err(StorageError::Save)?;

        debug!("Saved {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    fn autosave_registry(&self) -> &AutosaveRegistry {
        &self.autosave
    }
}
