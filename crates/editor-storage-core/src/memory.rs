use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::autosave::AutosaveRegistry;
use crate::backend::{Backend, ChangeNotifier, ChangeSignal, LoadedFile};
use crate::descriptor::{FileDescriptor, Location};
use crate::error::StorageError;

const BACKEND_NAME: &str = "memory";

/// A file held in memory
#[derive(Debug)]
struct MemoryFile {
    mime_type: String,
    data: String,
    /// Change notifier of the latest load
    watcher: Option<ChangeNotifier>,
}

/// In-process storage, the equivalent of browser storage.
///
/// Files are keyed by `"{location}/{name}"` (just `name` in the root
/// location). `modify_externally` stands in for another tab or process
/// writing to the same storage, and drives change detection.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    files: Mutex<HashMap<String, MemoryFile>>,
    autosave: AutosaveRegistry,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str, location: Option<&Location>) -> String {
        match location.map(Location::as_str) {
            None | Some("") => name.to_string(),
            Some(location) => format!("{}/{}", location.trim_end_matches('/'), name),
        }
    }

    fn check_descriptor(file: &FileDescriptor) -> Result<(), StorageError> {
        if !file.belongs_to(BACKEND_NAME) {
            return Err(StorageError::InvalidArgument(format!(
                "MemoryBackend cannot handle descriptors of backend {:?}",
                file.backend
            )));
        }
        Ok(())
    }

    /// Replace the content of a file as if someone else wrote it.
    ///
    /// Fires the change signal of the latest load, if it has not fired yet.
    pub fn modify_externally(&self, file: &FileDescriptor, data: &str) -> Result<(), StorageError> {
        Self::check_descriptor(file)?;
        let mut files = self.files.lock();
        let stored = files
            .get_mut(&file.uri)
            .ok_or_else(|| StorageError::NotFound(file.uri.clone()))?;

        stored.data = data.to_string();
        if let Some(watcher) = stored.watcher.as_mut() {
            if watcher.notify() {
                debug!("External change detected for {}", file);
            }
        }
        Ok(())
    }

    /// Current content and MIME type of a file.
    pub fn contents(&self, file: &FileDescriptor) -> Option<(String, String)> {
        self.files
            .lock()
            .get(&file.uri)
            .map(|f| (f.mime_type.clone(), f.data.clone()))
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn get_name(&self, file: &FileDescriptor) -> String {
        match file.uri.rsplit_once('/') {
            Some((_, name)) => name.to_string(),
            None => file.uri.clone(),
        }
    }

    fn get_location(&self, file: &FileDescriptor) -> Option<Location> {
        match file.uri.rsplit_once('/') {
            Some((location, _)) => Some(Location::new(location)),
            None => Some(Location::new("")),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn find(&self, name: &str, location: Option<&Location>) -> Option<FileDescriptor> {
        let key = Self::key(name, location);
        self.files
            .lock()
            .contains_key(&key)
            .then(|| FileDescriptor::new(BACKEND_NAME, key))
    }

    #[instrument(skip(self), level = "debug")]
    async fn load(&self, file: &FileDescriptor) -> Result<LoadedFile, StorageError> {
        Self::check_descriptor(file)?;
        let mut files = self.files.lock();
        let stored = files
            .get_mut(&file.uri)
            .ok_or_else(|| StorageError::Load(format!("{} does not exist", file.uri)))?;

        // Replacing the notifier retires the signal of the previous load
        let (notifier, signal) = ChangeSignal::channel(file.clone());
        stored.watcher = Some(notifier);

        debug!("Loaded {} bytes from {}", stored.data.len(), file);
        Ok(LoadedFile {
            descriptor: file.clone(),
            data: stored.data.clone(),
            changes: Some(signal),
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
        if name.is_empty() || name.contains('/') {
            return Err(StorageError::Create(format!("Invalid file name {:?}", name)));
        }

        let key = Self::key(name, location);
        let mut files = self.files.lock();
        if files.contains_key(&key) {
            return Err(StorageError::Create(format!("{} already exists", key)));
        }

        files.insert(
            key.clone(),
            MemoryFile {
                mime_type: mime_type.to_string(),
                data: data.to_string(),
                watcher: None,
            },
        );
        debug!("Created {} ({})", key, mime_type);
        Ok(FileDescriptor::new(BACKEND_NAME, key))
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn save(&self, file: &FileDescriptor, data: &str) -> Result<(), StorageError> {
        Self::check_descriptor(file)?;
        let mut files = self.files.lock();
        let stored = files
            .get_mut(&file.uri)
            .ok_or_else(|| StorageError::Save(format!("{} does not exist", file.uri)))?;

        stored.data = data.to_string();
        Ok(())
    }

    fn autosave_registry(&self) -> &AutosaveRegistry {
        &self.autosave
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    const SVG: &str = "image/svg+xml";

    async fn setup() -> (MemoryBackend, FileDescriptor) {
        let backend = MemoryBackend::new();
        let file = backend
            .create("talk.svg", Some(&Location::from("talks")), SVG, "<svg/>")
            .await
            .unwrap();
        (backend, file)
    }

    #[tokio::test]
    async fn test_find_missing_file() {
        let (backend, _file) = setup().await;

        assert_eq!(backend.find("missing.svg", None).await, None);
        assert_eq!(backend.find("talk.svg", None).await, None);
        assert_eq!(
            backend.find("talk.svg", Some(&Location::from("talks"))).await,
            Some(FileDescriptor::new("memory", "talks/talk.svg"))
        );
    }

    #[tokio::test]
    async fn test_name_and_location() {
        let (backend, file) = setup().await;

        assert_eq!(backend.get_name(&file), "talk.svg");
        let location = backend.get_location(&file);
        assert_eq!(location, Some(Location::from("talks")));

        // Siblings are found through the location of a known file
        backend
            .create("talk.json", location.as_ref(), "application/json", "{}")
            .await
            .unwrap();
        assert!(backend.find("talk.json", location.as_ref()).await.is_some());

        let root = backend.create("root.svg", None, SVG, "").await.unwrap();
        assert_eq!(backend.get_location(&root), Some(Location::from("")));
    }

    #[tokio::test]
    async fn test_create_existing_file() {
        let (backend, _file) = setup().await;

        let err = backend
            .create("talk.svg", Some(&Location::from("talks")), SVG, "")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Create(_)));
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_load() {
        let (backend, file) = setup().await;

        let loaded = backend.load(&file).await.unwrap();
        assert_eq!(loaded.descriptor, file);
        assert_eq!(loaded.data, "<svg/>");
        assert!(loaded.changes.is_some());
    }

    #[tokio::test]
    async fn test_load_failure() {
        let backend = MemoryBackend::new();

        let err = backend
            .load(&FileDescriptor::new("memory", "missing.svg"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Load(_)));

        let err = backend
            .load(&FileDescriptor::new("local", "/tmp/a.svg"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_change_signalled_once_after_load() {
        let (backend, file) = setup().await;

        let mut changes = backend.load(&file).await.unwrap().changes.unwrap();
        assert_eq!(changes.try_changed(), None);

        backend.modify_externally(&file, "<svg id=\"1\"/>").unwrap();
        assert_eq!(changes.try_changed(), Some(file.clone()));

        // Second modification before the next load stays silent
        backend.modify_externally(&file, "<svg id=\"2\"/>").unwrap();
        assert_eq!(changes.try_changed(), None);

        // A new load re-arms change detection
        let loaded = backend.load(&file).await.unwrap();
        assert_eq!(loaded.data, "<svg id=\"2\"/>");
        let changes = loaded.changes.unwrap();
        backend.modify_externally(&file, "<svg id=\"3\"/>").unwrap();
        assert_eq!(changes.changed().await, Some(file));
    }

    #[tokio::test]
    async fn test_own_save_is_not_a_change() {
        let (backend, file) = setup().await;

        let mut changes = backend.load(&file).await.unwrap().changes.unwrap();
        backend.save(&file, "<svg id=\"mine\"/>").await.unwrap();

        assert_eq!(changes.try_changed(), None);
        assert_eq!(
            backend.contents(&file),
            Some((SVG.to_string(), "<svg id=\"mine\"/>".to_string()))
        );
    }

    #[tokio::test]
    async fn test_reload_retires_previous_signal() {
        let (backend, file) = setup().await;

        let first = backend.load(&file).await.unwrap().changes.unwrap();
        let _second = backend.load(&file).await.unwrap().changes.unwrap();

        assert_eq!(first.changed().await, None);
    }

    #[tokio::test]
    async fn test_save_missing_file() {
        let backend = MemoryBackend::new();

        let err = backend
            .save(&FileDescriptor::new("memory", "missing.svg"), "<svg/>")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Save(_)));
    }

    #[tokio::test]
    async fn test_autosave_clean_file_not_saved() {
        let (backend, file) = setup().await;
        let produced = Arc::new(AtomicBool::new(false));

        let flag = produced.clone();
        backend.autosave(
            file.clone(),
            Box::new(|| false),
            Box::new(move || {
                flag.store(true, Ordering::SeqCst);
                "<svg id=\"new\"/>".to_string()
            }),
        );

        let report = backend.do_autosave().await;
        assert_eq!(report.attempted(), 0);
        assert_eq!(report.clean, 1);
        assert!(!produced.load(Ordering::SeqCst));
        assert_eq!(backend.contents(&file).unwrap().1, "<svg/>");
    }

    #[tokio::test]
    async fn test_autosave_dirty_file_saved_once() {
        let (backend, file) = setup().await;
        let produced = Arc::new(AtomicUsize::new(0));

        let counter = produced.clone();
        backend.autosave(
            file.clone(),
            Box::new(|| true),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                "<svg id=\"new\"/>".to_string()
            }),
        );

        let report = backend.do_autosave().await;
        assert_eq!(report.saved, vec![file.clone()]);
        assert_eq!(produced.load(Ordering::SeqCst), 1);
        assert_eq!(backend.contents(&file).unwrap().1, "<svg id=\"new\"/>");
    }

    #[tokio::test]
    async fn test_autosave_only_dirty_of_two() {
        let backend = MemoryBackend::new();
        let first = backend.create("a.svg", None, SVG, "a").await.unwrap();
        let second = backend.create("b.svg", None, SVG, "b").await.unwrap();

        backend.autosave(first.clone(), Box::new(|| false), Box::new(|| "a2".to_string()));
        backend.autosave(second.clone(), Box::new(|| true), Box::new(|| "b2".to_string()));

        let report = backend.do_autosave().await;
        assert_eq!(report.saved, vec![second.clone()]);
        assert_eq!(report.clean, 1);
        assert_eq!(backend.contents(&first).unwrap().1, "a");
        assert_eq!(backend.contents(&second).unwrap().1, "b2");
    }

    #[tokio::test]
    async fn test_autosave_reflects_current_dirty_state() {
        let (backend, file) = setup().await;
        let dirty = Arc::new(AtomicBool::new(false));

        let check = dirty.clone();
        backend.autosave(
            file.clone(),
            Box::new(move || check.load(Ordering::SeqCst)),
            Box::new(|| "<svg id=\"edited\"/>".to_string()),
        );

        assert_eq!(backend.do_autosave().await.attempted(), 0);

        // Dirtiness is read at flush time, not at registration time
        dirty.store(true, Ordering::SeqCst);
        assert_eq!(backend.do_autosave().await.saved, vec![file]);
    }
}
