use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::autosave::{AutosaveRegistry, AutosaveReport, GetData, NeedsSaving};
use crate::descriptor::{FileDescriptor, Location};
use crate::error::StorageError;

/// Content of a successfully loaded file.
#[derive(Debug)]
pub struct LoadedFile {
    pub descriptor: FileDescriptor,
    pub data: String,
    /// Present when the backend watches the file for external changes
    pub changes: Option<ChangeSignal>,
}

/// Single-shot notification that a loaded file was modified externally.
///
/// Resolves with the descriptor on the first external modification after
/// the load that produced it. Resolves with `None` when the backend stops
/// watching (the file was loaded again, or the backend was dropped).
#[derive(Debug)]
pub struct ChangeSignal {
    receiver: oneshot::Receiver<FileDescriptor>,
}

impl ChangeSignal {
    /// Create a connected notifier / signal pair for `descriptor`.
    pub fn channel(descriptor: FileDescriptor) -> (ChangeNotifier, ChangeSignal) {
        let (sender, receiver) = oneshot::channel();
        (
            ChangeNotifier {
                descriptor,
                sender: Some(sender),
            },
            ChangeSignal { receiver },
        )
    }

    /// Wait for the file to change.
    pub async fn changed(self) -> Option<FileDescriptor> {
        self.receiver.await.ok()
    }

    /// Non-blocking check; `Some` once the change has been signalled.
    pub fn try_changed(&mut self) -> Option<FileDescriptor> {
        self.receiver.try_recv().ok()
    }
}

/// Backend side of a `ChangeSignal`.
#[derive(Debug)]
pub struct ChangeNotifier {
    descriptor: FileDescriptor,
    sender: Option<oneshot::Sender<FileDescriptor>>,
}

impl ChangeNotifier {
    /// Fire the change signal. Only the first call has an effect; returns
    /// whether this call fired it.
    pub fn notify(&mut self) -> bool {
        match self.sender.take() {
            Some(sender) => {
                // The editor may have dropped the signal already; nothing to report then
                let _ = sender.send(self.descriptor.clone());
                true
            }
            None => false,
        }
    }

    /// Whether the signal has already fired.
    pub fn is_spent(&self) -> bool {
        self.sender.is_none()
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }
}

/// Storage backend contract for documents opened in the editor.
///
/// Every async operation completes exactly once, on failure as well as on
/// success. `find` reports any failure as "not found"; the other
/// operations return a `StorageError`. Backends that cannot support an
/// operation complete it with `StorageError::NotImplemented`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the backend identifier (e.g., "local", "memory").
    fn backend_name(&self) -> &'static str;

    /// Base name of the file, for display.
    fn get_name(&self, file: &FileDescriptor) -> String;

    /// Parent container of the file, to `find` / `create` siblings.
    fn get_location(&self, file: &FileDescriptor) -> Option<Location>;

    /// Look for a file named `name` in `location` (the backend's default
    /// location when `None`).
    async fn find(&self, name: &str, location: Option<&Location>) -> Option<FileDescriptor>;

    /// Load the content of a file.
    ///
    /// If the backend detects external changes, the returned signal fires
    /// on the first modification after this load only. Writes made through
    /// `save` do not count as external modifications.
    async fn load(&self, file: &FileDescriptor) -> Result<LoadedFile, StorageError>;

    /// Create a new file with initial content.
    async fn create(
        &self,
        name: &str,
        location: Option<&Location>,
        mime_type: &str,
        data: &str,
    ) -> Result<FileDescriptor, StorageError>;

    /// Overwrite an existing file.
    async fn save(&self, file: &FileDescriptor, data: &str) -> Result<(), StorageError>;

    /// Autosave list owned by this backend instance.
    fn autosave_registry(&self) -> &AutosaveRegistry;

    /// Add a file to the list of files saved by `do_autosave`.
    fn autosave(&self, file: FileDescriptor, needs_saving: NeedsSaving, get_data: GetData) {
        self.autosave_registry().register(file, needs_saving, get_data);
    }

    /// Save every registered file that needs saving.
    ///
    /// Meant to be called when the editor loses focus and when it closes.
    /// Dirty checks run in registration order before any save is issued;
    /// the saves then run concurrently and the call resolves once all of
    /// them have completed. A file whose previous autosave is still running
    /// is checked again, and saved, once that save completes.
    async fn do_autosave(&self) -> AutosaveReport {
        self.autosave_registry()
            .collect()
            .run(move |file, data| async move { self.save(&file, &data).await })
            .await
    }
}
