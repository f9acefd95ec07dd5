use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use editor_storage_core::{GetData, NeedsSaving};
use parking_lot::Mutex;

/// Minimal text document with a dirty flag, the side of the editor that
/// autosave queries.
#[derive(Clone, Default)]
pub struct Document {
    content: Arc<Mutex<String>>,
    dirty: Arc<AtomicBool>,
}

impl Document {
    pub fn new(content: String) -> Self {
        Self {
            content: Arc::new(Mutex::new(content)),
            dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn append(&self, text: &str) {
        self.content.lock().push_str(text);
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn needs_saving(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn data(&self) -> String {
        self.content.lock().clone()
    }

    pub fn mark_saved(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }

    /// Closures to register with `Backend::autosave`.
    pub fn autosave_hooks(&self) -> (NeedsSaving, GetData) {
        let (check, source) = (self.clone(), self.clone());
        (
            Box::new(move || check.needs_saving()),
            Box::new(move || source.data()),
        )
    }
}
