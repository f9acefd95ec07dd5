use std::sync::Arc;

use tracing::{debug, info};

use crate::autosave::AutosaveReport;
use crate::backend::Backend;

/// Ordered set of storage backends offered by the editor.
///
/// Built once at startup and handed to whatever lists storage choices.
/// Insertion order is the order shown to the user.
#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn Backend>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.backends.iter().map(|b| b.backend_name()))
            .finish()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a backend. No duplicate check.
    pub fn add(&mut self, backend: Arc<dyn Backend>) {
        debug!("Registered backend {}", backend.backend_name());
        self.backends.push(backend);
    }

    /// Registered backends, in insertion order.
    pub fn list(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    /// First backend with the given name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Backend>> {
        self.backends.iter().find(|b| b.backend_name() == name)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Run `do_autosave` on every backend, in registry order.
    ///
    /// This is the hook for the editor's focus-loss and shutdown events.
    pub async fn do_autosave_all(&self) -> AutosaveReport {
        let mut report = AutosaveReport::default();
        for backend in &self.backends {
            report.merge(backend.do_autosave().await);
        }
        if report.attempted() > 0 {
            info!(
                "Autosave: {} saved, {} failed, {} after a previous save",
                report.saved.len(),
                report.failed.len(),
                report.waited.len()
            );
        }
        report
    }
}
