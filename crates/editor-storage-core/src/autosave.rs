use std::future::Future;
use std::sync::Arc;

use futures::future::{join, join_all};
use parking_lot::Mutex;
use tokio::sync::{Mutex as SaveLock, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::descriptor::FileDescriptor;
use crate::error::StorageError;

/// Dirty check supplied by the document model, evaluated at flush time.
pub type NeedsSaving = Box<dyn Fn() -> bool + Send + Sync>;

/// Content producer supplied by the document model, called only for dirty files.
pub type GetData = Box<dyn Fn() -> String + Send + Sync>;

/// A file registered for automatic saving.
struct AutosaveEntry {
    descriptor: FileDescriptor,
    needs_saving: NeedsSaving,
    get_data: GetData,
    /// Held for the whole duration of an autosave of this entry
    save_lock: Arc<SaveLock<()>>,
}

/// Ordered list of files to save automatically.
///
/// Entries are appended by `register` and never removed. Flushing is driven
/// by the caller (focus loss, shutdown); the registry has no timer.
#[derive(Default)]
pub struct AutosaveRegistry {
    entries: Mutex<Vec<Arc<AutosaveEntry>>>,
}

impl std::fmt::Debug for AutosaveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutosaveRegistry")
            .field("entries", &self.descriptors())
            .finish()
    }
}

impl AutosaveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a file to the autosave list.
    ///
    /// Registering the same descriptor twice is allowed; both entries are
    /// then checked on every flush.
    pub fn register(
        &self,
        descriptor: FileDescriptor,
        needs_saving: NeedsSaving,
        get_data: GetData,
    ) {
        debug!("Registered {} for autosave", descriptor);
        self.entries.lock().push(Arc::new(AutosaveEntry {
            descriptor,
            needs_saving,
            get_data,
            save_lock: Arc::new(SaveLock::new(())),
        }));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Registered descriptors, in registration order.
    pub fn descriptors(&self) -> Vec<FileDescriptor> {
        self.entries
            .lock()
            .iter()
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// Walk a snapshot of the entries in registration order and gather the
    /// data of every dirty one.
    ///
    /// `get_data` is only called when `needs_saving` returned true. An entry
    /// whose previous autosave is still running is queued as waiting: once
    /// that save completes, `run` checks it again and saves it if it is
    /// still dirty. At most one autosave per entry runs at a time.
    pub fn collect(&self) -> AutosaveBatch {
        // Snapshot so user closures run without the list locked
        let snapshot: Vec<Arc<AutosaveEntry>> = self.entries.lock().clone();

        let mut batch = AutosaveBatch::default();
        for entry in snapshot {
            let guard = match entry.save_lock.clone().try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    debug!("Autosave of {} in flight, queued behind it", entry.descriptor);
                    batch.waiting.push(WaitingSave { entry });
                    continue;
                }
            };

            match entry.dirty_data() {
                Some(data) => batch.pending.push(PendingSave {
                    entry,
                    data,
                    guard,
                }),
                None => batch.clean += 1,
            }
        }
        batch
    }
}

impl AutosaveEntry {
    /// Data to save, or `None` when the document is clean.
    fn dirty_data(&self) -> Option<String> {
        (self.needs_saving)().then(|| (self.get_data)())
    }
}

/// Data gathered for one dirty entry, waiting to be saved.
pub struct PendingSave {
    entry: Arc<AutosaveEntry>,
    data: String,
    /// Keeps later flushes of this entry waiting until the save completes
    guard: OwnedMutexGuard<()>,
}

impl PendingSave {
    pub fn descriptor(&self) -> &FileDescriptor {
        &self.entry.descriptor
    }

    pub fn data(&self) -> &str {
        &self.data
    }
}

/// Entry whose previous autosave was still running at collection time.
pub struct WaitingSave {
    entry: Arc<AutosaveEntry>,
}

impl WaitingSave {
    pub fn descriptor(&self) -> &FileDescriptor {
        &self.entry.descriptor
    }
}

/// Result of walking the autosave list, before any save was issued.
#[derive(Default)]
pub struct AutosaveBatch {
    /// Dirty entries, in registration order
    pub pending: Vec<PendingSave>,
    /// Entries queued behind an autosave still running
    pub waiting: Vec<WaitingSave>,
    /// Number of entries that did not need saving
    pub clean: usize,
}

impl AutosaveBatch {
    /// Issue every pending save at once and wait for all of them.
    ///
    /// Waiting entries are checked again as soon as their running autosave
    /// completes, and saved if they are still dirty. The call resolves once
    /// every save it issued has completed.
    pub async fn run<F, Fut>(self, save: F) -> AutosaveReport
    where
        F: Fn(FileDescriptor, String) -> Fut,
        Fut: Future<Output = Result<(), StorageError>>,
    {
        let AutosaveBatch {
            pending,
            waiting,
            clean,
        } = self;

        let ready = pending.into_iter().map(|pending| {
            let descriptor = pending.entry.descriptor.clone();
            let save_future = save(descriptor.clone(), pending.data);
            let guard = pending.guard;
            async move {
                let result = save_future.await;
                drop(guard);
                (descriptor, result)
            }
        });

        let save = &save;
        let queued = waiting.into_iter().map(|WaitingSave { entry }| async move {
            let _guard = entry.save_lock.clone().lock_owned().await;
            let data = entry.dirty_data()?;
            let descriptor = entry.descriptor.clone();
            let result = save(descriptor.clone(), data).await;
            Some((descriptor, result))
        });

        let (ready, queued) = join(join_all(ready), join_all(queued)).await;

        let mut report = AutosaveReport {
            clean,
            ..AutosaveReport::default()
        };
        for outcome in queued.iter() {
            match outcome {
                Some((descriptor, _)) => report.waited.push(descriptor.clone()),
                None => report.clean += 1,
            }
        }
        for (descriptor, result) in ready.into_iter().chain(queued.into_iter().flatten()) {
            match result {
                Ok(()) => {
                    debug!("Autosaved {}", descriptor);
                    report.saved.push(descriptor);
                }
                Err(e) => {
                    warn!("Autosave of {} failed: {}", descriptor, e);
                    report.failed.push((descriptor, e));
                }
            }
        }
        report
    }
}

/// Outcome of one `do_autosave` flush.
#[derive(Debug, Default)]
pub struct AutosaveReport {
    /// Files saved successfully
    pub saved: Vec<FileDescriptor>,
    /// Files whose save completed with an error
    pub failed: Vec<(FileDescriptor, StorageError)>,
    /// Files saved after waiting for a previous autosave of the same entry
    pub waited: Vec<FileDescriptor>,
    /// Number of registered files that did not need saving
    pub clean: usize,
}

impl AutosaveReport {
    /// Number of saves issued by the flush.
    pub fn attempted(&self) -> usize {
        self.saved.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: AutosaveReport) {
        self.saved.extend(other.saved);
        self.failed.extend(other.failed);
        self.waited.extend(other.waited);
        self.clean += other.clean;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn descriptor(uri: &str) -> FileDescriptor {
        FileDescriptor::new("test", uri)
    }

    /// Shared dirty flag plus a log of closure calls, as a document model would expose.
    #[derive(Clone, Default)]
    struct Document {
        dirty: Arc<AtomicBool>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Document {
        fn dirty() -> Self {
            let doc = Self::default();
            doc.dirty.store(true, Ordering::SeqCst);
            doc
        }

        fn register(&self, registry: &AutosaveRegistry, uri: &str) {
            let (dirty, calls) = (self.dirty.clone(), self.calls.clone());
            let name = uri.to_string();
            let needs_saving: NeedsSaving = Box::new(move || {
                calls.lock().push(format!("needs_saving:{}", name));
                dirty.load(Ordering::SeqCst)
            });

            let calls = self.calls.clone();
            let name = uri.to_string();
            let get_data: GetData = Box::new(move || {
                calls.lock().push(format!("get_data:{}", name));
                format!("<svg id=\"{}\"/>", name)
            });

            registry.register(descriptor(uri), needs_saving, get_data);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[test]
    fn test_register_keeps_order_and_duplicates() {
        let registry = AutosaveRegistry::new();
        assert!(registry.is_empty());

        let doc = Document::default();
        doc.register(&registry, "a.svg");
        doc.register(&registry, "b.svg");
        doc.register(&registry, "a.svg");

        assert_eq!(registry.len(), 3);
        let uris: Vec<String> = registry.descriptors().into_iter().map(|d| d.uri).collect();
        assert_eq!(uris, vec!["a.svg", "b.svg", "a.svg"]);
    }

    #[test]
    fn test_clean_entry_never_produces_data() {
        let registry = AutosaveRegistry::new();
        let doc = Document::default();
        doc.register(&registry, "a.svg");

        let batch = registry.collect();
        assert!(batch.pending.is_empty());
        assert_eq!(batch.clean, 1);
        assert_eq!(doc.calls(), vec!["needs_saving:a.svg"]);
    }

    #[test]
    fn test_dirty_entry_checked_before_data() {
        let registry = AutosaveRegistry::new();
        let doc = Document::dirty();
        doc.register(&registry, "a.svg");

        let batch = registry.collect();
        assert_eq!(batch.pending.len(), 1);
        assert_eq!(batch.pending[0].descriptor().uri, "a.svg");
        assert_eq!(batch.pending[0].data(), "<svg id=\"a.svg\"/>");
        assert_eq!(doc.calls(), vec!["needs_saving:a.svg", "get_data:a.svg"]);
    }

    #[test]
    fn test_entries_walked_in_registration_order() {
        let registry = AutosaveRegistry::new();
        let first = Document::default();
        let second = Document::dirty();
        // Share one call log between both documents
        let second = Document {
            calls: first.calls.clone(),
            ..second
        };
        first.register(&registry, "first.svg");
        second.register(&registry, "second.svg");

        let batch = registry.collect();
        assert_eq!(batch.pending.len(), 1);
        assert_eq!(batch.pending[0].descriptor().uri, "second.svg");
        assert_eq!(batch.clean, 1);
        assert_eq!(
            first.calls(),
            vec![
                "needs_saving:first.svg",
                "needs_saving:second.svg",
                "get_data:second.svg"
            ]
        );
    }

    #[test]
    fn test_in_flight_entry_is_queued() {
        let registry = AutosaveRegistry::new();
        let doc = Document::dirty();
        doc.register(&registry, "a.svg");

        let first = registry.collect();
        assert_eq!(first.pending.len(), 1);

        // First batch not finished yet: the entry waits, closures not called
        let overlapping = registry.collect();
        assert!(overlapping.pending.is_empty());
        assert_eq!(overlapping.waiting.len(), 1);
        assert_eq!(overlapping.waiting[0].descriptor(), &descriptor("a.svg"));
        assert_eq!(doc.calls().len(), 2);

        drop(first);
        let after = registry.collect();
        assert_eq!(after.pending.len(), 1);
    }

    #[tokio::test]
    async fn test_waiting_entry_saved_after_running_save() {
        let registry = AutosaveRegistry::new();
        let doc = Document::dirty();
        doc.register(&registry, "a.svg");

        let first = registry.collect();
        let overlapping = registry.collect();

        let saves = Arc::new(Mutex::new(Vec::new()));
        let log = saves.clone();
        let second = tokio::spawn(async move {
            overlapping
                .run(move |_, data| {
                    log.lock().push(data);
                    async { Ok::<(), StorageError>(()) }
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());
        assert!(saves.lock().is_empty());

        let first_report = first
            .run(|_, _| async { Ok::<(), StorageError>(()) })
            .await;
        assert_eq!(first_report.saved, vec![descriptor("a.svg")]);

        let second_report = second.await.unwrap();
        assert_eq!(second_report.saved, vec![descriptor("a.svg")]);
        assert_eq!(second_report.waited, vec![descriptor("a.svg")]);
        assert_eq!(saves.lock().len(), 1);
        // Checked again once the first save completed
        assert_eq!(
            doc.calls(),
            vec![
                "needs_saving:a.svg",
                "get_data:a.svg",
                "needs_saving:a.svg",
                "get_data:a.svg"
            ]
        );
    }

    #[tokio::test]
    async fn test_waiting_entry_clean_after_running_save() {
        let registry = AutosaveRegistry::new();
        let doc = Document::dirty();
        doc.register(&registry, "a.svg");

        let first = registry.collect();
        let overlapping = registry.collect();

        let (first_report, second_report) = tokio::join!(
            async {
                let report = first
                    .run(|_, _| async { Ok::<(), StorageError>(()) })
                    .await;
                doc.dirty.store(false, Ordering::SeqCst);
                report
            },
            overlapping.run(|_, _| async {
                Err::<(), StorageError>(StorageError::Save("unexpected".to_string()))
            })
        );

        assert_eq!(first_report.saved.len(), 1);
        assert_eq!(second_report.attempted(), 0);
        assert_eq!(second_report.clean, 1);
        assert!(second_report.waited.is_empty());
    }

    #[tokio::test]
    async fn test_run_reports_outcomes() {
        let registry = AutosaveRegistry::new();
        let doc = Document::dirty();
        doc.register(&registry, "ok.svg");
        doc.register(&registry, "broken.svg");
        Document::default().register(&registry, "clean.svg");

        let save_calls = Arc::new(AtomicUsize::new(0));
        let counter = save_calls.clone();
        let report = registry
            .collect()
            .run(move |descriptor, data| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    assert!(data.starts_with("<svg"));
                    if descriptor.uri == "broken.svg" {
                        Err(StorageError::Save("disk full".to_string()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(save_calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.attempted(), 2);
        assert_eq!(report.saved, vec![descriptor("ok.svg")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, descriptor("broken.svg"));
        assert_eq!(report.clean, 1);
        assert!(!report.is_success());

        // Locks were released once the saves completed
        assert_eq!(registry.collect().pending.len(), 2);
    }

    #[test]
    fn test_report_merge() {
        let mut total = AutosaveReport {
            saved: vec![descriptor("a.svg")],
            clean: 1,
            ..AutosaveReport::default()
        };
        total.merge(AutosaveReport {
            failed: vec![(descriptor("b.svg"), StorageError::NotImplemented)],
            waited: vec![descriptor("c.svg")],
            clean: 2,
            ..AutosaveReport::default()
        });

        assert_eq!(total.attempted(), 2);
        assert_eq!(total.waited.len(), 1);
        assert_eq!(total.clean, 3);
    }
}
