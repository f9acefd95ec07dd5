use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use editor_storage_core::{ChangeNotifier, ChangeSignal, FileDescriptor, StorageError};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// SHA-256 of file content.
pub fn content_hash(content: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hasher.finalize().to_vec()
}

/// Hash of the file on disk, `None` when it cannot be read.
fn disk_hash(path: &Path) -> Option<Vec<u8>> {
    std::fs::read(path).ok().map(|content| content_hash(&content))
}

/// Directory whose events cover `path`.
fn watch_dir(path: &Path) -> &Path {
    path.parent().unwrap_or(path)
}

/// State for a watched file
struct WatchedFile {
    /// Hash of the content the editor last read or wrote
    known_hash: Vec<u8>,
    notifier: ChangeNotifier,
    /// Own writes started and not finished yet
    pending_writes: usize,
    /// Content hashes of the pending own writes
    written_hashes: Vec<Vec<u8>>,
    /// Bumped when an own write starts; a check that read the disk under an
    /// older generation is discarded
    generation: u64,
}

type WatchedFiles = DashMap<PathBuf, WatchedFile>;

/// The single OS watcher shared by all watched files.
#[derive(Default)]
struct SharedWatcher {
    /// Created on the first watch
    watcher: Option<RecommendedWatcher>,
    /// Watched directory -> number of watched files in it
    directories: HashMap<PathBuf, usize>,
}

/// External change detection using the `notify` crate.
///
/// Uses filesystem events (inotify on Linux, FSEvents on macOS, etc.) on
/// the parent directories of the watched files, through one OS watcher
/// shared by all of them. An event only counts as a change when the
/// SHA-256 of the file differs from the last known content, so the
/// backend's own writes and spurious events stay silent. Each watch fires
/// its `ChangeSignal` at most once.
pub struct NotifyFileWatcher {
    /// Watched files: path -> WatchedFile
    watched: Arc<WatchedFiles>,
    shared: Mutex<SharedWatcher>,
}

/// An own write in progress, see [`NotifyFileWatcher::begin_own_write`].
///
/// Change detection for the file is suspended until every own write on it
/// is dropped. The content on disk is then compared with what the editor
/// wrote.
#[must_use = "the write is finished when this is dropped"]
pub struct OwnWrite<'a> {
    watched: &'a WatchedFiles,
    path: PathBuf,
    active: bool,
}

impl Drop for OwnWrite<'_> {
    fn drop(&mut self) {
        if self.active {
            NotifyFileWatcher::end_own_write(self.watched, &self.path);
        }
    }
}

impl NotifyFileWatcher {
    pub fn new() -> Self {
        Self {
            watched: Arc::new(DashMap::new()),
            shared: Mutex::new(SharedWatcher::default()),
        }
    }

    /// Start watching `path`, whose content was just read as `content`.
    ///
    /// Replaces any previous watch on the same path; the signal of the
    /// previous watch then resolves to `None`.
    pub fn watch(
        &self,
        path: &Path,
        descriptor: FileDescriptor,
        content: &[u8],
    ) -> Result<ChangeSignal, StorageError> {
        let (notifier, signal) = ChangeSignal::channel(descriptor);

        let previous = self.watched.insert(
            path.to_path_buf(),
            WatchedFile {
                known_hash: content_hash(content),
                notifier,
                pending_writes: 0,
                written_hashes: Vec::new(),
                generation: 0,
            },
        );
        if previous.is_none() {
            // No map guard may be held here: the event thread locks the map
            if let Err(e) = self.add_directory(watch_dir(path)) {
                self.watched.remove(path);
                return Err(e);
            }
        }

        info!("Started watching {}", path.display());
        Ok(signal)
    }

    /// Announce a write of `content` by the editor itself.
    ///
    /// Until the returned guard is dropped, events and checks on `path` are
    /// ignored. On drop, the file is a change only if its content is neither
    /// the known content nor one the editor wrote.
    pub fn begin_own_write(&self, path: &Path, content: &[u8]) -> OwnWrite<'_> {
        let active = match self.watched.get_mut(path) {
            Some(mut entry) => {
                entry.pending_writes += 1;
                entry.generation += 1;
                entry.written_hashes.push(content_hash(content));
                true
            }
            None => false,
        };
        OwnWrite {
            watched: &self.watched,
            path: path.to_path_buf(),
            active,
        }
    }

    fn end_own_write(watched: &WatchedFiles, path: &Path) {
        let Some(mut entry) = watched.get_mut(path) else {
            return;
        };
        if entry.pending_writes == 0 {
            // Watch replaced while the write was running
            return;
        }
        entry.pending_writes -= 1;
        if entry.pending_writes > 0 {
            return;
        }

        let written = std::mem::take(&mut entry.written_hashes);
        // Read under the entry lock so no other own write starts in between
        match disk_hash(path) {
            Some(hash) if hash == entry.known_hash || written.contains(&hash) => {
                entry.known_hash = hash;
            }
            _ => {
                Self::fire(&mut entry, path);
            }
        }
    }

    /// Stop watching a file.
    pub fn unwatch(&self, path: &Path) {
        if self.watched.remove(path).is_some() {
            self.remove_directory(watch_dir(path));
            info!("Stopped watching {}", path.display());
        }
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched.contains_key(path)
    }

    /// Number of directories registered with the OS watcher.
    pub fn watched_directories(&self) -> usize {
        self.shared.lock().directories.len()
    }

    /// Compare the file on disk with the known content and fire the change
    /// signal if it differs. Covers platforms where events get lost.
    ///
    /// Returns whether this call fired the signal.
    pub fn check_for_changes(&self, path: &Path) -> bool {
        Self::check(&self.watched, path)
    }

    fn check(watched: &WatchedFiles, path: &Path) -> bool {
        let generation = match watched.get(path) {
            Some(entry) if entry.pending_writes == 0 && !entry.notifier.is_spent() => {
                entry.generation
            }
            _ => return false,
        };

        // Read without the entry locked; a missing file counts as a change
        let current = disk_hash(path);

        let Some(mut entry) = watched.get_mut(path) else {
            return false;
        };
        if entry.pending_writes > 0 || entry.generation != generation {
            return false;
        }
        if current.as_deref() == Some(entry.known_hash.as_slice()) {
            return false;
        }
        Self::fire(&mut entry, path)
    }

    fn fire(entry: &mut WatchedFile, path: &Path) -> bool {
        let fired = entry.notifier.notify();
        if fired {
            debug!(
                "Content of {} changed externally (known hash {})",
                path.display(),
                hex::encode(&entry.known_hash[..8])
            );
        }
        fired
    }

    fn add_directory(&self, dir: &Path) -> Result<(), StorageError> {
        let mut shared = self.shared.lock();
        if let Some(count) = shared.directories.get_mut(dir) {
            *count += 1;
            return Ok(());
        }

        if shared.watcher.is_none() {
            shared.watcher = Some(Self::spawn_watcher(Arc::downgrade(&self.watched))?);
        }
        if let Some(watcher) = shared.watcher.as_mut() {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|e| {
                    StorageError::Watch(format!("Failed to watch {}: {}", dir.display(), e))
                })?;
        }

        shared.directories.insert(dir.to_path_buf(), 1);
        debug!("Watching directory {}", dir.display());
        Ok(())
    }

    fn remove_directory(&self, dir: &Path) {
        let mut shared = self.shared.lock();
        let SharedWatcher {
            watcher,
            directories,
        } = &mut *shared;

        let Some(count) = directories.get_mut(dir) else {
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        directories.remove(dir);

        if let Some(watcher) = watcher.as_mut() {
            if let Err(e) = watcher.unwatch(dir) {
                debug!("Failed to unwatch {}: {}", dir.display(), e);
            }
        }
    }

    fn spawn_watcher(watched: Weak<WatchedFiles>) -> Result<RecommendedWatcher, StorageError> {
        RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        return;
                    }
                    let Some(watched) = watched.upgrade() else {
                        return;
                    };

                    // Event paths may be canonicalized, so match on the file name too
                    let paths: Vec<PathBuf> = watched
                        .iter()
                        .map(|entry| entry.key().clone())
                        .filter(|path| {
                            event.paths.iter().any(|p| {
                                p == path
                                    || (p.file_name().is_some()
                                        && p.file_name() == path.file_name())
                            })
                        })
                        .collect();

                    for path in paths {
                        Self::check(&watched, &path);
                    }
                }
                Err(e) => {
                    warn!("Watch error: {}", e);
                }
            },
            Config::default(),
        )
        .map_err(|e| StorageError::Watch(format!("Failed to create watcher: {}", e)))
    }
}

impl Default for NotifyFileWatcher {
    fn default() -> Self {
        Self::new()
    }
}
