mod notify_watcher;

pub use notify_watcher::{content_hash, NotifyFileWatcher};
