//! Local filesystem storage backend for the document editor.
//!
//! - `LocalFileBackend`: implements the `Backend` contract on a directory tree
//! - `NotifyFileWatcher`: single-shot external change detection for loaded files

mod backend;
mod watch;

pub use backend::{LocalFileBackend, BACKEND_NAME};
pub use watch::{content_hash, NotifyFileWatcher};
