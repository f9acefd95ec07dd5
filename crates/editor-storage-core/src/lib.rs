//! Core contract and shared types for document editor storage backends.
//!
//! This crate defines what every storage medium must provide so the editor
//! can treat them alike:
//! - `Backend`: find / load / create / save, plus autosave on demand
//! - `AutosaveRegistry`: files to save when the editor loses focus or closes
//! - `BackendRegistry`: the ordered list of backends offered to the user
//!
//! `MemoryBackend` and `NullBackend` are built-in implementations.

mod autosave;
mod backend;
mod descriptor;
mod error;
mod memory;
mod null;
mod registry;

pub use autosave::{
    AutosaveBatch, AutosaveRegistry, AutosaveReport, GetData, NeedsSaving, PendingSave, WaitingSave,
};
pub use backend::{Backend, ChangeNotifier, ChangeSignal, LoadedFile};
pub use descriptor::{FileDescriptor, Location};
pub use error::StorageError;
pub use memory::MemoryBackend;
pub use null::NullBackend;
pub use registry::BackendRegistry;
