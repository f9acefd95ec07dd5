mod local_file;

pub use local_file::{LocalFileBackend, BACKEND_NAME};
