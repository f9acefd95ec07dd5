use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle identifying a file stored by a backend.
///
/// Only the backend named in `backend` interprets `uri` and `metadata`
/// (a path, a cloud object id, a storage key). Callers keep the descriptor
/// as a token and hand it back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Identifier of the backend that issued this descriptor
    pub backend: String,
    /// Backend-specific locator
    pub uri: String,
    /// Backend-specific extra data (object ids, revision tags, etc.)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl FileDescriptor {
    pub fn new(backend: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            uri: uri.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata value.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether this descriptor was issued by the given backend.
    pub fn belongs_to(&self, backend_name: &str) -> bool {
        self.backend == backend_name
    }
}

impl fmt::Display for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend, self.uri)
    }
}

/// Parent container of a file (directory, folder id, key prefix).
///
/// Obtained from `Backend::get_location` and passed to `find` / `create`
/// to stay in "the same folder" as a known file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(String);

impl Location {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Location {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Location {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_serde() {
        let descriptor = FileDescriptor::new("memory", "docs/talk.svg").with_metadata("rev", "3");

        let json = serde_json::to_string(&descriptor).unwrap();
        let parsed: FileDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, descriptor);

        // Metadata is optional on the wire
        let parsed: FileDescriptor =
            serde_json::from_str(r#"{"backend":"local","uri":"/tmp/a.svg"}"#).unwrap();
        assert!(parsed.metadata.is_empty());
        assert!(parsed.belongs_to("local"));
    }

    #[test]
    fn test_location_is_transparent() {
        let location = Location::from("docs");
        assert_eq!(serde_json::to_string(&location).unwrap(), r#""docs""#);
        assert_eq!(location.to_string(), "docs");
    }
}
