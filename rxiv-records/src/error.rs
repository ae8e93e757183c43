//! Error types for record streaming, extraction and manifest parsing

use std::path::PathBuf;

/// Result type for container-level operations.
pub type Result<T> = std::result::Result<T, RecordsError>;

/// A single bibliographic record failed required-field validation.
///
/// This is a per-record condition: callers skip the record and count it, the
/// rest of the container is unaffected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed record {}: {reason}", identifier.as_deref().unwrap_or("<unknown>"))]
pub struct MalformedRecordError {
    /// Header identifier of the offending record, when it had one
    pub identifier: Option<String>,
    /// Which requirement the record violated
    pub reason: String,
}

impl MalformedRecordError {
    pub fn new(identifier: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            identifier: identifier.map(str::to_string),
            reason: reason.into(),
        }
    }
}

/// Errors that abort processing of a whole container or manifest.
#[derive(Debug, thiserror::Error)]
pub enum RecordsError {
    /// The container could not be opened or read
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The container is not well-formed XML
    #[error("XML error in {path} at byte {position}: {source}")]
    Xml {
        path: PathBuf,
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    /// The manifest document did not match the expected shape
    #[error("Invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: quick_xml::DeError,
    },
}

impl RecordsError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
