//! Error types for the docshift library.
//!
//! Two error types reflect two different audiences:
//!
//! * [`DocError`] covers every way a single request can end without an output:
//!   a rejected upload, an unknown operation, a backend that could not
//!   produce the artifact. The `Display` text is user-facing; the variant is
//!   what callers branch on.
//!
//! * [`HistoryError`] means the history store failed. These never surface as a
//!   `DocError`: a conversion that already succeeded stays successful even
//!   when its log entry cannot be written.

use std::path::PathBuf;
use thiserror::Error;

/// All request-level failures returned by the docshift library.
#[derive(Debug, Error)]
pub enum DocError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// Nothing usable was left after sanitising the client filename.
    #[error("Invalid filename: '{name}'")]
    InvalidFilename { name: String },

    /// The name would resolve outside the upload root.
    #[error("Path traversal attempt detected: '{name}'")]
    PathTraversal { name: String },

    /// The extension is not on the operation's allow-list.
    #[error("File type not allowed for {operation}: '{filename}' (allowed: {allowed})")]
    DisallowedExtension {
        filename: String,
        operation: String,
        allowed: String,
    },

    /// The upload is larger than the configured ceiling.
    #[error("File '{filename}' is too large ({size} bytes, limit {max} bytes)")]
    FileTooLarge { filename: String, size: u64, max: u64 },

    /// The file claims to be a PDF but does not start with `%PDF`.
    #[error("Invalid or corrupted PDF file: '{filename}'\nFirst bytes: {magic:?}")]
    CorruptOrSpoofedPdf { filename: String, magic: Vec<u8> },

    // ── Dispatch errors ───────────────────────────────────────────────────
    /// The operation identifier is not one of the known operations.
    #[error("Unsupported operation: '{0}'")]
    UnsupportedOperation(String),

    /// The operation exists but this host has no backend able to run it.
    #[error("{operation} is not available on this deployment: {detail}")]
    UnsupportedOnPlatform { operation: String, detail: String },

    /// The backend ran and failed; `reason` is human-readable.
    #[error("Conversion failed: {reason}")]
    BackendFailure { reason: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The password does not open the encrypted document.
    #[error("Incorrect password")]
    IncorrectPassword,

    /// The document has no pages to work with.
    #[error("PDF has no pages")]
    EmptyDocument,

    /// The requested pages do not satisfy `1 <= start <= end <= total`.
    #[error("Invalid page range: {start}-{end} (document has {total} pages)")]
    InvalidPageRange { start: u32, end: u32, total: u32 },

    /// Merge needs at least two inputs.
    #[error("Please select at least 2 PDF files to merge (got {count})")]
    InsufficientMergeInputs { count: usize },

    /// A primitive parameter (password, opacity, angle, …) is unusable.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // ── Config / I/O errors ───────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Filesystem failure while admitting an upload.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DocError {
    /// Shorthand for a [`DocError::BackendFailure`].
    pub fn backend(reason: impl Into<String>) -> Self {
        DocError::BackendFailure {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`DocError::Io`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DocError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures detected before any backend ran.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DocError::InvalidFilename { .. }
                | DocError::PathTraversal { .. }
                | DocError::DisallowedExtension { .. }
                | DocError::FileTooLarge { .. }
                | DocError::CorruptOrSpoofedPdf { .. }
        )
    }
}

impl From<lopdf::Error> for DocError {
    fn from(err: lopdf::Error) -> Self {
        DocError::backend(format!("PDF error: {err}"))
    }
}

/// Failures of the history store.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The SQLite backend rejected the statement or could not be opened.
    #[error("History database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored timestamp could not be parsed back.
    #[error("Corrupt history timestamp '{0}'")]
    Timestamp(String),

    /// A stored row names an operation this build does not know.
    #[error("Unknown operation '{0}' in history")]
    UnknownOperation(String),

    /// The store's lock was poisoned by a panicking writer.
    #[error("History store unavailable: {0}")]
    Unavailable(String),
}
