//! Result types returned by the validator, dispatcher and upload pipeline.

use crate::error::DocError;
use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ── Validated input ──────────────────────────────────────────────────────

/// What an admitted file is, judged by its extension (PDFs additionally by
/// their `%PDF` signature).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Word,
    Image,
    Csv,
    Unknown,
}

impl FileKind {
    /// Classify a lower-case extension (no dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "pdf" => FileKind::Pdf,
            "doc" | "docx" => FileKind::Word,
            "jpg" | "jpeg" | "png" => FileKind::Image,
            "csv" => FileKind::Csv,
            _ => FileKind::Unknown,
        }
    }
}

/// An upload that passed every check and now lives inside the upload root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedFile {
    /// Sanitised name; also the file name on disk.
    pub sanitized_filename: String,
    /// Canonical path, always a descendant of the upload root.
    pub absolute_path: PathBuf,
    pub byte_size: u64,
    pub detected_kind: FileKind,
}

impl ValidatedFile {
    pub fn path(&self) -> &Path {
        &self.absolute_path
    }
}

// ── Conversion result ────────────────────────────────────────────────────

/// Coarse outcome of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionStatus {
    Success,
    Failure,
    UnsupportedOnPlatform,
}

/// Uniform result of dispatching one operation.
///
/// `output_path` is set exactly when `status` is [`ConversionStatus::Success`];
/// `error` is set otherwise.
#[derive(Debug)]
pub struct ConversionResult {
    pub operation: Option<Operation>,
    pub status: ConversionStatus,
    pub output_path: Option<PathBuf>,
    pub error: Option<DocError>,
}

impl ConversionResult {
    pub fn success(operation: Operation, output: PathBuf) -> Self {
        Self {
            operation: Some(operation),
            status: ConversionStatus::Success,
            output_path: Some(output),
            error: None,
        }
    }

    /// Wrap an error, picking the status from its kind.
    pub fn failure(operation: Option<Operation>, error: DocError) -> Self {
        let status = match error {
            DocError::UnsupportedOnPlatform { .. } => ConversionStatus::UnsupportedOnPlatform,
            _ => ConversionStatus::Failure,
        };
        Self {
            operation,
            status,
            output_path: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ConversionStatus::Success
    }

    /// The user-facing reason, if the dispatch did not succeed.
    pub fn failure_reason(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }

    /// Serialisable view for logs and `--json` output.
    pub fn report(&self) -> ConversionReport {
        ConversionReport {
            operation: self.operation,
            status: self.status,
            output_path: self.output_path.clone(),
            output_filename: self
                .output_path
                .as_deref()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned()),
            failure_reason: self.failure_reason(),
        }
    }
}

/// Plain-data copy of a [`ConversionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionReport {
    pub operation: Option<Operation>,
    pub status: ConversionStatus,
    pub output_path: Option<PathBuf>,
    pub output_filename: Option<String>,
    pub failure_reason: Option<String>,
}

// ── Request lifecycle ────────────────────────────────────────────────────

/// Where a request is in its lifecycle.
///
/// ```text
/// received → validating → rejected
///                       → processing → delivered
///                                    → failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Received,
    Validating,
    Rejected,
    Processing,
    Delivered,
    Failed,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Rejected | RequestState::Delivered | RequestState::Failed
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Received, Validating)
                | (Received, Rejected)
                | (Validating, Rejected)
                | (Validating, Processing)
                | (Processing, Delivered)
                | (Processing, Failed)
        )
    }
}
