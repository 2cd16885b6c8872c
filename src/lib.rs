//! # docshift
//!
//! Validate untrusted document uploads and turn them into something else:
//! PDF ↔ Word, image → PDF, CSV → PDF, and PDF page operations (split, merge,
//! encrypt, decrypt, watermark, rotate).
//!
//! ## Why this crate?
//!
//! A document-conversion service is mostly plumbing around one dangerous
//! step: writing a file whose name and bytes came from a stranger. docshift
//! confines every upload to a single root directory, checks its extension,
//! size and PDF signature, and only then hands the local path to a backend.
//! Every backend answers with the same [`ConversionResult`], so callers
//! branch on a typed [`DocError`] rather than on backend internals.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Parse     operation identifier → Operation (unknown → rejected)
//!  ├─ 2. Admit     sanitise name, confine to root, extension/size/signature
//!  ├─ 3. Dispatch  exhaustive match → adapter or PDF operation backend
//!  ├─ 4. Deliver   output path, consumed inputs removed
//!  └─ 5. Record    best-effort history entry
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docshift::{DocshiftConfig, Dispatcher, Upload, UploadPipeline, UploadRequest};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DocshiftConfig::builder().upload_root("./uploads").build()?;
//! let pipeline = UploadPipeline::new(Arc::new(Dispatcher::new(config)));
//!
//! let outcome = pipeline.handle(UploadRequest {
//!     operation: "rotate-pdf".into(),
//!     uploads: vec![Upload::file("scan.pdf")],
//!     params: Default::default(),
//!     user_id: None,
//! });
//! match outcome.result.output_path {
//!     Some(path) => println!("wrote {}", path.display()),
//!     None => eprintln!("{}", outcome.result.failure_reason().unwrap_or_default()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docshift` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docshift = { version = "0.3", default-features = false }
//! ```
//!
//! ## Word → PDF
//!
//! Word conversion needs an office suite on the host. [`Dispatcher::new`]
//! picks one at startup (Word automation on Windows, `soffice` elsewhere);
//! without one, `word-to-pdf` reports
//! [`DocError::UnsupportedOnPlatform`] instead of a generic failure.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cleanup;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod operation;
pub mod output;
pub mod pipeline;
pub mod service;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cleanup::{sweep, SweepReport};
pub use config::{DocshiftConfig, DocshiftConfigBuilder, ExtensionPolicy};
pub use dispatch::Dispatcher;
pub use error::{DocError, HistoryError};
pub use history::{record_best_effort, HistoryEntry, HistoryRecorder, MemoryHistory, SqliteHistory};
pub use operation::{Operation, OperationParams, PageRange};
pub use output::{ConversionReport, ConversionResult, ConversionStatus, FileKind, RequestState, ValidatedFile};
pub use pipeline::office::{select_office_backend, OfficeBackend};
pub use pipeline::validate::{admit, UploadSource};
pub use service::{RequestOutcome, Upload, UploadPipeline, UploadRequest};
