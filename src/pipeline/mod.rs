//! Pipeline stages for one upload.
//!
//! Each submodule implements exactly one concern. Keeping them apart makes
//! each independently testable and lets a backend be swapped (e.g. a
//! different office suite) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! upload ──▶ validate ──▶ adapter / pdf_ops ──▶ output file
//!            (admit)      (convert / edit)
//! ```
//!
//! 1. [`validate`] sanitises the client filename, confines it to the upload
//!    root, checks extension, size and PDF signature
//! 2. [`adapter`] handles format conversions; Word goes through [`office`]
//! 3. [`pdf_ops`] runs split, merge, encrypt, decrypt, watermark, rotate
//!
//! [`assemble`], [`layout`], [`security`] and [`docx`] are the building
//! blocks the last two share.

pub mod adapter;
pub mod assemble;
pub mod docx;
pub mod layout;
pub mod office;
pub mod pdf_ops;
pub mod security;
pub mod validate;

#[cfg(test)]
pub(crate) mod fixtures;

use crate::error::DocError;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run a backend call, turning a panic inside a codec into
/// [`DocError::BackendFailure`].
pub fn guard_panics<T>(f: impl FnOnce() -> Result<T, DocError>) -> Result<T, DocError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("Backend panicked: {reason}");
            Err(DocError::backend(format!("backend panicked: {reason}")))
        }
    }
}
