//! The single entry point from an operation name to a backend.
//!
//! ## Why one dispatcher?
//!
//! Callers (the upload pipeline, the CLI, a web layer) should not know which
//! backend owns which operation. [`Dispatcher::dispatch`] parses the name,
//! checks the input count, runs the backend with panics contained, removes
//! the consumed inputs, and always answers with a [`ConversionResult`].

use crate::config::DocshiftConfig;
use crate::error::DocError;
use crate::operation::{Operation, OperationParams};
use crate::output::{ConversionResult, ValidatedFile};
use crate::pipeline::office::{select_office_backend, OfficeBackend};
use crate::pipeline::validate::discard_admitted;
use crate::pipeline::{adapter, guard_panics, pdf_ops};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rotation used when a `rotate-pdf` request carries no angle.
pub const DEFAULT_ROTATION: i32 = 90;

/// Maps operations to backends.
#[derive(Clone)]
pub struct Dispatcher {
    config: DocshiftConfig,
    office: Arc<dyn OfficeBackend>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("upload_root", &self.config.upload_root)
            .field("office", &self.office.name())
            .finish()
    }
}

impl Dispatcher {
    /// Build a dispatcher, choosing the office backend for this host.
    pub fn new(config: DocshiftConfig) -> Self {
        let office = select_office_backend(&config);
        Self { config, office }
    }

    /// Build a dispatcher with an explicit office backend.
    pub fn with_office_backend(config: DocshiftConfig, office: Arc<dyn OfficeBackend>) -> Self {
        Self { config, office }
    }

    pub fn config(&self) -> &DocshiftConfig {
        &self.config
    }

    /// Run `operation` (its wire identifier) on `inputs`.
    ///
    /// Unknown identifiers fail before any file is touched.
    pub fn dispatch(
        &self,
        operation: &str,
        inputs: &[ValidatedFile],
        params: &OperationParams,
    ) -> ConversionResult {
        match operation.parse::<Operation>() {
            Ok(op) => self.dispatch_operation(op, inputs, params),
            Err(e) => {
                warn!("Rejected request: {e}");
                ConversionResult::failure(None, e)
            }
        }
    }

    /// Run an already-parsed operation on `inputs`.
    pub fn dispatch_operation(
        &self,
        operation: Operation,
        inputs: &[ValidatedFile],
        params: &OperationParams,
    ) -> ConversionResult {
        let paths: Vec<PathBuf> = inputs.iter().map(|f| f.absolute_path.clone()).collect();
        debug!(%operation, inputs = paths.len(), %params, "Dispatching");

        let result = check_arity(operation, paths.len())
            .and_then(|()| guard_panics(|| self.run(operation, &paths, params)));

        if !self.config.retain_inputs {
            remove_inputs(&paths, result.as_ref().ok(), &self.config.upload_root);
        }

        match result {
            Ok(output) => {
                info!("{operation} produced {}", output.display());
                ConversionResult::success(operation, output)
            }
            Err(e) => {
                warn!("{operation} failed: {e}");
                ConversionResult::failure(Some(operation), e)
            }
        }
    }

    /// Async wrapper: runs [`dispatch`](Self::dispatch) on Tokio's blocking
    /// pool, since every backend does blocking file and codec work.
    pub async fn dispatch_async(
        self: Arc<Self>,
        operation: String,
        inputs: Vec<ValidatedFile>,
        params: OperationParams,
    ) -> ConversionResult {
        let parsed = operation.parse::<Operation>().ok();
        tokio::task::spawn_blocking(move || self.dispatch(&operation, &inputs, &params))
            .await
            .unwrap_or_else(|e| {
                ConversionResult::failure(parsed, DocError::backend(format!("dispatch task failed: {e}")))
            })
    }

    fn run(&self, operation: Operation, inputs: &[PathBuf], params: &OperationParams) -> Result<PathBuf, DocError> {
        let out_dir = output_dir(&self.config.upload_root, inputs);
        let out_dir = out_dir.as_path();
        match operation {
            Operation::PdfToWord
            | Operation::WordToPdf
            | Operation::ImageToPdf
            | Operation::CsvToPdf => adapter::convert(operation, single(inputs)?, out_dir, self.office.as_ref()),
            Operation::SplitPdf => pdf_ops::split(single(inputs)?, out_dir, params.start_page, params.end_page),
            Operation::MergePdf => pdf_ops::merge(inputs, out_dir),
            Operation::EncryptPdf => {
                let password = params.password.as_deref().unwrap_or_default();
                pdf_ops::encrypt(single(inputs)?, out_dir, password)
            }
            Operation::DecryptPdf => {
                let password = params.password.as_deref().unwrap_or_default();
                pdf_ops::decrypt(single(inputs)?, out_dir, password)
            }
            Operation::WatermarkPdf => {
                let text = params.watermark_text.as_deref().unwrap_or_default();
                let opacity = params.opacity.unwrap_or(self.config.default_opacity);
                pdf_ops::watermark(single(inputs)?, out_dir, text, opacity)
            }
            Operation::RotatePdf => {
                let angle = params.angle.unwrap_or(DEFAULT_ROTATION);
                pdf_ops::rotate(single(inputs)?, out_dir, angle)
            }
        }
    }
}

/// Merge needs two or more inputs; everything else exactly one.
fn check_arity(operation: Operation, count: usize) -> Result<(), DocError> {
    if operation.is_multi_input() {
        if count < 2 {
            return Err(DocError::InsufficientMergeInputs { count });
        }
    } else if count != 1 {
        return Err(DocError::InvalidParameter(format!(
            "{operation} takes exactly one file, got {count}"
        )));
    }
    Ok(())
}

fn single(inputs: &[PathBuf]) -> Result<&Path, DocError> {
    match inputs {
        [one] => Ok(one.as_path()),
        _ => Err(DocError::InvalidParameter(format!(
            "expected one input, got {}",
            inputs.len()
        ))),
    }
}

/// Outputs land next to the first input when it sits in its own admission
/// directory under `upload_root`, so concurrent requests never share names.
fn output_dir(upload_root: &Path, inputs: &[PathBuf]) -> PathBuf {
    let root = std::fs::canonicalize(upload_root).unwrap_or_else(|_| upload_root.to_path_buf());
    inputs
        .first()
        .and_then(|first| first.parent())
        .filter(|dir| dir.starts_with(&root))
        .map(Path::to_path_buf)
        .unwrap_or(root)
}

/// Delete consumed inputs, never the output itself.
fn remove_inputs(inputs: &[PathBuf], output: Option<&PathBuf>, upload_root: &Path) {
    for path in inputs.iter().filter(|path| Some(*path) != output) {
        discard_admitted(path, upload_root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{ConversionStatus, FileKind};
    use crate::pipeline::fixtures;
    use crate::pipeline::office::UnavailableOffice;
    use tempfile::TempDir;

    fn dispatcher(dir: &TempDir, retain: bool) -> Dispatcher {
        let config = DocshiftConfig::builder()
            .upload_root(dir.path())
            .retain_inputs(retain)
            .build()
            .unwrap();
        Dispatcher::with_office_backend(config, Arc::new(UnavailableOffice))
    }

    fn pdf(dir: &TempDir, name: &str, pages: usize) -> ValidatedFile {
        let path = dir.path().join(name);
        fixtures::write_numbered(&path, pages);
        ValidatedFile {
            sanitized_filename: name.to_string(),
            byte_size: std::fs::metadata(&path).unwrap().len(),
            absolute_path: path,
            detected_kind: FileKind::Pdf,
        }
    }

    #[test]
    fn unknown_operation_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let input = pdf(&dir, "a.pdf", 1);
        let result = dispatcher(&dir, false).dispatch("compress-pdf", &[input.clone()], &OperationParams::default());
        assert!(matches!(result.error, Some(DocError::UnsupportedOperation(_))));
        assert!(result.operation.is_none());
        assert!(input.absolute_path.exists());
    }

    #[test]
    fn merge_needs_two_inputs() {
        let dir = TempDir::new().unwrap();
        let input = pdf(&dir, "a.pdf", 2);
        let result = dispatcher(&dir, true).dispatch("merge-pdf", &[input], &OperationParams::default());
        assert!(matches!(
            result.error,
            Some(DocError::InsufficientMergeInputs { count: 1 })
        ));
    }

    #[test]
    fn single_input_operations_reject_lists() {
        let dir = TempDir::new().unwrap();
        let a = pdf(&dir, "a.pdf", 1);
        let b = pdf(&dir, "b.pdf", 1);
        let result = dispatcher(&dir, true).dispatch("rotate-pdf", &[a, b], &OperationParams::default());
        assert!(matches!(result.error, Some(DocError::InvalidParameter(_))));
    }

    #[test]
    fn rotate_consumes_input_and_delivers() {
        let dir = TempDir::new().unwrap();
        let input = pdf(&dir, "a.pdf", 2);
        let result = dispatcher(&dir, false).dispatch("rotate-pdf", &[input.clone()], &OperationParams::default());
        assert!(result.is_success(), "{:?}", result.error);
        let output = result.output_path.unwrap();
        assert!(output.exists());
        assert!(!input.absolute_path.exists());
    }

    #[test]
    fn output_lands_in_the_first_inputs_admission_dir() {
        let dir = TempDir::new().unwrap();
        let slot = dir.path().canonicalize().unwrap().join("req1");
        std::fs::create_dir(&slot).unwrap();
        let a = slot.join("a.pdf");
        fixtures::write_numbered(&a, 1);
        let input = ValidatedFile {
            sanitized_filename: "a.pdf".into(),
            byte_size: std::fs::metadata(&a).unwrap().len(),
            absolute_path: a,
            detected_kind: FileKind::Pdf,
        };
        let result = dispatcher(&dir, false).dispatch("rotate-pdf", &[input.clone()], &OperationParams::default());
        let output = result.output_path.unwrap();
        assert_eq!(output.parent().unwrap(), slot);
        assert!(!input.absolute_path.exists());
        assert!(slot.exists(), "the slot still holds the output");
    }

    #[test]
    fn retained_inputs_survive() {
        let dir = TempDir::new().unwrap();
        let input = pdf(&dir, "a.pdf", 1);
        let result = dispatcher(&dir, true).dispatch("rotate-pdf", &[input.clone()], &OperationParams::default());
        assert!(result.is_success());
        assert!(input.absolute_path.exists());
    }

    #[test]
    fn word_without_office_is_unsupported_on_platform() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("letter.docx");
        std::fs::write(&path, b"PK\x03\x04").unwrap();
        let input = ValidatedFile {
            sanitized_filename: "letter.docx".into(),
            absolute_path: path,
            byte_size: 4,
            detected_kind: FileKind::Word,
        };
        let result = dispatcher(&dir, true).dispatch("word-to-pdf", &[input], &OperationParams::default());
        assert_eq!(result.status, ConversionStatus::UnsupportedOnPlatform);
    }

    #[test]
    fn wrong_password_reports_exact_reason() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("plain.pdf");
        fixtures::write_numbered(&plain, 1);
        let locked = pdf_ops::encrypt(&plain, dir.path(), "secret123").unwrap();
        let input = ValidatedFile {
            sanitized_filename: "locked.pdf".into(),
            byte_size: std::fs::metadata(&locked).unwrap().len(),
            absolute_path: locked,
            detected_kind: FileKind::Pdf,
        };
        let params = OperationParams {
            password: Some("wrong".into()),
            ..Default::default()
        };
        let result = dispatcher(&dir, true).dispatch("decrypt-pdf", &[input], &params);
        assert_eq!(result.failure_reason().as_deref(), Some("Incorrect password"));
    }

    #[tokio::test]
    async fn async_dispatch_runs_on_blocking_pool() {
        let dir = TempDir::new().unwrap();
        let a = pdf(&dir, "a.pdf", 3);
        let b = pdf(&dir, "b.pdf", 2);
        let d = Arc::new(dispatcher(&dir, false));
        let result = d
            .dispatch_async("merge-pdf".into(), vec![a, b], OperationParams::default())
            .await;
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(fixtures::page_count(result.output_path.as_ref().unwrap()), 5);
    }
}
