//! One upload request from receipt to delivered output.
//!
//! [`UploadPipeline::handle`] walks the request through its lifecycle:
//!
//! ```text
//! received ──▶ validating ──▶ processing ──▶ delivered ──▶ history entry
//!     │             │               │
//!     └─────────────┴──▶ rejected   └──▶ failed
//! ```
//!
//! Validation failures reject the request before any backend runs. For
//! `merge-pdf` an invalid upload is skipped instead, as long as two valid
//! ones remain.

use crate::dispatch::Dispatcher;
use crate::error::DocError;
use crate::history::{record_best_effort, HistoryEntry, HistoryRecorder};
use crate::operation::{Operation, OperationParams};
use crate::output::{ConversionResult, RequestState, ValidatedFile};
use crate::pipeline::validate::{admit, discard_admitted, UploadSource};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// History filename recorded for merges, which have no single source.
pub const MERGE_HISTORY_NAME: &str = "MERGE";

/// One file as the client sent it.
#[derive(Debug, Clone)]
pub struct Upload {
    pub original_filename: String,
    pub source: UploadSource,
}

impl Upload {
    pub fn bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            original_filename: name.into(),
            source: UploadSource::Bytes(bytes),
        }
    }

    /// Upload a local file under its own name.
    pub fn file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            original_filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            source: UploadSource::File(path.to_path_buf()),
        }
    }
}

/// Everything the caller hands over for one request.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub operation: String,
    pub uploads: Vec<Upload>,
    pub params: OperationParams,
    /// Owner of the history entry; `None` for anonymous requests.
    pub user_id: Option<i64>,
}

/// Final state of a request plus the dispatch result.
#[derive(Debug)]
pub struct RequestOutcome {
    pub state: RequestState,
    pub result: ConversionResult,
}

impl RequestOutcome {
    pub fn is_delivered(&self) -> bool {
        self.state == RequestState::Delivered
    }
}

/// Validator, dispatcher and history recorder wired together.
#[derive(Clone)]
pub struct UploadPipeline {
    dispatcher: Arc<Dispatcher>,
    history: Option<Arc<dyn HistoryRecorder>>,
}

impl UploadPipeline {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            history: None,
        }
    }

    /// Log delivered conversions to `history`.
    pub fn with_history(mut self, history: Arc<dyn HistoryRecorder>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run `request` to a terminal state.
    pub fn handle(&self, request: UploadRequest) -> RequestOutcome {
        let mut state = RequestState::Received;

        let operation = match request.operation.parse::<Operation>() {
            Ok(op) => op,
            Err(e) => return reject(state, None, e),
        };
        if let Err(e) = check_upload_count(operation, request.uploads.len()) {
            return reject(state, Some(operation), e);
        }

        advance(&mut state, RequestState::Validating);
        let files = match self.admit_all(operation, request.uploads) {
            Ok(files) => files,
            Err(e) => return reject(state, Some(operation), e),
        };
        let source_name = history_name(operation, &files);

        advance(&mut state, RequestState::Processing);
        let result = self
            .dispatcher
            .dispatch_operation(operation, &files, &request.params);

        if !result.is_success() {
            advance(&mut state, RequestState::Failed);
            return RequestOutcome { state, result };
        }
        advance(&mut state, RequestState::Delivered);

        if let (Some(history), Some(output)) = (&self.history, result.report().output_filename) {
            let entry = HistoryEntry::new(source_name, operation, output, request.user_id);
            record_best_effort(history.as_ref(), &entry);
        }
        RequestOutcome { state, result }
    }

    /// Async wrapper running [`handle`](Self::handle) on the blocking pool.
    pub async fn handle_async(self: Arc<Self>, request: UploadRequest) -> RequestOutcome {
        let operation = request.operation.parse::<Operation>().ok();
        tokio::task::spawn_blocking(move || self.handle(request))
            .await
            .unwrap_or_else(|e| RequestOutcome {
                state: RequestState::Failed,
                result: ConversionResult::failure(
                    operation,
                    DocError::backend(format!("request task failed: {e}")),
                ),
            })
    }

    fn admit_all(&self, operation: Operation, uploads: Vec<Upload>) -> Result<Vec<ValidatedFile>, DocError> {
        let config = self.dispatcher.config();
        let mut admitted = Vec::with_capacity(uploads.len());
        for upload in uploads {
            match admit(config, &upload.original_filename, upload.source, operation) {
                Ok(file) => admitted.push(file),
                Err(e) if operation.is_multi_input() => {
                    warn!("Skipping invalid file: {} ({e})", upload.original_filename);
                }
                Err(e) => {
                    discard(&admitted, &config.upload_root);
                    return Err(e);
                }
            }
        }
        if let Err(e) = check_upload_count(operation, admitted.len()) {
            discard(&admitted, &config.upload_root);
            return Err(e);
        }
        debug!(files = admitted.len(), %operation, "Uploads admitted");
        Ok(admitted)
    }
}

fn check_upload_count(operation: Operation, count: usize) -> Result<(), DocError> {
    match (operation.is_multi_input(), count) {
        (true, n) if n < 2 => Err(DocError::InsufficientMergeInputs { count: n }),
        (false, n) if n != 1 => Err(DocError::InvalidParameter(format!(
            "{operation} takes exactly one file, got {n}"
        ))),
        _ => Ok(()),
    }
}

fn history_name(operation: Operation, files: &[ValidatedFile]) -> String {
    match (operation, files) {
        (Operation::MergePdf, _) | (_, []) => MERGE_HISTORY_NAME.to_string(),
        (_, [first, ..]) => first.sanitized_filename.clone(),
    }
}

fn advance(state: &mut RequestState, next: RequestState) {
    debug_assert!(state.can_advance_to(next), "{state:?} -> {next:?}");
    debug!(from = ?*state, to = ?next, "Request state");
    *state = next;
}

fn reject(mut state: RequestState, operation: Option<Operation>, error: DocError) -> RequestOutcome {
    info!("Request rejected: {error}");
    advance(&mut state, RequestState::Rejected);
    RequestOutcome {
        state,
        result: ConversionResult::failure(operation, error),
    }
}

fn discard(files: &[ValidatedFile], upload_root: &Path) {
    for file in files {
        discard_admitted(file.path(), upload_root);
    }
}
