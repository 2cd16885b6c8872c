//! Upload admission: turn an untrusted client filename and its bytes into a
//! [`ValidatedFile`] that provably lives inside the upload root.
//!
//! ## Why sanitise *and* resolve?
//!
//! [`sanitize`] already strips separators and dots, so most hostile names are
//! harmless after it runs. [`resolve`] is the second gate: it accepts only a
//! single normal path component and re-checks the canonical result against
//! the canonical root, which also catches a symlink planted inside the root.
//!
//! ## Why a directory per upload?
//!
//! Two uploads may carry the same name, in one merge request or in two
//! concurrent ones. Each upload is written to `<root>/<token>/<safe_name>`
//! with a fresh token, so no request ever reads or deletes another's bytes,
//! and a caller's own file is always copied, never admitted in place.
//!
//! ## Why sniff the magic bytes?
//!
//! An extension is a claim made by the client. Every PDF backend parses the
//! whole file, so a renamed executable or HTML page should be turned away
//! with a clear message before it reaches the parser.

use crate::config::DocshiftConfig;
use crate::error::DocError;
use crate::operation::Operation;
use crate::output::{FileKind, ValidatedFile};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.\-]").expect("static regex"));

const WINDOWS_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Where the bytes of an upload come from.
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// Body already held in memory.
    Bytes(Vec<u8>),
    /// A file on local disk (e.g. a CLI argument); it is copied, never moved.
    File(PathBuf),
}

// ── Individual checks ────────────────────────────────────────────────────

/// Reduce a client-supplied filename to a safe single path component.
///
/// ```rust
/// use docshift::pipeline::validate::sanitize;
///
/// assert_eq!(sanitize("../../etc/passwd").unwrap(), "etc_passwd");
/// assert_eq!(sanitize("My Report (final).pdf").unwrap(), "My_Report_final.pdf");
/// ```
pub fn sanitize(filename: &str) -> Result<String, DocError> {
    let folded: String = filename.nfkd().filter(char::is_ascii).collect();
    let spaced = folded.replace(['/', '\\'], " ");
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let stripped = UNSAFE_CHARS.replace_all(&joined, "");
    let mut name = stripped.trim_matches(|c| c == '.' || c == '_').to_string();

    if let Some(stem) = name.split('.').next() {
        if WINDOWS_DEVICE_NAMES.contains(&stem.to_ascii_uppercase().as_str()) {
            name.insert(0, '_');
        }
    }

    if name.is_empty() {
        return Err(DocError::InvalidFilename {
            name: filename.to_string(),
        });
    }
    Ok(name)
}

/// Join `safe_name` onto `upload_root`, refusing anything that could escape.
///
/// The root must exist. The returned path is absolute and canonical up to the
/// final component; when the target already exists it is canonicalised too,
/// so a symlink pointing out of the root is rejected.
pub fn resolve(safe_name: &str, upload_root: &Path) -> Result<PathBuf, DocError> {
    let traversal = || DocError::PathTraversal {
        name: safe_name.to_string(),
    };

    if safe_name.contains(':') || safe_name.contains('\\') {
        return Err(traversal());
    }
    let mut components = Path::new(safe_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return Err(traversal()),
    }

    let root = upload_root
        .canonicalize()
        .map_err(|e| DocError::io(upload_root, e))?;
    let candidate = root.join(safe_name);

    let resolved = if candidate.exists() {
        candidate.canonicalize().map_err(|e| DocError::io(&candidate, e))?
    } else {
        candidate
    };

    if resolved.parent() != Some(root.as_path()) || !resolved.starts_with(&root) {
        warn!(name = safe_name, "Rejected path outside upload root");
        return Err(traversal());
    }
    Ok(resolved)
}

/// Lower-cased text after the last `.`, if any.
pub fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// True when the filename's extension is in `allowed`.
pub fn check_extension(filename: &str, allowed: &BTreeSet<String>) -> bool {
    extension_of(filename).is_some_and(|ext| allowed.contains(&ext))
}

/// True when the file exists and is at most `max_bytes` long.
pub fn check_size(path: &Path, max_bytes: u64) -> bool {
    std::fs::metadata(path)
        .map(|m| m.len() <= max_bytes)
        .unwrap_or(false)
}

/// True when the file starts with the `%PDF` signature.
pub fn check_pdf_signature(path: &Path) -> bool {
    read_magic(path).is_some_and(|m| m.len() == 4 && m == b"%PDF")
}

fn read_magic(path: &Path) -> Option<Vec<u8>> {
    let file = std::fs::File::open(path).ok()?;
    let mut magic = Vec::with_capacity(4);
    file.take(4).read_to_end(&mut magic).ok()?;
    Some(magic)
}

// ── Admission ────────────────────────────────────────────────────────────

/// Admit one upload for `operation`.
///
/// Checks run in order extension → resolve + write → size → signature (PDFs
/// only). On any failure after the write, the file and its admission
/// directory are removed again.
pub fn admit(
    config: &DocshiftConfig,
    original_name: &str,
    source: UploadSource,
    operation: Operation,
) -> Result<ValidatedFile, DocError> {
    let safe_name = sanitize(original_name)?;

    let allowed = config.extensions.allowed(operation);
    if !check_extension(&safe_name, &allowed) {
        return Err(DocError::DisallowedExtension {
            filename: original_name.to_string(),
            operation: operation.to_string(),
            allowed: allowed.into_iter().collect::<Vec<_>>().join(", "),
        });
    }
    let ext = extension_of(&safe_name).unwrap_or_default();

    config.ensure_upload_root()?;
    let slot = admission_dir(&config.upload_root)?;
    let path = match resolve(&safe_name, &slot) {
        Ok(path) => path,
        Err(e) => {
            remove_empty_dir(&slot);
            return Err(e);
        }
    };
    let written = write_source(&path, source)
        .and_then(|()| verify_written(&path, &safe_name, &ext, config.max_upload_bytes));

    match written {
        Ok(byte_size) => {
            debug!(file = %safe_name, bytes = byte_size, %operation, "Admitted upload");
            Ok(ValidatedFile {
                sanitized_filename: safe_name,
                absolute_path: path,
                byte_size,
                detected_kind: FileKind::from_extension(&ext),
            })
        }
        Err(e) => {
            discard_admitted(&path, &config.upload_root);
            Err(e)
        }
    }
}

/// Remove an admitted file, then its admission directory once empty.
///
/// Files sitting directly in the upload root only lose the file.
pub fn discard_admitted(path: &Path, upload_root: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove upload: {e}"),
    }
    let root = std::fs::canonicalize(upload_root).unwrap_or_else(|_| upload_root.to_path_buf());
    if let Some(dir) = path.parent().filter(|dir| *dir != root && dir.starts_with(&root)) {
        remove_empty_dir(dir);
    }
}

/// Create a fresh, uniquely named directory under `upload_root`.
fn admission_dir(upload_root: &Path) -> Result<PathBuf, DocError> {
    let root = std::fs::canonicalize(upload_root).map_err(|e| DocError::io(upload_root, e))?;
    let dir = root.join(uuid::Uuid::new_v4().simple().to_string());
    std::fs::create_dir(&dir).map_err(|e| DocError::io(&dir, e))?;
    Ok(dir)
}

/// Remove `dir` if it is empty; a non-empty directory is left alone.
fn remove_empty_dir(dir: &Path) {
    if let Err(e) = std::fs::remove_dir(dir) {
        debug!("Kept {}: {e}", dir.display());
    }
}

fn write_source(path: &Path, source: UploadSource) -> Result<(), DocError> {
    match source {
        UploadSource::Bytes(bytes) => {
            std::fs::write(path, bytes).map_err(|e| DocError::io(path, e))
        }
        UploadSource::File(src) => std::fs::copy(&src, path)
            .map(|_| ())
            .map_err(|e| DocError::io(&src, e)),
    }
}

fn verify_written(path: &Path, safe_name: &str, ext: &str, max: u64) -> Result<u64, DocError> {
    let size = std::fs::metadata(path)
        .map_err(|e| DocError::io(path, e))?
        .len();
    if !check_size(path, max) {
        return Err(DocError::FileTooLarge {
            filename: safe_name.to_string(),
            size,
            max,
        });
    }
    if ext == "pdf" && !check_pdf_signature(path) {
        return Err(DocError::CorruptOrSpoofedPdf {
            filename: safe_name.to_string(),
            magic: read_magic(path).unwrap_or_default(),
        });
    }
    Ok(size)
}
