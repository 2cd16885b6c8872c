//! Word → PDF through an external office suite.
//!
//! ## Why a trait?
//!
//! Which converter exists depends on the host: Microsoft Word automation on
//! Windows, a headless LibreOffice elsewhere, or nothing at all. The choice is
//! made once at startup by [`select_office_backend`] and the dispatcher only
//! ever sees an `Arc<dyn OfficeBackend>`.
//!
//! A converter that is missing reports [`DocError::UnsupportedOnPlatform`];
//! a converter that runs and fails reports [`DocError::BackendFailure`].

use crate::config::DocshiftConfig;
use crate::error::DocError;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;
use tracing::{debug, info, warn};

const OPERATION: &str = "word-to-pdf";

/// Something that turns a Word document into a PDF.
pub trait OfficeBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Convert `input` and write `<stem>.pdf` into `out_dir`.
    fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, DocError>;
}

/// Pick the converter for this host.
///
/// An explicitly configured binary wins. Otherwise Windows uses Word
/// automation and other hosts search `PATH` for `soffice`/`libreoffice`.
pub fn select_office_backend(config: &DocshiftConfig) -> Arc<dyn OfficeBackend> {
    if let Some(binary) = &config.office_binary {
        info!("Using configured office binary: {}", binary.display());
        return Arc::new(SofficeBackend::new(binary.clone()));
    }
    if cfg!(windows) {
        debug!("Using Word automation for {OPERATION}");
        return Arc::new(WordComBackend);
    }
    match find_on_path(&["soffice", "libreoffice"]) {
        Some(binary) => {
            info!("Found office suite at {}", binary.display());
            Arc::new(SofficeBackend::new(binary))
        }
        None => {
            warn!("No office suite found on PATH; {OPERATION} is disabled");
            Arc::new(UnavailableOffice)
        }
    }
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

// ── LibreOffice ──────────────────────────────────────────────────────────

/// `soffice --headless --convert-to pdf`.
///
/// Each call gets its own throwaway user profile; LibreOffice refuses to run
/// two instances against one profile.
#[derive(Debug, Clone)]
pub struct SofficeBackend {
    binary: PathBuf,
}

impl SofficeBackend {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl OfficeBackend for SofficeBackend {
    fn name(&self) -> &'static str {
        "soffice"
    }

    fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, DocError> {
        let profile = tempfile::Builder::new()
            .prefix("docshift_office_")
            .tempdir()
            .map_err(|e| DocError::backend(format!("cannot create office profile: {e}")))?;
        let profile_url = format!("file://{}", profile.path().display());
        // soffice writes into an empty directory, so a leftover file of the
        // same name can never pass for its output
        let staging = tempfile::Builder::new()
            .prefix(".office_")
            .tempdir_in(out_dir)
            .map_err(|e| DocError::io(out_dir, e))?;

        let result = Command::new(&self.binary)
            .arg(format!("-env:UserInstallation={profile_url}"))
            .args(["--headless", "--norestore", "--convert-to", "pdf", "--outdir"])
            .arg(staging.path())
            .arg(input)
            .output();
        let output = spawned(result, &self.binary)?;
        check_exit(&output, self.name())?;

        let produced = expected_output(input, staging.path())?;
        let target = out_dir.join(format!("{}.pdf", stem(input)));
        std::fs::rename(&produced, &target).map_err(|e| DocError::io(&target, e))?;
        Ok(target)
    }
}

// ── Word automation ──────────────────────────────────────────────────────

/// Word's `SaveAs2` format code for PDF.
const WD_FORMAT_PDF: u32 = 17;

/// Microsoft Word driven over COM from PowerShell.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordComBackend;

impl WordComBackend {
    fn script() -> String {
        format!(
            "$ErrorActionPreference = 'Stop'; \
             $word = New-Object -ComObject Word.Application; \
             $word.Visible = $false; \
             try {{ \
               $doc = $word.Documents.Open($env:DOCSHIFT_IN, $false, $true); \
               $doc.SaveAs2($env:DOCSHIFT_OUT, {WD_FORMAT_PDF}); \
               $doc.Close($false) \
             }} finally {{ $word.Quit() }}"
        )
    }
}

impl OfficeBackend for WordComBackend {
    fn name(&self) -> &'static str {
        "word-com"
    }

    fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, DocError> {
        let target = out_dir.join(format!("{}.pdf", stem(input)));
        match std::fs::remove_file(&target) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(DocError::io(&target, e));
            }
            _ => {}
        }
        // paths travel through the environment so no quoting is needed
        let result = Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command", &Self::script()])
            .env("DOCSHIFT_IN", input)
            .env("DOCSHIFT_OUT", &target)
            .output();
        let output = spawned(result, Path::new("powershell"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("80040154") || stderr.contains("Class not registered") {
                return Err(DocError::UnsupportedOnPlatform {
                    operation: OPERATION.into(),
                    detail: "Microsoft Word is not installed".into(),
                });
            }
            check_exit(&output, self.name())?;
        }
        expected_output(input, out_dir)
    }
}

// ── Unavailable ──────────────────────────────────────────────────────────

/// Used when no converter exists on this host.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableOffice;

impl OfficeBackend for UnavailableOffice {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn convert_to_pdf(&self, _input: &Path, _out_dir: &Path) -> Result<PathBuf, DocError> {
        Err(DocError::UnsupportedOnPlatform {
            operation: OPERATION.into(),
            detail: "no office suite is installed on this server".into(),
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn spawned(result: std::io::Result<Output>, binary: &Path) -> Result<Output, DocError> {
    result.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => DocError::UnsupportedOnPlatform {
            operation: OPERATION.into(),
            detail: format!("'{}' was not found", binary.display()),
        },
        _ => DocError::backend(format!("cannot start '{}': {e}", binary.display())),
    })
}

fn check_exit(output: &Output, backend: &str) -> Result<(), DocError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(DocError::backend(format!(
        "{backend} exited with {}: {}",
        output.status,
        stderr.trim()
    )))
}

fn expected_output(input: &Path, out_dir: &Path) -> Result<PathBuf, DocError> {
    let pdf = out_dir.join(format!("{}.pdf", stem(input)));
    if pdf.is_file() {
        debug!("Office conversion wrote {}", pdf.display());
        Ok(pdf)
    } else {
        Err(DocError::backend(format!(
            "converter produced no output at '{}'",
            pdf.display()
        )))
    }
}

fn stem(path: &Path) -> String {
    crate::pipeline::pdf_ops::file_stem(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unavailable_is_platform_error() {
        let err = UnavailableOffice
            .convert_to_pdf(Path::new("a.docx"), Path::new("."))
            .unwrap_err();
        assert!(matches!(err, DocError::UnsupportedOnPlatform { .. }));
    }

    #[test]
    fn missing_binary_is_platform_error() {
        let dir = TempDir::new().unwrap();
        let backend = SofficeBackend::new(dir.path().join("no-such-soffice"));
        let input = dir.path().join("letter.docx");
        std::fs::write(&input, b"PK").unwrap();
        let err = backend.convert_to_pdf(&input, dir.path()).unwrap_err();
        assert!(
            matches!(err, DocError::UnsupportedOnPlatform { .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn configured_binary_is_preferred() {
        let config = DocshiftConfig::builder()
            .office_binary("/opt/office/soffice")
            .build()
            .unwrap();
        assert_eq!(select_office_backend(&config).name(), "soffice");
    }

    #[cfg(unix)]
    fn fake_soffice(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let script = dir.join("soffice");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[test]
    fn silent_success_never_returns_a_stale_pdf() {
        let dir = TempDir::new().unwrap();
        let backend = SofficeBackend::new(fake_soffice(dir.path(), "exit 0"));
        let input = dir.path().join("letter.docx");
        std::fs::write(&input, b"PK").unwrap();
        std::fs::write(dir.path().join("letter.pdf"), b"%PDF-stale").unwrap();

        let err = backend.convert_to_pdf(&input, dir.path()).unwrap_err();
        assert!(matches!(err, DocError::BackendFailure { .. }), "got {err:?}");
    }

    #[cfg(unix)]
    #[test]
    fn converted_pdf_replaces_a_stale_one() {
        let dir = TempDir::new().unwrap();
        // the last two arguments are the staging dir and the input
        let body = r#"for a; do out="$in"; in="$a"; done; printf '%%PDF-new' > "$out/letter.pdf""#;
        let backend = SofficeBackend::new(fake_soffice(dir.path(), body));
        let input = dir.path().join("letter.docx");
        std::fs::write(&input, b"PK").unwrap();
        std::fs::write(dir.path().join("letter.pdf"), b"%PDF-stale").unwrap();

        let output = backend.convert_to_pdf(&input, dir.path()).unwrap();
        assert_eq!(output, dir.path().join("letter.pdf"));
        assert_eq!(std::fs::read(&output).unwrap(), b"%PDF-new");
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".office_"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn missing_output_is_backend_failure() {
        let dir = TempDir::new().unwrap();
        let err = expected_output(Path::new("/in/letter.docx"), dir.path()).unwrap_err();
        assert!(matches!(err, DocError::BackendFailure { .. }));
        std::fs::write(dir.path().join("letter.pdf"), b"%PDF").unwrap();
        assert!(expected_output(Path::new("/in/letter.docx"), dir.path()).is_ok());
    }

    #[test]
    fn word_script_uses_pdf_format() {
        let script = WordComBackend::script();
        assert!(script.contains("SaveAs2($env:DOCSHIFT_OUT, 17)"));
    }
}
