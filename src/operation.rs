//! Operation identifiers, their parameters, and page ranges.
//!
//! The set of operations is closed: every identifier the caller can send is a
//! variant of [`Operation`], and the dispatcher matches on it exhaustively.
//! Unknown strings are rejected while parsing, before any file is touched.

use crate::error::DocError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every operation the pipeline can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    PdfToWord,
    WordToPdf,
    ImageToPdf,
    CsvToPdf,
    SplitPdf,
    MergePdf,
    EncryptPdf,
    DecryptPdf,
    WatermarkPdf,
    RotatePdf,
}

impl Operation {
    /// All operations, in the order they are listed to users.
    pub const ALL: [Operation; 10] = [
        Operation::PdfToWord,
        Operation::WordToPdf,
        Operation::ImageToPdf,
        Operation::CsvToPdf,
        Operation::SplitPdf,
        Operation::MergePdf,
        Operation::EncryptPdf,
        Operation::DecryptPdf,
        Operation::WatermarkPdf,
        Operation::RotatePdf,
    ];

    /// The wire identifier, e.g. `"split-pdf"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::PdfToWord => "pdf-to-word",
            Operation::WordToPdf => "word-to-pdf",
            Operation::ImageToPdf => "image-to-pdf",
            Operation::CsvToPdf => "csv-to-pdf",
            Operation::SplitPdf => "split-pdf",
            Operation::MergePdf => "merge-pdf",
            Operation::EncryptPdf => "encrypt-pdf",
            Operation::DecryptPdf => "decrypt-pdf",
            Operation::WatermarkPdf => "watermark-pdf",
            Operation::RotatePdf => "rotate-pdf",
        }
    }

    /// Extensions accepted for this operation unless the configuration
    /// overrides them.
    pub fn default_extensions(self) -> &'static [&'static str] {
        match self {
            Operation::WordToPdf => &["docx", "doc"],
            Operation::ImageToPdf => &["jpg", "jpeg", "png"],
            Operation::CsvToPdf => &["csv"],
            Operation::PdfToWord
            | Operation::SplitPdf
            | Operation::MergePdf
            | Operation::EncryptPdf
            | Operation::DecryptPdf
            | Operation::WatermarkPdf
            | Operation::RotatePdf => &["pdf"],
        }
    }

    /// Whether the operation takes a list of inputs rather than one file.
    pub fn is_multi_input(self) -> bool {
        matches!(self, Operation::MergePdf)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == wanted)
            .ok_or_else(|| DocError::UnsupportedOperation(s.to_string()))
    }
}

/// Optional per-request parameters. Each operation reads only the fields it
/// needs and ignores the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationParams {
    /// First page for `split-pdf` (1-based). `None` means page 1.
    pub start_page: Option<u32>,
    /// Last page for `split-pdf` (1-based, inclusive). `None` means the last page.
    pub end_page: Option<u32>,
    /// Password for `encrypt-pdf` / `decrypt-pdf`.
    pub password: Option<String>,
    /// Overlay text for `watermark-pdf`.
    pub watermark_text: Option<String>,
    /// Overlay opacity for `watermark-pdf`, 0.0–1.0. `None` uses the configured default.
    pub opacity: Option<f32>,
    /// Rotation in degrees for `rotate-pdf`; must be a multiple of 90.
    pub angle: Option<i32>,
}

impl fmt::Display for OperationParams {
    /// Never prints the password.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pages={:?}-{:?} password={} text={:?} opacity={:?} angle={:?}",
            self.start_page,
            self.end_page,
            if self.password.is_some() { "<set>" } else { "<none>" },
            self.watermark_text,
            self.opacity,
            self.angle
        )
    }
}

/// A validated, 1-based inclusive page range.
///
/// Only constructible through [`PageRange::resolve`], so every value satisfies
/// `1 <= start <= end <= total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRange {
    start: u32,
    end: u32,
}

impl PageRange {
    /// Resolve optional bounds against a document of `total` pages.
    ///
    /// Missing bounds default to the first and last page.
    pub fn resolve(start: Option<u32>, end: Option<u32>, total: u32) -> Result<Self, DocError> {
        if total == 0 {
            return Err(DocError::EmptyDocument);
        }
        let start = start.unwrap_or(1);
        let end = end.unwrap_or(total);
        if start < 1 || start > end || end > total {
            return Err(DocError::InvalidPageRange { start, end, total });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of pages in the range.
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Page numbers in order.
    pub fn pages(&self) -> impl Iterator<Item = u32> {
        self.start..=self.end
    }
}
