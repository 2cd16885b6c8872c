//! Fixture builders shared by the integration tests.

#![allow(dead_code)]

use docshift::{Dispatcher, DocshiftConfig, OfficeBackend, UploadPipeline};
use docshift::pipeline::office::UnavailableOffice;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A PDF with `pages` pages, each showing "Page N".
pub fn pdf_bytes(pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids: Vec<Object> = Vec::new();
    for n in 1..=pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(format!("Page {n}"))]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// Write a PDF fixture to `dir/name`.
pub fn write_pdf(dir: &Path, name: &str, pages: usize) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, pdf_bytes(pages)).unwrap();
    path
}

pub fn page_count(path: &Path) -> usize {
    Document::load(path).unwrap().get_pages().len()
}

/// A config rooted at `root`, keeping inputs unless told otherwise.
pub fn config(root: &Path) -> DocshiftConfig {
    DocshiftConfig::builder().upload_root(root).build().unwrap()
}

/// Pipeline with no office suite, so results never depend on the host.
pub fn pipeline(root: &Path) -> UploadPipeline {
    UploadPipeline::new(Arc::new(dispatcher(root)))
}

pub fn dispatcher(root: &Path) -> Dispatcher {
    let office: Arc<dyn OfficeBackend> = Arc::new(UnavailableOffice);
    Dispatcher::with_office_backend(config(root), office)
}

/// A scratch directory holding `uploads/` as the upload root.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    /// Directory outside the upload root for client-side files.
    pub fn outside(&self) -> &Path {
        self.dir.path()
    }
}
