//! Format conversions: PDF → Word, Word → PDF, image → PDF, CSV → PDF.
//!
//! Each conversion writes `<stem>.<ext>` next to its input's siblings in
//! `out_dir` and returns that path. Page operations live in
//! [`pdf_ops`](crate::pipeline::pdf_ops).

use crate::error::DocError;
use crate::operation::Operation;
use crate::pipeline::assemble::PageAssembler;
use crate::pipeline::docx;
use crate::pipeline::layout::{paginate_lines, show_text, standard_font, A4, BODY_FONT_SIZE, MARGIN};
use crate::pipeline::office::OfficeBackend;
use crate::pipeline::pdf_ops::{file_stem, save};
use crate::pipeline::security;
use image::{DynamicImage, RgbImage};
use lopdf::content::Content;
use lopdf::{Dictionary, Object, Stream};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Points per pixel when images are placed at 100 DPI.
const POINTS_PER_PIXEL: f32 = 72.0 / 100.0;

/// Run the format conversion `operation` on `input`.
///
/// Page operations (split, merge, …) are not conversions and yield
/// [`DocError::UnsupportedOperation`].
pub fn convert(
    operation: Operation,
    input: &Path,
    out_dir: &Path,
    office: &dyn OfficeBackend,
) -> Result<PathBuf, DocError> {
    info!("Starting conversion: {operation} for {}", input.display());
    let result = match operation {
        Operation::PdfToWord => pdf_to_word(input, out_dir),
        Operation::WordToPdf => office.convert_to_pdf(input, out_dir),
        Operation::ImageToPdf => image_to_pdf(input, out_dir),
        Operation::CsvToPdf => csv_to_pdf(input, out_dir),
        other => Err(DocError::UnsupportedOperation(other.to_string())),
    };
    match &result {
        Ok(path) => info!("{operation} conversion successful: {}", path.display()),
        Err(e) => warn!("Conversion error ({operation}): {e}"),
    }
    result
}

// ── PDF → Word ───────────────────────────────────────────────────────────

/// Rebuild the text layer of every page as DOCX paragraphs.
pub fn pdf_to_word(input: &Path, out_dir: &Path) -> Result<PathBuf, DocError> {
    let loaded = security::load(input)?;
    if loaded.is_encrypted() {
        return Err(DocError::backend(
            "PDF is password protected; decrypt it first",
        ));
    }
    let doc = loaded.into_plain()?;
    let numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    if numbers.is_empty() {
        return Err(DocError::EmptyDocument);
    }

    let pages: Vec<String> = numbers
        .iter()
        .map(|n| {
            doc.extract_text(&[*n]).unwrap_or_else(|e| {
                warn!("No text extracted from page {n}: {e}");
                String::new()
            })
        })
        .collect();
    debug!(pages = pages.len(), "Extracted text layer");

    let output = out_dir.join(format!("{}.docx", file_stem(input)));
    docx::write_docx(&output, &pages)?;
    Ok(output)
}

// ── Image → PDF ──────────────────────────────────────────────────────────

/// One page exactly the size of the image at 100 DPI.
pub fn image_to_pdf(input: &Path, out_dir: &Path) -> Result<PathBuf, DocError> {
    let decoded = image::open(input)
        .map_err(|e| DocError::backend(format!("cannot decode image: {e}")))?;
    let rgb = flatten_alpha(decoded);
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(DocError::backend("image has no pixels"));
    }

    let mut image_dict = Dictionary::new();
    image_dict.set("Type", Object::Name(b"XObject".to_vec()));
    image_dict.set("Subtype", Object::Name(b"Image".to_vec()));
    image_dict.set("Width", Object::Integer(i64::from(width)));
    image_dict.set("Height", Object::Integer(i64::from(height)));
    image_dict.set("ColorSpace", Object::Name(b"DeviceRGB".to_vec()));
    image_dict.set("BitsPerComponent", Object::Integer(8));

    let mut asm = PageAssembler::new();
    let image_id = asm.add_object(Stream::new(image_dict, rgb.into_raw()));

    let page_w = width as f32 * POINTS_PER_PIXEL;
    let page_h = height as f32 * POINTS_PER_PIXEL;
    let content = format!("q {page_w} 0 0 {page_h} 0 0 cm /Im0 Do Q").into_bytes();

    let mut xobjects = Dictionary::new();
    xobjects.set("Im0", Object::Reference(image_id));
    let mut resources = Dictionary::new();
    resources.set("XObject", Object::Dictionary(xobjects));
    asm.add_new_page([0.0, 0.0, page_w, page_h], resources, content);

    let mut doc = asm.finish()?;
    doc.compress();
    let output = out_dir.join(format!("{}.pdf", file_stem(input)));
    save(&mut doc, &output)?;
    debug!(width, height, "Embedded image");
    Ok(output)
}

/// Composite any alpha channel over white.
fn flatten_alpha(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let over_white = |c: u8| {
            let c = u16::from(c);
            let a = u16::from(a);
            ((c * a + 255 * (255 - a) + 127) / 255) as u8
        };
        image::Rgb([over_white(r), over_white(g), over_white(b)])
    })
}

// ── CSV → PDF ────────────────────────────────────────────────────────────

/// Render each CSV row as one ` | `-joined line of Helvetica on A4 pages.
pub fn csv_to_pdf(input: &Path, out_dir: &Path) -> Result<PathBuf, DocError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(input)
        .map_err(|e| DocError::backend(format!("cannot read CSV: {e}")))?;

    let mut lines = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| DocError::backend(format!("malformed CSV: {e}")))?;
        lines.push(record.iter().collect::<Vec<_>>().join(" | "));
    }
    let row_count = lines.len();

    let mut asm = PageAssembler::new();
    let font_id = asm.add_object(standard_font("Helvetica"));
    for page in paginate_lines(lines) {
        let mut ops = Vec::new();
        for line in page {
            ops.extend(show_text("F1", BODY_FONT_SIZE, MARGIN, line.y, line.text));
        }
        let content = Content { operations: ops }.encode()?;

        let mut fonts = Dictionary::new();
        fonts.set("F1", Object::Reference(font_id));
        let mut resources = Dictionary::new();
        resources.set("Font", Object::Dictionary(fonts));
        asm.add_new_page(A4, resources, content);
    }
    let pages = asm.page_count();

    let mut doc = asm.finish()?;
    doc.compress();
    let output = out_dir.join(format!("{}.pdf", file_stem(input)));
    save(&mut doc, &output)?;
    debug!(rows = row_count, pages, "Rendered CSV");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fixtures;
    use crate::pipeline::office::UnavailableOffice;
    use image::{Rgba, RgbaImage};
    use lopdf::Document;
    use std::io::Read;
    use tempfile::TempDir;

    fn image_stream(doc: &Document) -> &Stream {
        doc.objects
            .values()
            .filter_map(|o| o.as_stream().ok())
            .find(|s| s.dict.get(b"Subtype").and_then(Object::as_name).ok() == Some(b"Image".as_slice()))
            .expect("image XObject")
    }

    #[test]
    fn rgba_image_is_embedded_without_alpha() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("logo.png");
        RgbaImage::from_pixel(50, 20, Rgba([255, 0, 0, 0]))
            .save(&input)
            .unwrap();

        let out = image_to_pdf(&input, dir.path()).unwrap();
        assert_eq!(out.file_name().unwrap(), "logo.pdf");
        let doc = Document::load(&out).unwrap();
        assert_eq!(doc.get_pages().len(), 1);

        let image = image_stream(&doc);
        assert_eq!(image.dict.get(b"ColorSpace").unwrap().as_name().unwrap(), b"DeviceRGB");
        assert_eq!(image.dict.get(b"BitsPerComponent").unwrap().as_i64().unwrap(), 8);
        assert!(!image.dict.has(b"SMask"));

        // fully transparent red turns white
        let pixels = image.decompressed_content().unwrap();
        assert_eq!(pixels.len(), 50 * 20 * 3);
        assert_eq!(&pixels[..3], &[255, 255, 255]);

        let page_id = doc.get_pages()[&1];
        let media_box = doc.get_dictionary(page_id).unwrap().get(b"MediaBox").unwrap();
        let width = crate::pipeline::layout::number(&media_box.as_array().unwrap()[2]).unwrap();
        assert!((width - 36.0).abs() < 0.01, "got {width}");
    }

    #[test]
    fn alpha_compositing() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128])));
        let rgb = flatten_alpha(image);
        assert_eq!(rgb.get_pixel(0, 0).0, [127, 127, 127]);
    }

    #[test]
    fn undecodable_image_is_backend_failure() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("broken.png");
        std::fs::write(&input, b"not a png").unwrap();
        assert!(matches!(
            image_to_pdf(&input, dir.path()),
            Err(DocError::BackendFailure { .. })
        ));
    }

    #[test]
    fn csv_rows_paginate() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("table.csv");
        let mut body = String::from("name,qty\n");
        for i in 0..45 {
            body.push_str(&format!("item{i},{i}\n"));
        }
        std::fs::write(&input, body).unwrap();

        let out = csv_to_pdf(&input, dir.path()).unwrap();
        let doc = Document::load(&out).unwrap();
        assert_eq!(doc.get_pages().len(), 2, "46 rows at 39 per page");
        assert!(doc.extract_text(&[1]).unwrap().contains("name | qty"));
    }

    #[test]
    fn empty_csv_gives_blank_page() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("empty.csv");
        std::fs::write(&input, "").unwrap();
        let out = csv_to_pdf(&input, dir.path()).unwrap();
        assert_eq!(fixtures::page_count(&out), 1);
    }

    #[test]
    fn pdf_text_becomes_docx_paragraphs() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("notes.pdf");
        fixtures::text_pdf(&["first page", "second page"])
            .save(&input)
            .unwrap();

        let out = pdf_to_word(&input, dir.path()).unwrap();
        assert_eq!(out.file_name().unwrap(), "notes.docx");
        let mut zip = zip::ZipArchive::new(std::fs::File::open(&out).unwrap()).unwrap();
        let mut xml = String::new();
        zip.by_name("word/document.xml")
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        assert!(xml.contains("first page"));
        assert!(xml.contains("second page"));
        assert!(xml.contains(r#"w:type="page""#));
    }

    #[test]
    fn encrypted_pdf_is_refused_for_word() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("plain.pdf");
        fixtures::write_numbered(&input, 1);
        let locked = crate::pipeline::pdf_ops::encrypt(&input, dir.path(), "pw").unwrap();
        assert!(matches!(
            pdf_to_word(&locked, dir.path()),
            Err(DocError::BackendFailure { .. })
        ));
    }

    #[test]
    fn page_operations_are_not_conversions() {
        let err = convert(
            Operation::RotatePdf,
            Path::new("a.pdf"),
            Path::new("."),
            &UnavailableOffice,
        )
        .unwrap_err();
        assert!(matches!(err, DocError::UnsupportedOperation(_)));
    }

    #[test]
    fn word_without_office_is_platform_error() {
        let err = convert(
            Operation::WordToPdf,
            Path::new("a.docx"),
            Path::new("."),
            &UnavailableOffice,
        )
        .unwrap_err();
        assert!(matches!(err, DocError::UnsupportedOnPlatform { .. }));
    }
}
