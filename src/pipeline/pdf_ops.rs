//! Page-level PDF operations: split, merge, encrypt, decrypt, watermark,
//! rotate.
//!
//! Every function takes local paths plus primitives and writes its output
//! into `out_dir`. Split, merge, encrypt and decrypt build a fresh document
//! with [`PageAssembler`]; watermark and rotate edit the parsed document in
//! place and write it back out.
//!
//! Output names:
//!
//! | Operation | Output |
//! |-----------|--------|
//! | split     | `<stem>_pages_<s>-<e>.zip` holding `<stem>_page_<n>.pdf` |
//! | merge     | `merged_pdf_<token>.pdf` |
//! | encrypt   | `encrypted_<stem>_<token>.pdf` |
//! | decrypt   | `decrypted_<stem>_<token>.pdf` |
//! | watermark | `watermarked_<stem>_<token>.pdf` |
//! | rotate    | `rotated_<stem>_<token>.pdf` |
//!
//! `<token>` is a fresh UUID v4 per call, so concurrent requests for the same
//! input never overwrite each other.

use crate::error::DocError;
use crate::operation::PageRange;
use crate::pipeline::assemble::{effective_rotation, flatten_page, PageAssembler};
use crate::pipeline::layout::{encode_win_ansi, helvetica_bold_width, real, show_text, standard_font};
use crate::pipeline::security;
use lopdf::content::{Content, Operation as PdfOp};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Watermark font size in points.
const WATERMARK_FONT_SIZE: f32 = 40.0;
/// Centre point of the watermark text.
const WATERMARK_CENTER: (f32, f32) = (300.0, 400.0);

// ── Split ────────────────────────────────────────────────────────────────

/// Write each page of `[start, end]` as its own PDF and bundle them in a ZIP.
///
/// Missing bounds default to the first and last page.
pub fn split(input: &Path, out_dir: &Path, start: Option<u32>, end: Option<u32>) -> Result<PathBuf, DocError> {
    logged("split-pdf", input, || {
        let source = security::load(input)?.into_plain()?;
        let total = source.get_pages().len() as u32;
        let range = PageRange::resolve(start, end, total)?;
        let stem = file_stem(input);
        let archive = out_dir.join(format!("{stem}_pages_{}-{}.zip", range.start(), range.end()));
        info!(pages = range.len(), total, "Splitting {}", input.display());

        write_split_archive(&source, &stem, range, out_dir, &archive).inspect_err(|_| {
            remove_quietly(&archive);
        })?;
        Ok(archive)
    })
}

fn write_split_archive(
    source: &Document,
    stem: &str,
    range: PageRange,
    out_dir: &Path,
    archive: &Path,
) -> Result<(), DocError> {
    let file = File::create(archive)
        .map_err(|e| DocError::backend(format!("cannot create '{}': {e}", archive.display())))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for number in range.pages() {
        let name = format!("{stem}_page_{number}.pdf");
        let page_path = out_dir.join(&name);

        let mut asm = PageAssembler::new();
        asm.copy_page(source, number)?;
        let mut single = asm.finish()?;
        save(&mut single, &page_path)?;

        let bytes = std::fs::read(&page_path)
            .map_err(|e| DocError::backend(format!("cannot read '{}': {e}", page_path.display())));
        remove_quietly(&page_path);
        let bytes = bytes?;

        zip.start_file(name.as_str(), options)
            .map_err(|e| DocError::backend(format!("ZIP write failed: {e}")))?;
        zip.write_all(&bytes)
            .map_err(|e| DocError::backend(format!("ZIP write failed: {e}")))?;
        debug!("Added {name} to archive");
    }
    zip.finish()
        .map_err(|e| DocError::backend(format!("ZIP write failed: {e}")))?;
    Ok(())
}

// ── Merge ────────────────────────────────────────────────────────────────

/// Concatenate every page of `inputs`, in order.
///
/// Paths that no longer exist are skipped with a warning. Callers enforce the
/// two-input minimum; here only an empty result is an error.
pub fn merge(inputs: &[PathBuf], out_dir: &Path) -> Result<PathBuf, DocError> {
    let mut asm = PageAssembler::new();
    for input in inputs {
        if !input.exists() {
            warn!("Skipping missing file: {}", input.display());
            continue;
        }
        let doc = security::load(input)
            .and_then(security::LoadedPdf::into_plain)
            .inspect_err(|e| warn!("merge-pdf: cannot read {}: {e}", input.display()))?;
        let added = asm.append_document(doc)?;
        debug!("Added {added} pages from {}", input.display());
    }
    if asm.page_count() == 0 {
        warn!("merge-pdf: no pages collected from {} inputs", inputs.len());
        return Err(DocError::EmptyDocument);
    }

    let mut doc = asm.finish()?;
    let output = out_dir.join(format!("merged_pdf_{}.pdf", unique_token()));
    save(&mut doc, &output)?;
    info!("Merged {} inputs into {}", inputs.len(), output.display());
    Ok(output)
}

// ── Encrypt / decrypt ────────────────────────────────────────────────────

/// Copy every page into a fresh document and protect it with `password`.
pub fn encrypt(input: &Path, out_dir: &Path, password: &str) -> Result<PathBuf, DocError> {
    if password.is_empty() {
        return Err(DocError::InvalidParameter(
            "a password is required to encrypt".into(),
        ));
    }
    logged("encrypt-pdf", input, || {
        let loaded = security::load(input)?;
        if loaded.is_encrypted() {
            return Err(DocError::backend("PDF is already encrypted"));
        }
        let mut asm = PageAssembler::new();
        asm.append_document(loaded.into_plain()?)?;
        let mut doc = asm.finish()?;
        doc.compress();
        security::encrypt_document(&mut doc, password)?;

        let output = output_path(out_dir, "encrypted", input);
        save(&mut doc, &output)?;
        Ok(output)
    })
}

/// Remove password protection. An unencrypted input is simply rebuilt.
pub fn decrypt(input: &Path, out_dir: &Path, password: &str) -> Result<PathBuf, DocError> {
    logged("decrypt-pdf", input, || {
        let loaded = security::load(input)?;
        let was_encrypted = loaded.is_encrypted();
        let doc = loaded.unlock(password).inspect_err(|e| {
            if matches!(e, DocError::IncorrectPassword) {
                warn!("Decryption failed - incorrect password: {}", input.display());
            }
        })?;
        debug!(was_encrypted, "Rebuilding {}", input.display());

        let mut asm = PageAssembler::new();
        asm.append_document(doc)?;
        let mut doc = asm.finish()?;

        let output = output_path(out_dir, "decrypted", input);
        save(&mut doc, &output)?;
        Ok(output)
    })
}

// ── Watermark ────────────────────────────────────────────────────────────

/// Draw `text` centred at (300, 400) in Helvetica-Bold 40 pt over every page.
///
/// The original page content is wrapped in `q … Q` so its graphics state
/// cannot leak into the overlay.
pub fn watermark(input: &Path, out_dir: &Path, text: &str, opacity: f32) -> Result<PathBuf, DocError> {
    if text.trim().is_empty() {
        return Err(DocError::InvalidParameter(
            "watermark text must not be empty".into(),
        ));
    }
    if !(0.0..=1.0).contains(&opacity) {
        return Err(DocError::InvalidParameter(format!(
            "opacity must be between 0.0 and 1.0, got {opacity}"
        )));
    }
    logged("watermark-pdf", input, || {
        let mut doc = security::load(input)?.into_plain()?;
        let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        if page_ids.is_empty() {
            return Err(DocError::EmptyDocument);
        }

        let text_bytes = encode_win_ansi(text);
        let x = WATERMARK_CENTER.0 - helvetica_bold_width(&text_bytes, WATERMARK_FONT_SIZE) / 2.0;
        let font_id = doc.add_object(standard_font("Helvetica-Bold"));
        let mut state = Dictionary::new();
        state.set("Type", Object::Name(b"ExtGState".to_vec()));
        state.set("ca", real(opacity));
        state.set("CA", real(opacity));
        let state_id = doc.add_object(state);
        let save_state_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));

        for page_id in &page_ids {
            let page = flatten_page(&doc, *page_id)?;
            let mut resources = page
                .get(b"Resources")
                .ok()
                .and_then(|r| resolve_dict(&doc, r))
                .unwrap_or_else(Dictionary::new);
            let font_name = register_resource(&doc, &mut resources, b"Font", "WmF", font_id);
            let state_name = register_resource(&doc, &mut resources, b"ExtGState", "WmGS", state_id);

            let mut ops = vec![
                PdfOp::new("Q", vec![]),
                PdfOp::new("q", vec![]),
                PdfOp::new("gs", vec![Object::Name(state_name.into_bytes())]),
            ];
            ops.extend(show_text(
                &font_name,
                WATERMARK_FONT_SIZE,
                x,
                WATERMARK_CENTER.1,
                text_bytes.clone(),
            ));
            ops.push(PdfOp::new("Q", vec![]));
            let overlay = Content { operations: ops }.encode()?;
            let overlay_id = doc.add_object(Stream::new(Dictionary::new(), overlay));

            let mut contents = vec![Object::Reference(save_state_id)];
            contents.extend(existing_contents(&doc, &page));
            contents.push(Object::Reference(overlay_id));

            let target = doc.get_object_mut(*page_id)?.as_dict_mut()?;
            target.set("Resources", Object::Dictionary(resources));
            target.set("Contents", Object::Array(contents));
        }
        info!(pages = page_ids.len(), opacity, "Watermarked {}", input.display());

        let output = output_path(out_dir, "watermarked", input);
        save(&mut doc, &output)?;
        Ok(output)
    })
}

/// Add `id` under a fresh name in the `category` sub-dictionary of
/// `resources`. Returns the name used.
fn register_resource(
    doc: &Document,
    resources: &mut Dictionary,
    category: &[u8],
    prefix: &str,
    id: ObjectId,
) -> String {
    let mut entries = resources
        .get(category)
        .ok()
        .and_then(|o| resolve_dict(doc, o))
        .unwrap_or_else(Dictionary::new);
    let name = (0..)
        .map(|n| format!("{prefix}{n}"))
        .find(|candidate| !entries.has(candidate.as_bytes()))
        .unwrap_or_else(|| prefix.to_string());
    entries.set(name.clone(), Object::Reference(id));
    resources.set(category.to_vec(), Object::Dictionary(entries));
    name
}

/// The page's content streams as a flat list of references.
fn existing_contents(doc: &Document, page: &Dictionary) -> Vec<Object> {
    match page.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn resolve_dict(doc: &Document, object: &Object) -> Option<Dictionary> {
    match object {
        Object::Dictionary(dict) => Some(dict.clone()),
        Object::Reference(id) => doc.get_dictionary(*id).ok().cloned(),
        _ => None,
    }
}

// ── Rotate ───────────────────────────────────────────────────────────────

/// Add `angle` degrees (a multiple of 90) to every page's rotation.
pub fn rotate(input: &Path, out_dir: &Path, angle: i32) -> Result<PathBuf, DocError> {
    if angle % 90 != 0 {
        return Err(DocError::InvalidParameter(format!(
            "rotation must be a multiple of 90 degrees, got {angle}"
        )));
    }
    logged("rotate-pdf", input, || {
        let mut doc = security::load(input)?.into_plain()?;
        let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        if page_ids.is_empty() {
            return Err(DocError::EmptyDocument);
        }
        for page_id in &page_ids {
            let current = effective_rotation(&doc, *page_id)?;
            let rotated = (current + i64::from(angle)).rem_euclid(360);
            doc.get_object_mut(*page_id)?
                .as_dict_mut()?
                .set("Rotate", Object::Integer(rotated));
        }
        info!(pages = page_ids.len(), angle, "Rotated {}", input.display());

        let output = output_path(out_dir, "rotated", input);
        save(&mut doc, &output)?;
        Ok(output)
    })
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Run `f`, logging any failure against the operation and input.
fn logged<T>(operation: &str, input: &Path, f: impl FnOnce() -> Result<T, DocError>) -> Result<T, DocError> {
    f().inspect_err(|e| warn!("{operation} failed for {}: {e}", input.display()))
}

pub(crate) fn save(doc: &mut Document, path: &Path) -> Result<(), DocError> {
    doc.save(path)
        .map(|_| ())
        .map_err(|e| DocError::backend(format!("cannot write '{}': {e}", path.display())))
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

fn output_path(out_dir: &Path, verb: &str, input: &Path) -> PathBuf {
    out_dir.join(format!("{verb}_{}_{}.pdf", file_stem(input), unique_token()))
}

fn unique_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fixtures;
    use std::io::Read;
    use tempfile::TempDir;

    fn numbered(dir: &TempDir, name: &str, pages: usize) -> PathBuf {
        let path = dir.path().join(name);
        fixtures::write_numbered(&path, pages);
        path
    }

    #[test]
    fn split_writes_one_pdf_per_page() {
        let dir = TempDir::new().unwrap();
        let input = numbered(&dir, "report.pdf", 5);
        let archive = split(&input, dir.path(), Some(2), Some(4)).unwrap();
        assert_eq!(archive.file_name().unwrap(), "report_pages_2-4.zip");

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(
            names,
            ["report_page_2.pdf", "report_page_3.pdf", "report_page_4.pdf"]
        );

        let mut bytes = Vec::new();
        zip.by_name("report_page_3.pdf")
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        let page = Document::load_mem(&bytes).unwrap();
        assert_eq!(page.get_pages().len(), 1);
        assert_eq!(page.extract_text(&[1]).unwrap().trim(), "Page 3");

        // intermediates are gone
        assert!(!dir.path().join("report_page_2.pdf").exists());
    }

    #[test]
    fn split_defaults_to_all_pages() {
        let dir = TempDir::new().unwrap();
        let input = numbered(&dir, "a.pdf", 3);
        let archive = split(&input, dir.path(), None, None).unwrap();
        assert_eq!(archive.file_name().unwrap(), "a_pages_1-3.zip");
        let zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 3);
    }

    #[test]
    fn split_rejects_bad_ranges() {
        let dir = TempDir::new().unwrap();
        let input = numbered(&dir, "a.pdf", 3);
        for (s, e) in [(2, 1), (0, 3), (1, 4)] {
            assert!(
                matches!(
                    split(&input, dir.path(), Some(s), Some(e)),
                    Err(DocError::InvalidPageRange { .. })
                ),
                "range {s}-{e}"
            );
        }
    }

    #[test]
    fn merge_skips_missing_inputs() {
        let dir = TempDir::new().unwrap();
        let a = numbered(&dir, "a.pdf", 3);
        let b = numbered(&dir, "b.pdf", 2);
        let missing = dir.path().join("gone.pdf");
        let out = merge(&[a, missing, b], dir.path()).unwrap();
        let name = out.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("merged_pdf_") && name.ends_with(".pdf"), "{name}");
        assert_eq!(fixtures::page_count(&out), 5);
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        let dir = TempDir::new().unwrap();
        let out = merge(&[dir.path().join("x.pdf"), dir.path().join("y.pdf")], dir.path());
        assert!(matches!(out, Err(DocError::EmptyDocument)));
    }

    #[test]
    fn encrypt_then_decrypt_preserves_pages() {
        let dir = TempDir::new().unwrap();
        let input = numbered(&dir, "memo.pdf", 4);
        let locked = encrypt(&input, dir.path(), "pw").unwrap();
        let name = locked.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("encrypted_memo_"), "{name}");
        assert!(security::load(&locked).unwrap().is_encrypted());

        let unlocked = decrypt(&locked, dir.path(), "pw").unwrap();
        assert!(!security::load(&unlocked).unwrap().is_encrypted());
        assert_eq!(fixtures::page_count(&unlocked), 4);
    }

    #[test]
    fn decrypt_reads_pages_packed_in_encrypted_object_streams() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("packed.pdf");
        std::fs::write(&input, fixtures::object_stream_pdf(Some("secret123"), "Packed")).unwrap();

        let err = decrypt(&input, dir.path(), "wrong").unwrap_err();
        assert_eq!(err.to_string(), "Incorrect password");

        let unlocked = decrypt(&input, dir.path(), "secret123").unwrap();
        let doc = Document::load(&unlocked).unwrap();
        assert!(!doc.is_encrypted());
        assert_eq!(doc.get_pages().len(), 1);
        assert_eq!(fixtures::first_content_bytes(&doc), b"BT /F1 12 Tf 72 720 Td (Packed) Tj ET");
    }

    #[test]
    fn rotate_keeps_text_that_mentions_encrypt() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("notes.pdf");
        fixtures::text_pdf(&["see /Encrypt entry"]).save(&input).unwrap();

        let out = rotate(&input, dir.path(), 90).unwrap();
        let doc = Document::load(&out).unwrap();
        assert_eq!(doc.extract_text(&[1]).unwrap().trim(), "see /Encrypt entry");
    }

    #[test]
    fn decrypt_with_wrong_password() {
        let dir = TempDir::new().unwrap();
        let input = numbered(&dir, "memo.pdf", 1);
        let locked = encrypt(&input, dir.path(), "secret123").unwrap();
        let err = decrypt(&locked, dir.path(), "wrong").unwrap_err();
        assert_eq!(err.to_string(), "Incorrect password");
    }

    #[test]
    fn encrypt_refuses_encrypted_input_and_empty_password() {
        let dir = TempDir::new().unwrap();
        let input = numbered(&dir, "memo.pdf", 1);
        assert!(matches!(
            encrypt(&input, dir.path(), ""),
            Err(DocError::InvalidParameter(_))
        ));
        let locked = encrypt(&input, dir.path(), "pw").unwrap();
        assert!(matches!(
            encrypt(&locked, dir.path(), "pw"),
            Err(DocError::BackendFailure { .. })
        ));
    }

    #[test]
    fn decrypt_of_plain_pdf_rebuilds_it() {
        let dir = TempDir::new().unwrap();
        let input = numbered(&dir, "plain.pdf", 2);
        let out = decrypt(&input, dir.path(), "anything").unwrap();
        assert_eq!(fixtures::page_count(&out), 2);
    }

    #[test]
    fn rotate_adds_to_inherited_rotation() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("turned.pdf");
        let mut doc = fixtures::numbered_pdf(2);
        fixtures::set_inherited_rotate(&mut doc, 270);
        doc.save(&input).unwrap();

        let out = rotate(&input, dir.path(), 90).unwrap();
        let doc = Document::load(&out).unwrap();
        for page_id in doc.get_pages().values() {
            let page = doc.get_dictionary(*page_id).unwrap();
            assert_eq!(page.get(b"Rotate").unwrap().as_i64().unwrap(), 0);
        }

        let out = rotate(&input, dir.path(), -90).unwrap();
        let doc = Document::load(&out).unwrap();
        let page_id = doc.get_pages()[&1];
        let page = doc.get_dictionary(page_id).unwrap();
        assert_eq!(page.get(b"Rotate").unwrap().as_i64().unwrap(), 180);
    }

    #[test]
    fn rotate_rejects_odd_angles() {
        let dir = TempDir::new().unwrap();
        let input = numbered(&dir, "a.pdf", 1);
        assert!(matches!(
            rotate(&input, dir.path(), 45),
            Err(DocError::InvalidParameter(_))
        ));
    }

    #[test]
    fn watermark_overlays_every_page() {
        let dir = TempDir::new().unwrap();
        let input = numbered(&dir, "a.pdf", 3);
        let out = watermark(&input, dir.path(), "CONFIDENTIAL", 0.2).unwrap();
        let doc = Document::load(&out).unwrap();
        for page_id in doc.get_pages().values() {
            let page = doc.get_dictionary(*page_id).unwrap();
            let contents = page.get(b"Contents").unwrap().as_array().unwrap();
            assert_eq!(contents.len(), 3, "q, original, overlay");
            let overlay_id = contents[2].as_reference().unwrap();
            let overlay = doc.get_object(overlay_id).unwrap().as_stream().unwrap();
            let ops = Content::decode(&overlay.content).unwrap().operations;
            assert_eq!(ops[0].operator, "Q");
            assert!(ops.iter().any(|o| o.operator == "gs"));
            assert!(ops.iter().any(|o| o.operator == "Tj"));

            let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
            assert!(resources.get(b"ExtGState").is_ok());
            let fonts = resources.get(b"Font").unwrap().as_dict().unwrap();
            assert!(fonts.has(b"F1"), "existing fonts are kept");
            assert!(fonts.has(b"WmF0"));
        }
        assert!(doc.extract_text(&[2]).unwrap().contains("Page 2"));
    }

    #[test]
    fn watermark_validates_parameters() {
        let dir = TempDir::new().unwrap();
        let input = numbered(&dir, "a.pdf", 1);
        assert!(matches!(
            watermark(&input, dir.path(), "  ", 0.5),
            Err(DocError::InvalidParameter(_))
        ));
        assert!(matches!(
            watermark(&input, dir.path(), "x", 1.5),
            Err(DocError::InvalidParameter(_))
        ));
        assert!(matches!(
            watermark(&input, dir.path(), "x", f32::NAN),
            Err(DocError::InvalidParameter(_))
        ));
    }

    #[test]
    fn output_names_are_unique() {
        let a = output_path(Path::new("/up"), "rotated", Path::new("/up/doc.pdf"));
        let b = output_path(Path::new("/up"), "rotated", Path::new("/up/doc.pdf"));
        assert_ne!(a, b);
        assert!(a.to_string_lossy().starts_with("/up/rotated_doc_"));
    }
}
