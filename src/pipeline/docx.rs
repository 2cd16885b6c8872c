//! Minimal WordprocessingML (DOCX) package writer.
//!
//! Writes the three parts Word needs to open a document: the content-types
//! manifest, the package relationships, and `word/document.xml`. Each line of
//! input text becomes one paragraph; a page break separates pages.

use crate::error::DocError;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#;

const DOCUMENT_TAIL: &str = r#"<w:sectPr><w:pgSz w:w="11906" w:h="16838"/></w:sectPr></w:body></w:document>"#;

const PAGE_BREAK: &str = r#"<w:p><w:r><w:br w:type="page"/></w:r></w:p>"#;

/// Build `word/document.xml` from per-page text.
pub fn document_xml<S: AsRef<str>>(pages: &[S]) -> String {
    let mut xml = String::from(DOCUMENT_HEAD);
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            xml.push_str(PAGE_BREAK);
        }
        for line in page.as_ref().lines() {
            if line.trim().is_empty() {
                xml.push_str("<w:p/>");
                continue;
            }
            xml.push_str(r#"<w:p><w:r><w:t xml:space="preserve">"#);
            xml.push_str(&escape_xml(line));
            xml.push_str("</w:t></w:r></w:p>");
        }
    }
    xml.push_str(DOCUMENT_TAIL);
    xml
}

/// Write a DOCX package with one section per entry of `pages`.
pub fn write_docx<S: AsRef<str>>(path: &Path, pages: &[S]) -> Result<(), DocError> {
    let file = File::create(path)
        .map_err(|e| DocError::backend(format!("cannot create '{}': {e}", path.display())))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let parts: [(&str, String); 3] = [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", PACKAGE_RELS.to_string()),
        ("word/document.xml", document_xml(pages)),
    ];
    for (name, body) in parts {
        zip.start_file(name, options)
            .map_err(|e| DocError::backend(format!("DOCX write failed: {e}")))?;
        zip.write_all(body.as_bytes())
            .map_err(|e| DocError::backend(format!("DOCX write failed: {e}")))?;
    }
    zip.finish()
        .map_err(|e| DocError::backend(format!("DOCX write failed: {e}")))?;
    Ok(())
}

/// Escape markup characters and drop code points XML 1.0 forbids.
fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' => out.push(' '),
            c if (c as u32) < 0x20 || c == '\u{FFFE}' || c == '\u{FFFF}' => {}
            c => out.push(c),
        }
    }
    out
}
