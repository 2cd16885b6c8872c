//! Small lopdf documents for unit tests.

use crate::pipeline::security::{object_key, rc4_apply, StandardSecurity};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;

/// One page per entry of `pages`, each drawing its text in Helvetica.
///
/// `Resources` and `MediaBox` sit on the `Pages` node so page copies have
/// to resolve inheritance.
pub fn text_pdf(pages: &[&str]) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages.len() as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

/// `count` pages labelled "Page 1", "Page 2", …
pub fn numbered_pdf(count: usize) -> Document {
    let labels: Vec<String> = (1..=count).map(|n| format!("Page {n}")).collect();
    let refs: Vec<&str> = labels.iter().map(String::as_str).collect();
    text_pdf(&refs)
}

/// Save a fresh numbered document to `path`.
pub fn write_numbered(path: &Path, count: usize) {
    numbered_pdf(count).save(path).unwrap();
}

/// Set `/Rotate` on the `Pages` root so every page inherits it.
pub fn set_inherited_rotate(doc: &mut Document, angle: i64) {
    let pages_id = pages_root(doc);
    doc.get_object_mut(pages_id)
        .unwrap()
        .as_dict_mut()
        .unwrap()
        .set("Rotate", angle);
}

pub fn pages_root(doc: &Document) -> ObjectId {
    let root = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
    let catalog = doc.get_dictionary(root).unwrap();
    catalog.get(b"Pages").unwrap().as_reference().unwrap()
}

/// Raw bytes of the first content stream of page 1.
pub fn first_content_bytes(doc: &Document) -> Vec<u8> {
    let page_id = *doc.get_pages().get(&1).unwrap();
    let page = doc.get_dictionary(page_id).unwrap();
    let content_id = match page.get(b"Contents").unwrap() {
        Object::Reference(id) => *id,
        Object::Array(items) => items[0].as_reference().unwrap(),
        other => panic!("unexpected Contents {other:?}"),
    };
    doc.get_object(content_id)
        .unwrap()
        .as_stream()
        .unwrap()
        .content
        .clone()
}

/// Page count of the PDF at `path`.
pub fn page_count(path: &Path) -> usize {
    Document::load(path).unwrap().get_pages().len()
}

/// Decoded content of page `number` of the PDF at `path`.
pub fn page_text(path: &Path, number: u32) -> String {
    let doc = Document::load(path).unwrap();
    let page_id = *doc.get_pages().get(&number).unwrap();
    String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).into_owned()
}

/// A one-page PDF whose catalog, page tree and page sit in an object stream
/// indexed by a cross-reference stream, drawing `text`.
///
/// With a password the object stream and the content stream are encrypted
/// (revision 3, 128-bit RC4). lopdf cannot write object streams, so the
/// bytes are laid out by hand.
pub fn object_stream_pdf(password: Option<&str>, text: &str) -> Vec<u8> {
    let members = [
        (2, "<< /Type /Catalog /Pages 3 0 R >>"),
        (3, "<< /Type /Pages /Kids [4 0 R] /Count 1 >>"),
        (4, "<< /Type /Page /Parent 3 0 R /MediaBox [0 0 612 792] /Contents 5 0 R >>"),
    ];
    let mut index = String::new();
    let mut body = String::new();
    for (id, object) in members {
        index.push_str(&format!("{id} {} ", body.len()));
        body.push_str(object);
        body.push('\n');
    }
    let first = index.len();
    let mut packed = format!("{index}{body}").into_bytes();
    let mut content = format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET").into_bytes();

    let file_id = b"docshift-fixture".to_vec();
    let mut encrypt_dict = None;
    if let Some(password) = password {
        let handler = StandardSecurity::new(password, password, file_id.clone()).unwrap();
        let key = handler.file_key(password.as_bytes());
        rc4_apply(&object_key(&key, (1, 0)), &mut packed).unwrap();
        rc4_apply(&object_key(&key, (5, 0)), &mut content).unwrap();
        let dict = handler.to_dictionary();
        let hex = |name: &[u8]| -> String {
            dict.get(name).unwrap().as_str().unwrap().iter().map(|b| format!("{b:02X}")).collect()
        };
        encrypt_dict = Some(format!(
            "<< /Filter /Standard /V 2 /R 3 /Length 128 /P -4 /O <{}> /U <{}> >>",
            hex(b"O"),
            hex(b"U")
        ));
    }

    let mut out = b"%PDF-1.5\n".to_vec();
    let mut offsets = [0u32; 8];
    let mut stream_object = |out: &mut Vec<u8>, id: usize, dict: String, data: &[u8]| {
        offsets[id] = out.len() as u32;
        out.extend(format!("{id} 0 obj\n{dict}\nstream\n").as_bytes());
        out.extend(data);
        out.extend(b"\nendstream\nendobj\n");
    };
    stream_object(
        &mut out,
        1,
        format!("<< /Type /ObjStm /N 3 /First {first} /Length {} >>", packed.len()),
        &packed,
    );
    stream_object(&mut out, 5, format!("<< /Length {} >>", content.len()), &content);
    if let Some(dict) = &encrypt_dict {
        offsets[6] = out.len() as u32;
        out.extend(format!("6 0 obj\n{dict}\nendobj\n").as_bytes());
    }

    offsets[7] = out.len() as u32;
    let mut rows = Vec::new();
    let mut row = |kind: u8, field: u32, extra: u16| {
        rows.push(kind);
        rows.extend(field.to_be_bytes());
        rows.extend(extra.to_be_bytes());
    };
    row(0, 0, 65535);
    row(1, offsets[1], 0);
    for i in 0..3 {
        row(2, 1, i);
    }
    row(1, offsets[5], 0);
    if encrypt_dict.is_some() {
        row(1, offsets[6], 0);
    } else {
        row(0, 0, 0);
    }
    row(1, offsets[7], 0);

    let id_hex: String = file_id.iter().map(|b| format!("{b:02X}")).collect();
    let encrypt_ref = if encrypt_dict.is_some() { " /Encrypt 6 0 R" } else { "" };
    out.extend(
        format!(
            "7 0 obj\n<< /Type /XRef /Size 8 /W [1 4 2] /Root 2 0 R /ID [<{id_hex}> <{id_hex}>]{encrypt_ref} /Length {} >>\nstream\n",
            rows.len()
        )
        .as_bytes(),
    );
    out.extend(&rows);
    out.extend(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", offsets[7]).as_bytes());
    out
}
