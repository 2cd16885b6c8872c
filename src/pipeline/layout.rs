//! Text placement for generated pages: WinAnsi encoding, standard-14 font
//! metrics, and the line layout used by `csv-to-pdf`.
//!
//! Only the standard Type 1 fonts are used, so no font program is embedded;
//! every string must be WinAnsi bytes and every width comes from the AFM
//! tables below.

use lopdf::content::Operation;
use lopdf::{Dictionary, Object, StringFormat};

/// A4 portrait in points.
pub const A4: [f32; 4] = [0.0, 0.0, 595.28, 841.89];

/// Margin used for both the first baseline and the page-break threshold.
pub const MARGIN: f32 = 40.0;
/// Baseline-to-baseline distance for CSV rows.
pub const LINE_STEP: f32 = 20.0;
/// Body font size for CSV rows.
pub const BODY_FONT_SIZE: f32 = 12.0;

/// Helvetica-Bold advance widths for 0x20..=0x7E, in 1/1000 em.
#[rustfmt::skip]
const HELVETICA_BOLD_ASCII: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, // ' ' – '/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611, // '0' – '?'
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778, // '@' – 'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556, // 'P' – '_'
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611, // '`' – 'o'
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,      // 'p' – '~'
];

/// Fallback width for bytes outside the ASCII table.
const HELVETICA_BOLD_DEFAULT: u16 = 556;

/// Encode `text` as WinAnsi (Windows-1252).
///
/// Control characters become spaces; characters WinAnsi cannot represent
/// become `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars().map(win_ansi_byte).collect()
}

fn win_ansi_byte(c: char) -> u8 {
    match c {
        c if c.is_control() => b' ',
        ' '..='~' => c as u8,
        '\u{A0}'..='\u{FF}' => c as u32 as u8,
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201C}' => 0x93,
        '\u{201D}' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => b'?',
    }
}

/// Width in points of WinAnsi `bytes` set in Helvetica-Bold at `size`.
pub fn helvetica_bold_width(bytes: &[u8], size: f32) -> f32 {
    let units: u32 = bytes
        .iter()
        .map(|&b| match b {
            0x20..=0x7E => u32::from(HELVETICA_BOLD_ASCII[(b - 0x20) as usize]),
            _ => u32::from(HELVETICA_BOLD_DEFAULT),
        })
        .sum();
    units as f32 * size / 1000.0
}

/// A `/Font` resource for one of the standard-14 fonts with WinAnsi encoding.
pub fn standard_font(base_font: &str) -> Dictionary {
    let mut font = Dictionary::new();
    font.set("Type", Object::Name(b"Font".to_vec()));
    font.set("Subtype", Object::Name(b"Type1".to_vec()));
    font.set("BaseFont", Object::Name(base_font.as_bytes().to_vec()));
    font.set("Encoding", Object::Name(b"WinAnsiEncoding".to_vec()));
    font
}

/// A number operand. `Object::Real`'s width differs across lopdf versions;
/// `into` covers both.
pub fn real(v: f32) -> Object {
    Object::Real(v.into())
}

/// Read a numeric operand as `f32`.
pub fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// `BT /font size Tf x y Td (text) Tj ET`
pub fn show_text(font: &str, size: f32, x: f32, y: f32, text: Vec<u8>) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(font.as_bytes().to_vec()), real(size)]),
        Operation::new("Td", vec![real(x), real(y)]),
        Operation::new("Tj", vec![Object::String(text, StringFormat::Literal)]),
        Operation::new("ET", vec![]),
    ]
}

// ── CSV layout ───────────────────────────────────────────────────────────

/// One line of text positioned on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub y: f32,
    pub text: Vec<u8>,
}

/// Lay `lines` out top-down on A4 pages.
///
/// Each line is drawn at the cursor, which then moves down one step; once it
/// falls below the bottom margin the next line starts a new page. No input
/// still yields one (blank) page.
pub fn paginate_lines<I>(lines: I) -> Vec<Vec<PlacedLine>>
where
    I: IntoIterator<Item = String>,
{
    let top = A4[3] - MARGIN;
    let mut pages = Vec::new();
    let mut current = Vec::new();
    let mut y = top;

    for line in lines {
        current.push(PlacedLine {
            y,
            text: encode_win_ansi(&line),
        });
        y -= LINE_STEP;
        if y < MARGIN {
            pages.push(std::mem::take(&mut current));
            y = top;
        }
    }
    if !current.is_empty() || pages.is_empty() {
        pages.push(current);
    }
    pages
}
