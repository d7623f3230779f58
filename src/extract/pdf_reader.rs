use std::collections::BTreeMap;
use std::path::Path;

use encoding_rs::{BIG5, Encoding, UTF_16BE, UTF_16LE};
use lopdf::Document;
use lopdf::Object;
use lopdf::content::Content;
use tracing::debug;

use crate::error::ExtractError;
use crate::options::PageSelection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PageText {
    pub page_number: u32,
    pub text: String,
}

fn split_pages(raw_text: &str) -> Vec<String> {
    let mut pages = raw_text.split('\u{000C}').map(str::to_string).collect::<Vec<_>>();
    if pages.last().is_some_and(String::is_empty) {
        pages.pop();
    }
    pages
}

fn is_garbled(text: &str) -> bool {
    if text.contains("?Identity-H Unimplemented?") {
        return true;
    }
    let total = text.chars().count();
    let suspicious = |ch: &char| *ch == '\u{FFFD}' || (ch.is_control() && !ch.is_whitespace());
    total > 0 && text.chars().filter(suspicious).count() * 5 > total
}

const UTF16_HINTS: [&str; 4] = ["utf16", "ucs2", "identity-h", "unicode"];
const BIG5_HINTS: [&str; 4] = ["big5", "b5", "eten", "cns"];

/// Decodes a string operand with `lopdf`, retrying as UTF-16 or Big5 when
/// the font encoding name or a byte-order mark says so and the first pass
/// came out garbled.
fn decode_operand(encoding: Option<&str>, bytes: &[u8]) -> String {
    let decoded = Document::decode_text(encoding, bytes);
    if !is_garbled(&decoded) {
        return decoded;
    }

    let hint = encoding.map(str::to_ascii_lowercase).unwrap_or_default();
    let mut attempts: Vec<(&'static Encoding, &[u8])> = Vec::new();
    if let Some(body) = bytes.strip_prefix(b"\xFE\xFF") {
        attempts.push((UTF_16BE, body));
    } else if let Some(body) = bytes.strip_prefix(b"\xFF\xFE") {
        attempts.push((UTF_16LE, body));
    }
    if UTF16_HINTS.iter().any(|name| hint.contains(name)) {
        attempts.push((UTF_16BE, bytes));
    }
    if BIG5_HINTS.iter().any(|name| hint.contains(name)) {
        attempts.push((BIG5, bytes));
    }

    attempts
        .into_iter()
        .find_map(|(encoding, body)| {
            let (text, had_errors) = encoding.decode_without_bom_handling(body);
            (!had_errors && !text.is_empty()).then(|| text.into_owned())
        })
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

fn page_text_from_operators(document: &Document, page_id: lopdf::ObjectId) -> Option<String> {
    fn push_operand_text(text: &mut String, encoding: Option<&str>, operands: &[Object]) {
        for operand in operands {
            match operand {
                Object::String(bytes, _) => {
                    text.push_str(&decode_operand(encoding, bytes));
                }
                Object::Array(items) => {
                    push_operand_text(text, encoding, items);
                    text.push(' ');
                }
                Object::Integer(value) => {
                    if *value < -100 {
                        text.push(' ');
                    }
                }
                _ => {}
            }
        }
    }

    let raw_content = document.get_page_content(page_id).ok()?;
    let content = Content::decode(&raw_content).ok()?;
    let encodings = document
        .get_page_fonts(page_id)
        .into_iter()
        .map(|(name, font)| (name, font.get_font_encoding()))
        .collect::<BTreeMap<Vec<u8>, &str>>();

    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_encoding = None;
    for operation in content.operations {
        match operation.operator.as_str() {
            "Tf" => {
                if let Some(font_name) = operation
                    .operands
                    .first()
                    .and_then(|operand| operand.as_name().ok())
                {
                    current_encoding = encodings.get(font_name).copied();
                }
            }
            "Tj" | "TJ" | "'" | "\"" => {
                push_operand_text(&mut current, current_encoding, &operation.operands);
            }
            "T*" | "Td" | "TD" | "ET" => {
                if !current.trim().is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
            }
            _ => {}
        }
    }

    if !current.trim().is_empty() {
        lines.push(current);
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn selected(page_no: u32, selection: Option<&PageSelection>) -> bool {
    selection.is_none_or(|selection| selection.contains(page_no))
}

/// Page text as laid out by `pdf-extract`. When the form-feed split does not
/// line up with the page tree the whole document becomes page 1.
pub(crate) fn read_layout_pages(
    input_pdf: &Path,
    selection: Option<&PageSelection>,
) -> Result<Vec<PageText>, ExtractError> {
    let document = Document::load(input_pdf)?;
    let page_numbers = document.get_pages().into_keys().collect::<Vec<_>>();
    let text = pdf_extract::extract_text(input_pdf)
        .map_err(|error| ExtractError::PdfText(error.to_string()))?;

    let split = split_pages(&text);
    let pages = if split.len() == page_numbers.len() {
        page_numbers
            .into_iter()
            .zip(split)
            .filter(|(page_no, _)| selected(*page_no, selection))
            .map(|(page_number, text)| PageText { page_number, text })
            .collect::<Vec<_>>()
    } else {
        debug!(
            pages = page_numbers.len(),
            chunks = split.len(),
            "page split mismatch; using whole-document text"
        );
        vec![PageText {
            page_number: 1,
            text,
        }]
    };

    if pages.is_empty() {
        return Err(ExtractError::NoPagesSelected);
    }
    Ok(pages)
}

/// Page text rebuilt from each page's text-showing operators, falling back to
/// `lopdf`'s own extraction when the content stream yields nothing.
pub(crate) fn read_stream_pages(
    input_pdf: &Path,
    selection: Option<&PageSelection>,
) -> Result<Vec<PageText>, ExtractError> {
    let document = Document::load(input_pdf)?;

    let mut pages = Vec::new();
    for (page_no, page_id) in document.get_pages() {
        if !selected(page_no, selection) {
            continue;
        }

        let text = page_text_from_operators(&document, page_id)
            .or_else(|| {
                document
                    .extract_text(&[page_no])
                    .ok()
                    .filter(|text| !text.trim().is_empty())
            })
            .unwrap_or_default();

        pages.push(PageText {
            page_number: page_no,
            text,
        });
    }

    if pages.is_empty() {
        return Err(ExtractError::NoPagesSelected);
    }
    Ok(pages)
}
