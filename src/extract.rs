//! Format routing and text extraction for documents (PDF, DOCX, plain text).
//!
//! Extraction turns file bytes into ordered [`Section`]s, one per page where
//! the format has pages. Chunking happens afterwards in [`crate::chunk`].
//! Images and audio are routed here but decoded by [`crate::images`] and
//! [`crate::audio`].

use std::io::Read;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Ooxml(String),
    #[error("image decoding failed: {0}")]
    Image(String),
    #[error("text is not valid UTF-8: {0}")]
    Encoding(String),
    #[error("extractor panicked: {0}")]
    Panicked(String),
}

/// Parser route chosen from a file's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Docx,
    PlainText,
    Image,
    Audio,
}

impl FileKind {
    /// Routes by lowercase extension. `None` means the file is skipped.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(FileKind::Pdf),
            "docx" => Some(FileKind::Docx),
            "txt" | "md" => Some(FileKind::PlainText),
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" => Some(FileKind::Image),
            "mp3" | "wav" | "m4a" | "flac" | "ogg" => Some(FileKind::Audio),
            _ => None,
        }
    }
}

/// A run of document text, chunked independently of its neighbours.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// 1-based page number; `None` for formats without pages.
    pub page: Option<u32>,
    pub text: String,
}

/// Extracts the ordered sections of a document.
pub fn extract_sections(bytes: &[u8], kind: FileKind) -> Result<Vec<Section>, ExtractError> {
    match kind {
        FileKind::Pdf => extract_pdf(bytes),
        FileKind::Docx => extract_docx(bytes),
        FileKind::PlainText => extract_plain(bytes),
        other => Err(ExtractError::UnsupportedContentType(format!(
            "{:?} is not a document format",
            other
        ))),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<Section>, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| Section {
            page: Some(i as u32 + 1),
            text,
        })
        .collect())
}

fn extract_plain(bytes: &[u8]) -> Result<Vec<Section>, ExtractError> {
    let text = std::str::from_utf8(bytes).map_err(|e| ExtractError::Encoding(e.to_string()))?;
    Ok(vec![Section {
        page: None,
        text: text.to_string(),
    }])
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<Vec<Section>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    docx_sections(&doc_xml)
}

fn is_page_break(e: &BytesStart<'_>) -> bool {
    e.local_name().as_ref() == b"br"
        && e.attributes().flatten().any(|a| {
            a.key.local_name().as_ref() == b"type" && a.value.as_ref() == b"page"
        })
}

/// Walks `word/document.xml`: `w:t` runs are text, `w:p` ends a paragraph,
/// `<w:br w:type="page"/>` starts the next page.
fn docx_sections(xml: &[u8]) -> Result<Vec<Section>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut sections = Vec::new();
    let mut page = 1u32;
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    let flush_paragraph = |current: &mut String, paragraphs: &mut Vec<String>| {
        if !current.trim().is_empty() {
            paragraphs.push(std::mem::take(current));
        } else {
            current.clear();
        }
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                _ if is_page_break(&e) => {
                    flush_paragraph(&mut current, &mut paragraphs);
                    sections.push(Section {
                        page: Some(page),
                        text: paragraphs.join("\n\n"),
                    });
                    paragraphs.clear();
                    page += 1;
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                _ if is_page_break(&e) => {
                    flush_paragraph(&mut current, &mut paragraphs);
                    sections.push(Section {
                        page: Some(page),
                        text: paragraphs.join("\n\n"),
                    });
                    paragraphs.clear();
                    page += 1;
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => flush_paragraph(&mut current, &mut paragraphs),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    flush_paragraph(&mut current, &mut paragraphs);
    sections.push(Section {
        page: Some(page),
        text: paragraphs.join("\n\n"),
    });
    Ok(sections)
}
