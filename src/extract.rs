//! Text extraction for page-oriented documents (PDF, PPTX) and plain text.
//!
//! Sources supply bytes plus a content type; this module returns the visible
//! text of every page in document order, pages joined with `"\n"`.
//! Extraction is pure: no I/O, no shared state.

use std::io::Read;

use crate::error::ExtractError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// Separator placed between consecutive pages.
pub const PAGE_SEPARATOR: &str = "\n";

/// Upper bound on the inflated size of one slide's XML.
const SLIDE_XML_LIMIT: u64 = 50 * 1024 * 1024;

/// Turns a complete in-memory document into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], content_type: &str) -> Result<String, ExtractError>;
}

/// Dispatches on content type to the built-in format readers.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExtractor;

impl TextExtractor for DefaultExtractor {
    fn extract(&self, bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
        extract_text(bytes, content_type)
    }
}

/// Extract plain text from `bytes` of the given content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_PPTX => extract_pptx(bytes),
        MIME_TEXT | MIME_MARKDOWN => extract_utf8(bytes),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

/// Whether [`extract_text`] understands this content type.
pub fn is_supported(content_type: &str) -> bool {
    matches!(content_type, MIME_PDF | MIME_PPTX | MIME_TEXT | MIME_MARKDOWN)
}

/// Map a file extension to the content type used by [`extract_text`].
pub fn content_type_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "pdf" => Some(MIME_PDF),
        "pptx" => Some(MIME_PPTX),
        "txt" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        _ => None,
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract can panic on malformed input; keep that inside this document.
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| ExtractError::Pdf("parser panicked on malformed input".to_string()))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages.join(PAGE_SEPARATOR))
}

fn extract_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| ExtractError::Encoding(e.to_string()))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn ooxml_err(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Ooxml(e.to_string())
}

/// `ppt/slides/slide12.xml` -> 12. Layouts, notes and rels yield `None`.
fn slide_number(entry: &str) -> Option<u32> {
    entry
        .strip_prefix("ppt/slides/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

/// Read one archive entry, refusing to inflate past `SLIDE_XML_LIMIT`.
fn read_entry(archive: &mut Archive<'_>, entry: &str) -> Result<Vec<u8>, ExtractError> {
    let file = archive.by_name(entry).map_err(ooxml_err)?;
    let mut xml = Vec::new();
    file.take(SLIDE_XML_LIMIT + 1)
        .read_to_end(&mut xml)
        .map_err(ooxml_err)?;
    if xml.len() as u64 > SLIDE_XML_LIMIT {
        return Err(ExtractError::Ooxml(format!(
            "{} inflates beyond {} bytes",
            entry, SLIDE_XML_LIMIT
        )));
    }
    Ok(xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = Archive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|entry| slide_number(entry).map(|n| (n, entry.to_string())))
        .collect();
    if slides.is_empty() {
        return Err(ExtractError::Ooxml("archive contains no slides".to_string()));
    }
    slides.sort();

    let pages = slides
        .iter()
        .map(|(_, entry)| read_entry(&mut archive, entry).and_then(|xml| slide_text(&xml)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(pages.join(PAGE_SEPARATOR))
}

/// Text runs (`<a:t>`) of one slide, space-separated.
fn slide_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut runs = Vec::new();
    let mut in_run = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(ooxml_err)? {
            Event::Start(tag) if tag.local_name().as_ref() == b"t" => in_run = true,
            Event::End(tag) if tag.local_name().as_ref() == b"t" => in_run = false,
            Event::Text(text) if in_run => {
                runs.push(text.unescape().map_err(ooxml_err)?.into_owned());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(runs.join(" "))
}
