//! Native text channel: reads the document's own text layer.

use std::path::Path;

use conceptgraph_shared::{Channel, ConceptGraphError, ContentFragment, Position, Result};
use lopdf::Document;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use crate::channel::{ExtractionChannel, SourceFormat};
use crate::pptx::PptxArchive;

const CHANNEL: &str = "native_text";

/// Section name used for the single fragment of an HTML document.
const HTML_SECTION: &str = "html";

/// Elements whose text never reaches the reader.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Extracts embedded text: PDF pages via `lopdf`, PPTX slides via the slide
/// XML, HTML body text via `scraper`.
#[derive(Debug, Default, Clone)]
pub struct NativeTextChannel;

impl NativeTextChannel {
    pub fn new() -> Self {
        Self
    }
}

impl ExtractionChannel for NativeTextChannel {
    fn channel(&self) -> Channel {
        Channel::NativeText
    }

    fn extract(&self, path: &Path) -> Result<Vec<ContentFragment>> {
        let fragments = match SourceFormat::from_path(path)? {
            SourceFormat::Pdf => extract_pdf(path)?,
            SourceFormat::Pptx => extract_pptx(path)?,
            SourceFormat::Html => extract_html(path)?,
        };
        info!(path = %path.display(), fragments = fragments.len(), "extracted textual content");
        Ok(fragments)
    }
}

/// One fragment per page with non-blank text.
fn extract_pdf(path: &Path) -> Result<Vec<ContentFragment>> {
    let doc = Document::load(path)
        .map_err(|e| ConceptGraphError::extraction(CHANNEL, format!("failed to load PDF: {e}")))?;

    let mut fragments = Vec::new();
    for page_num in doc.get_pages().keys().copied() {
        match doc.extract_text(&[page_num]) {
            Ok(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    fragments.push(ContentFragment::new(
                        Channel::NativeText,
                        Position::Page(page_num),
                        text,
                    ));
                }
            }
            Err(e) => debug!(page = page_num, error = %e, "no text layer on page"),
        }
    }
    Ok(fragments)
}

/// One fragment per slide, blank slides included.
fn extract_pptx(path: &Path) -> Result<Vec<ContentFragment>> {
    let mut pptx = PptxArchive::open(path, CHANNEL)?;
    let mut fragments = Vec::new();
    for number in pptx.slide_numbers() {
        let text = pptx.slide_text(number)?;
        fragments.push(ContentFragment::new(
            Channel::NativeText,
            Position::Slide(number),
            text,
        ));
    }
    Ok(fragments)
}

/// The whole visible body text as a single `html` section.
fn extract_html(path: &Path) -> Result<Vec<ContentFragment>> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConceptGraphError::io(path, e))?;
    let text = html_body_text(&raw);
    Ok(vec![ContentFragment::new(
        Channel::NativeText,
        Position::Section(HTML_SECTION.into()),
        text,
    )])
}

pub(crate) fn html_body_text(raw: &str) -> String {
    let document = Html::parse_document(raw);
    let mut parts = Vec::new();

    match Selector::parse("body") {
        Ok(body_sel) => match document.select(&body_sel).next() {
            Some(body) => collect_visible_text(body, &mut parts),
            None => collect_visible_text(document.root_element(), &mut parts),
        },
        Err(_) => collect_visible_text(document.root_element(), &mut parts),
    }

    parts.join(" ")
}

fn collect_visible_text(el: ElementRef<'_>, out: &mut Vec<String>) {
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if HIDDEN_ELEMENTS.contains(&child_el.value().name()) {
                continue;
            }
            collect_visible_text(child_el, out);
        } else if let Some(text) = child.value().as_text() {
            let words = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !words.is_empty() {
                out.push(words);
            }
        }
    }
}
