//! OCR channel: rasterized pages and embedded pictures through Tesseract.
//!
//! Requires the `tesseract` CLI, plus `pdftoppm` (poppler-utils) for PDFs.
//! A single image that fails recognition is skipped; a missing tool fails
//! the whole channel.

use std::path::{Path, PathBuf};
use std::process::Command;

use conceptgraph_shared::{Channel, ConceptGraphError, ContentFragment, ExtractionConfig, Position, Result};
use tracing::{info, warn};

use crate::channel::{ExtractionChannel, SourceFormat};
use crate::pptx::PptxArchive;

const CHANNEL: &str = "ocr";

/// Runs OCR over rendered PDF pages or PPTX slide pictures.
#[derive(Debug, Clone)]
pub struct OcrChannel {
    tesseract_path: String,
    pdftoppm_path: String,
    dpi: u32,
    language: String,
}

impl OcrChannel {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            tesseract_path: config.tesseract_path.clone(),
            pdftoppm_path: config.pdftoppm_path.clone(),
            dpi: config.dpi,
            language: config.language.clone(),
        }
    }

    fn extract_pdf(&self, path: &Path) -> Result<Vec<ContentFragment>> {
        let workdir = tempfile::tempdir()
            .map_err(|e| ConceptGraphError::extraction(CHANNEL, format!("tempdir: {e}")))?;
        let prefix = workdir.path().join("page");

        // pdftoppm -r 200 -png input.pdf <dir>/page -> page-1.png, page-2.png, ...
        let output = Command::new(&self.pdftoppm_path)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .arg(path)
            .arg(&prefix)
            .output()
            .map_err(|e| {
                ConceptGraphError::extraction(
                    CHANNEL,
                    format!("failed to run pdftoppm (path='{}'): {e}", self.pdftoppm_path),
                )
            })?;

        if !output.status.success() {
            return Err(ConceptGraphError::extraction(
                CHANNEL,
                format!(
                    "pdftoppm exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        let pages = rendered_pages(workdir.path())?;
        let mut fragments = Vec::new();
        for (number, image) in pages {
            if let Some(text) = self.recognize_or_skip(&image, number) {
                fragments.push(ContentFragment::new(Channel::Ocr, Position::Page(number), text));
            }
        }
        Ok(fragments)
    }

    fn extract_pptx(&self, path: &Path) -> Result<Vec<ContentFragment>> {
        let mut pptx = PptxArchive::open(path, CHANNEL)?;
        let workdir = tempfile::tempdir()
            .map_err(|e| ConceptGraphError::extraction(CHANNEL, format!("tempdir: {e}")))?;

        let mut fragments = Vec::new();
        for number in pptx.slide_numbers() {
            for (idx, entry) in pptx.slide_images(number)?.into_iter().enumerate() {
                let bytes = match pptx.read_entry(&entry) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(slide = number, entry = %entry, error = %e, "skipping picture");
                        continue;
                    }
                };
                let ext = entry.rsplit_once('.').map_or("png", |(_, ext)| ext);
                let image = workdir.path().join(format!("slide{number}-{idx}.{ext}"));
                std::fs::write(&image, &bytes).map_err(|e| ConceptGraphError::io(&image, e))?;

                if let Some(text) = self.recognize_or_skip(&image, number) {
                    fragments.push(ContentFragment::new(Channel::Ocr, Position::Slide(number), text));
                }
            }
        }
        Ok(fragments)
    }

    /// Recognize one image; failures are logged and yield `None`.
    fn recognize_or_skip(&self, image: &Path, index: u32) -> Option<String> {
        match self.recognize(image) {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                warn!(index, error = %e, "failed to OCR image, skipping");
                None
            }
        }
    }

    fn recognize(&self, image: &Path) -> Result<String> {
        // tesseract input.png stdout -l eng
        let output = Command::new(&self.tesseract_path)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .map_err(|e| {
                ConceptGraphError::extraction(
                    CHANNEL,
                    format!("failed to run tesseract (path='{}'): {e}", self.tesseract_path),
                )
            })?;

        if !output.status.success() {
            return Err(ConceptGraphError::extraction(
                CHANNEL,
                format!(
                    "tesseract exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl ExtractionChannel for OcrChannel {
    fn channel(&self) -> Channel {
        Channel::Ocr
    }

    fn extract(&self, path: &Path) -> Result<Vec<ContentFragment>> {
        let fragments = match SourceFormat::from_path(path)? {
            SourceFormat::Pdf => self.extract_pdf(path)?,
            SourceFormat::Pptx => self.extract_pptx(path)?,
            // HTML carries no raster content
            SourceFormat::Html => Vec::new(),
        };
        info!(path = %path.display(), fragments = fragments.len(), "extracted visual content");
        Ok(fragments)
    }
}

/// PNGs written by `pdftoppm`, keyed and sorted by page number. The page
/// suffix is zero-padded to the width of the page count (`page-01.png`).
fn rendered_pages(dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let entries = std::fs::read_dir(dir).map_err(|e| ConceptGraphError::io(dir, e))?;
    let mut pages = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(stem) = path
            .extension()
            .filter(|ext| ext.eq_ignore_ascii_case("png"))
            .and_then(|_| path.file_stem())
            .and_then(|s| s.to_str())
        else {
            continue;
        };
        if let Some(number) = stem.rsplit_once('-').and_then(|(_, n)| n.parse::<u32>().ok()) {
            pages.push((number, path.clone()));
        }
    }
    pages.sort_by_key(|(n, _)| *n);
    Ok(pages)
}

/// Check whether an external tool can be spawned (`<tool> --version`).
pub fn is_tool_available(path: &str) -> bool {
    Command::new(path)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
