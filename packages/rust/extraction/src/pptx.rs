//! Minimal PPTX reader: slide order, text runs, and embedded pictures.
//!
//! A `.pptx` is a ZIP archive; slides live at `ppt/slides/slideN.xml` and
//! reference pictures in `ppt/media/` through `ppt/slides/_rels/slideN.xml.rels`.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use conceptgraph_shared::{ConceptGraphError, Result};
use regex::Regex;
use zip::ZipArchive;

static SLIDE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").expect("valid regex"));

static TEXT_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<a:t(?:\s[^>]*)?>(.*?)</a:t>").expect("valid regex"));

static RELATIONSHIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Relationship\b[^>]*>").expect("valid regex"));

static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("valid regex"));

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff"];

pub(crate) struct PptxArchive {
    archive: ZipArchive<File>,
    channel: &'static str,
}

impl PptxArchive {
    pub fn open(path: &Path, channel: &'static str) -> Result<Self> {
        let file = File::open(path).map_err(|e| ConceptGraphError::io(path, e))?;
        let archive = ZipArchive::new(file).map_err(|e| {
            ConceptGraphError::extraction(channel, format!("not a PPTX archive: {e}"))
        })?;
        Ok(Self { archive, channel })
    }

    /// Slide numbers in presentation order.
    pub fn slide_numbers(&self) -> Vec<u32> {
        let mut numbers: Vec<u32> = self
            .archive
            .file_names()
            .filter_map(|name| SLIDE_NAME_RE.captures(name))
            .filter_map(|caps| caps[1].parse().ok())
            .collect();
        numbers.sort_unstable();
        numbers
    }

    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut entry = self.archive.by_name(name).map_err(|e| {
            ConceptGraphError::extraction(self.channel, format!("missing entry {name}: {e}"))
        })?;
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).map_err(|e| {
            ConceptGraphError::extraction(self.channel, format!("failed to read {name}: {e}"))
        })?;
        Ok(buf)
    }

    /// Text of one slide, runs joined by single spaces.
    pub fn slide_text(&mut self, number: u32) -> Result<String> {
        let xml = self.read_entry(&format!("ppt/slides/slide{number}.xml"))?;
        Ok(text_runs(&String::from_utf8_lossy(&xml)))
    }

    /// Archive entry names of the pictures a slide references, in
    /// relationship order. Slides without a rels part have none.
    pub fn slide_images(&mut self, number: u32) -> Result<Vec<String>> {
        let rels_name = format!("ppt/slides/_rels/slide{number}.xml.rels");
        if self.archive.index_for_name(&rels_name).is_none() {
            return Ok(Vec::new());
        }
        let rels = self.read_entry(&rels_name)?;
        Ok(image_targets(&String::from_utf8_lossy(&rels)))
    }
}

fn text_runs(xml: &str) -> String {
    TEXT_RUN_RE
        .captures_iter(xml)
        .map(|caps| decode_entities(&caps[1]))
        .filter(|run| !run.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn image_targets(rels: &str) -> Vec<String> {
    let mut targets = Vec::new();
    for rel in RELATIONSHIP_RE.find_iter(rels) {
        let mut rel_type = "";
        let mut target = "";
        for attr in ATTR_RE.captures_iter(rel.as_str()) {
            match attr.get(1).map(|m| m.as_str()) {
                Some("Type") => rel_type = attr.get(2).map_or("", |m| m.as_str()),
                Some("Target") => target = attr.get(2).map_or("", |m| m.as_str()),
                _ => {}
            }
        }
        if !rel_type.ends_with("/image") || !is_image_name(target) {
            continue;
        }
        targets.push(resolve_target(target));
    }
    targets
}

fn is_image_name(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Resolve a rels `Target` relative to `ppt/slides/`.
fn resolve_target(target: &str) -> String {
    if let Some(abs) = target.strip_prefix('/') {
        abs.to_string()
    } else if let Some(up) = target.strip_prefix("../") {
        format!("ppt/{up}")
    } else {
        format!("ppt/slides/{target}")
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
