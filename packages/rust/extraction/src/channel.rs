use std::path::Path;

use conceptgraph_shared::{Channel, ContentFragment, ConceptGraphError, Result};

/// A source of content fragments for one document.
///
/// Implementations are synchronous and may block; the collector moves them
/// onto the blocking thread pool.
pub trait ExtractionChannel: Send + Sync {
    /// Tag carried by every fragment this channel produces.
    fn channel(&self) -> Channel;

    /// Extract fragments in document order.
    fn extract(&self, path: &Path) -> Result<Vec<ContentFragment>>;
}

/// Document formats the channels understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Pptx,
    Html,
}

impl SourceFormat {
    /// Detect the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => Ok(Self::Pdf),
            "pptx" => Ok(Self::Pptx),
            "html" | "htm" => Ok(Self::Html),
            _ => Err(ConceptGraphError::validation(format!(
                "unsupported document type: {}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_formats() {
        assert_eq!(SourceFormat::from_path(Path::new("a/b.PDF")).unwrap(), SourceFormat::Pdf);
        assert_eq!(SourceFormat::from_path(Path::new("deck.pptx")).unwrap(), SourceFormat::Pptx);
        assert_eq!(SourceFormat::from_path(Path::new("page.htm")).unwrap(), SourceFormat::Html);
        assert!(SourceFormat::from_path(Path::new("notes.docx")).is_err());
        assert!(SourceFormat::from_path(Path::new("README")).is_err());
    }
}
