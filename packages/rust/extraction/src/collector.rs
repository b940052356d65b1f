//! Runs both channels and merges their output.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use conceptgraph_shared::{ContentFragment, ExtractionConfig, Position};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use tracing::{info, instrument, warn};

use crate::channel::ExtractionChannel;
use crate::native::NativeTextChannel;
use crate::ocr::OcrChannel;

/// Payload handed to the generation service: each channel's fragments in
/// their original order, grouped by channel. No cross-channel alignment.
///
/// Textual entries carry their text as `text`, visual ones as `ocr_text`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePayload {
    pub textual: Vec<ContentFragment>,
    pub visual: Vec<ContentFragment>,
}

#[derive(serde::Serialize)]
struct VisualEntry<'a> {
    #[serde(flatten)]
    position: &'a Position,
    ocr_text: &'a str,
}

impl Serialize for MergePayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let visual: Vec<VisualEntry<'_>> = self
            .visual
            .iter()
            .map(|f| VisualEntry {
                position: &f.position,
                ocr_text: &f.text,
            })
            .collect();

        let mut state = serializer.serialize_struct("MergePayload", 2)?;
        state.serialize_field("textual", &self.textual)?;
        state.serialize_field("visual", &visual)?;
        state.end()
    }
}

impl MergePayload {
    pub fn is_empty(&self) -> bool {
        self.textual.is_empty() && self.visual.is_empty()
    }

    pub fn to_pretty_json(&self) -> String {
        // Only strings and integers inside; serialization cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Combine the two channel sequences into one payload.
pub fn merge(textual: Vec<ContentFragment>, visual: Vec<ContentFragment>) -> MergePayload {
    MergePayload { textual, visual }
}

/// Owns the text channel and, when enabled, the OCR channel.
#[derive(Clone)]
pub struct ExtractionCollector {
    textual: Arc<dyn ExtractionChannel>,
    visual: Option<Arc<dyn ExtractionChannel>>,
}

impl ExtractionCollector {
    pub fn new(
        textual: Arc<dyn ExtractionChannel>,
        visual: Option<Arc<dyn ExtractionChannel>>,
    ) -> Self {
        Self { textual, visual }
    }

    /// Build the standard channel pair from config.
    pub fn from_config(config: &ExtractionConfig) -> Self {
        let visual: Option<Arc<dyn ExtractionChannel>> = if config.ocr_enabled {
            Some(Arc::new(OcrChannel::new(config)))
        } else {
            None
        };
        Self::new(Arc::new(NativeTextChannel::new()), visual)
    }

    /// Extract with both channels concurrently and merge the results.
    /// A channel that fails or panics contributes nothing.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn collect(&self, path: &Path) -> MergePayload {
        let textual = run_channel(self.textual.clone(), path.to_path_buf());
        let visual = async {
            match &self.visual {
                Some(channel) => run_channel(channel.clone(), path.to_path_buf()).await,
                None => Vec::new(),
            }
        };
        let (textual, visual) = tokio::join!(textual, visual);

        info!(
            textual = textual.len(),
            visual = visual.len(),
            "merged extraction channels"
        );
        merge(textual, visual)
    }
}

async fn run_channel(channel: Arc<dyn ExtractionChannel>, path: PathBuf) -> Vec<ContentFragment> {
    let name = channel.channel();
    match tokio::task::spawn_blocking(move || channel.extract(&path)).await {
        Ok(Ok(fragments)) => fragments,
        Ok(Err(e)) => {
            warn!(channel = %name, error = %e, "extraction channel failed, continuing without it");
            Vec::new()
        }
        Err(e) => {
            warn!(channel = %name, error = %e, "extraction channel panicked, continuing without it");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conceptgraph_shared::{Channel, ConceptGraphError, Position, Result};
    use serde_json::json;

    struct Fixed(Channel, Vec<ContentFragment>);

    impl ExtractionChannel for Fixed {
        fn channel(&self) -> Channel {
            self.0
        }
        fn extract(&self, _path: &Path) -> Result<Vec<ContentFragment>> {
            Ok(self.1.clone())
        }
    }

    struct Broken;

    impl ExtractionChannel for Broken {
        fn channel(&self) -> Channel {
            Channel::Ocr
        }
        fn extract(&self, _path: &Path) -> Result<Vec<ContentFragment>> {
            Err(ConceptGraphError::extraction("ocr", "tesseract not installed"))
        }
    }

    struct Panicking;

    impl ExtractionChannel for Panicking {
        fn channel(&self) -> Channel {
            Channel::NativeText
        }
        fn extract(&self, _path: &Path) -> Result<Vec<ContentFragment>> {
            panic!("corrupt page tree")
        }
    }

    fn text(n: u32, s: &str) -> ContentFragment {
        ContentFragment::new(Channel::NativeText, Position::Page(n), s)
    }

    fn ocr(n: u32, s: &str) -> ContentFragment {
        ContentFragment::new(Channel::Ocr, Position::Page(n), s)
    }

    #[test]
    fn merge_keeps_order_and_shape() {
        let payload = merge(vec![text(2, "b"), text(1, "a")], vec![ocr(1, "A")]);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "textual": [{"page": 2, "text": "b"}, {"page": 1, "text": "a"}],
                "visual": [{"page": 1, "ocr_text": "A"}]
            })
        );
    }

    #[test]
    fn visual_entries_keep_position_key() {
        let payload = merge(
            Vec::new(),
            vec![
                ContentFragment::new(Channel::Ocr, Position::Slide(3), "Torque chart"),
                ContentFragment::new(Channel::Ocr, Position::Section("Annex".into()), "fig 2"),
            ],
        );
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value["visual"],
            json!([
                {"slide": 3, "ocr_text": "Torque chart"},
                {"section": "Annex", "ocr_text": "fig 2"}
            ])
        );
        assert!(value["visual"][0].get("text").is_none());
        assert_eq!(value["textual"], json!([]));
    }

    #[tokio::test]
    async fn collects_both_channels() {
        let collector = ExtractionCollector::new(
            Arc::new(Fixed(Channel::NativeText, vec![text(1, "hello")])),
            Some(Arc::new(Fixed(Channel::Ocr, vec![ocr(1, "HELLO")]))),
        );
        let payload = collector.collect(Path::new("x.pdf")).await;
        assert_eq!(payload.textual, vec![text(1, "hello")]);
        assert_eq!(payload.visual, vec![ocr(1, "HELLO")]);
    }

    #[tokio::test]
    async fn failed_channel_contributes_nothing() {
        let collector = ExtractionCollector::new(
            Arc::new(Fixed(Channel::NativeText, vec![text(1, "hello")])),
            Some(Arc::new(Broken)),
        );
        let payload = collector.collect(Path::new("x.pdf")).await;
        assert_eq!(payload.textual.len(), 1);
        assert!(payload.visual.is_empty());
    }

    #[tokio::test]
    async fn panicking_channel_contributes_nothing() {
        let collector = ExtractionCollector::new(
            Arc::new(Panicking),
            Some(Arc::new(Fixed(Channel::Ocr, vec![ocr(3, "scan")]))),
        );
        let payload = collector.collect(Path::new("x.pdf")).await;
        assert!(payload.textual.is_empty());
        assert_eq!(payload.visual.len(), 1);
    }

    #[tokio::test]
    async fn ocr_disabled() {
        let config = ExtractionConfig {
            ocr_enabled: false,
            ..ExtractionConfig::default()
        };
        let collector = ExtractionCollector::from_config(&config);
        assert!(collector.visual.is_none());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.html");
        std::fs::write(&path, "<body>Torque specs</body>").unwrap();
        let payload = collector.collect(&path).await;
        assert_eq!(payload.textual[0].text, "Torque specs");
        assert!(payload.visual.is_empty());
    }
}
