//! Parsing stage: document → extraction → generation → repaired concept tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use conceptgraph_extraction::ExtractionCollector;
use conceptgraph_graph::{ConceptTree, repair_with_retry, rewrite_tree_sources};
use conceptgraph_shared::{AppConfig, Result};

use crate::artifact::write_tree_artifact;
use crate::generation::{Generator, decode_json};
use crate::prompt::build_prompt;

/// Settings of the parsing stage.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Prefix for rewritten `source` links.
    pub static_url: String,
    /// Directory receiving the repaired tree artifacts.
    pub output_dir: PathBuf,
    pub repair_attempts: u32,
    pub repair_delay: Duration,
}

impl PipelineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            static_url: config.defaults.static_url.clone(),
            output_dir: PathBuf::from(&config.defaults.output_dir),
            repair_attempts: config.pipeline.repair_attempts,
            repair_delay: Duration::from_millis(config.pipeline.repair_retry_delay_ms),
        }
    }
}

/// Output of a successful parse.
#[derive(Debug)]
pub struct ParsedDocument {
    pub tree: ConceptTree,
    /// Where the repaired tree was written.
    pub artifact_path: PathBuf,
    pub textual_fragments: usize,
    pub visual_fragments: usize,
}

/// Turns one source document into a repaired concept tree.
pub struct DocumentParser {
    collector: ExtractionCollector,
    generator: Arc<dyn Generator>,
    options: PipelineOptions,
}

impl DocumentParser {
    pub fn new(
        collector: ExtractionCollector,
        generator: Arc<dyn Generator>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            collector,
            generator,
            options,
        }
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        let start = Instant::now();

        // --- Phase 1: Extraction ---
        let payload = self.collector.collect(path).await;
        if payload.is_empty() {
            warn!("no content extracted from either channel");
        }
        let textual_fragments = payload.textual.len();
        let visual_fragments = payload.visual.len();

        // --- Phase 2: Generation ---
        let prompt = build_prompt(&payload);
        let raw = self.generator.generate(&prompt).await?;
        let value = decode_json(&raw)?;
        let mut tree = ConceptTree::from_value(value)?;

        // --- Phase 3: Source links + hierarchy repair ---
        let rewritten = rewrite_tree_sources(&mut tree.root, &self.options.static_url);
        let tree = repair_with_retry(
            &tree,
            self.options.repair_attempts,
            self.options.repair_delay,
        )
        .await?;

        // --- Phase 4: Artifact ---
        let artifact_path = write_tree_artifact(&self.options.output_dir, &tree.to_value()).await?;

        info!(
            nodes = tree.node_count(),
            textual_fragments,
            visual_fragments,
            rewritten_sources = rewritten,
            artifact = %artifact_path.display(),
            elapsed_ms = start.elapsed().as_millis(),
            "document parsed"
        );

        Ok(ParsedDocument {
            tree,
            artifact_path,
            textual_fragments,
            visual_fragments,
        })
    }
}
