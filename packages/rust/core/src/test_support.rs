//! Fakes shared by the crate's tests.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use conceptgraph_extraction::ExtractionChannel;
use conceptgraph_shared::{Channel, ConceptGraphError, ContentFragment, Position, Result};

use crate::generation::Generator;
use crate::pipeline::PipelineOptions;

pub(crate) struct FixedChannel {
    channel: Channel,
    fragments: Vec<ContentFragment>,
}

impl FixedChannel {
    pub(crate) fn page(channel: Channel, page: u32, text: &str) -> Self {
        Self {
            channel,
            fragments: vec![ContentFragment::new(channel, Position::Page(page), text)],
        }
    }
}

impl ExtractionChannel for FixedChannel {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn extract(&self, _path: &Path) -> Result<Vec<ContentFragment>> {
        Ok(self.fragments.clone())
    }
}

pub(crate) struct FailingChannel(pub(crate) Channel);

impl ExtractionChannel for FailingChannel {
    fn channel(&self) -> Channel {
        self.0
    }

    fn extract(&self, _path: &Path) -> Result<Vec<ContentFragment>> {
        Err(ConceptGraphError::extraction(self.0.as_str(), "tool missing"))
    }
}

/// Answers every prompt with the same text and remembers the last prompt.
pub(crate) struct FixedGenerator {
    answer: String,
    last_prompt: Mutex<String>,
}

impl FixedGenerator {
    pub(crate) fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            last_prompt: Mutex::new(String::new()),
        }
    }

    pub(crate) fn last_prompt(&self) -> String {
        self.last_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for FixedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        *self.last_prompt.lock().unwrap() = prompt.to_string();
        Ok(self.answer.clone())
    }
}

pub(crate) fn options_in(dir: &Path) -> PipelineOptions {
    PipelineOptions {
        static_url: "/static/".into(),
        output_dir: dir.join("data"),
        repair_attempts: 2,
        repair_delay: Duration::from_millis(1),
    }
}
