//! Core domain types for ConceptGraph ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConceptGraphError;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for ingestion job identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Job status / step
// ---------------------------------------------------------------------------

/// Coarse state of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = ConceptGraphError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ConceptGraphError::validation(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// Fine-grained stage of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStep {
    Queued,
    Parsing,
    Uploading,
    Done,
}

impl JobStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Parsing => "parsing",
            Self::Uploading => "uploading",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for JobStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStep {
    type Err = ConceptGraphError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "parsing" => Ok(Self::Parsing),
            "uploading" => Ok(Self::Uploading),
            "done" => Ok(Self::Done),
            other => Err(ConceptGraphError::validation(format!(
                "unknown job step: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// IngestionJob
// ---------------------------------------------------------------------------

/// One document ingestion, persisted in `ingestion_jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: JobId,
    /// File name as submitted (display only).
    pub file_name: String,
    /// Path the channels read from.
    pub source_path: String,
    pub status: JobStatus,
    pub step: JobStep,
    /// Correlates the job with the task that runs it.
    pub worker_token: String,
    /// Failure message, set when the job ends in `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Content fragments
// ---------------------------------------------------------------------------

/// Which extraction channel produced a fragment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    NativeText,
    Ocr,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NativeText => "native_text",
            Self::Ocr => "ocr",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in the source document a fragment came from.
///
/// Serialized as a single key, e.g. `{"page": 3}` or `{"section": "Intro"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Page(u32),
    Slide(u32),
    Section(String),
}

/// A unit of extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFragment {
    #[serde(flatten)]
    pub position: Position,
    pub text: String,
    #[serde(skip)]
    pub channel: Channel,
}

impl ContentFragment {
    pub fn new(channel: Channel, position: Position, text: impl Into<String>) -> Self {
        Self {
            position,
            text: text.into(),
            channel,
        }
    }
}

// ---------------------------------------------------------------------------
// Graph records
// ---------------------------------------------------------------------------

/// Label of a node in the concept graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    Concept,
    Procedure,
    Assessment,
    Question,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concept => "Concept",
            Self::Procedure => "Procedure",
            Self::Assessment => "Assessment",
            Self::Question => "Question",
        }
    }
}

impl std::fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeLabel {
    type Err = ConceptGraphError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Concept" => Ok(Self::Concept),
            "Procedure" => Ok(Self::Procedure),
            "Assessment" => Ok(Self::Assessment),
            "Question" => Ok(Self::Question),
            other => Err(ConceptGraphError::validation(format!(
                "unknown node label: {other}"
            ))),
        }
    }
}

/// A node as written to the graph store. Properties are flat: scalars or
/// lists of scalars. A `null` value removes the key on upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: NodeLabel,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// A typed directed edge between two node ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub from: String,
    pub rel_type: String,
    pub to: String,
}

impl GraphRelationship {
    pub fn new(from: impl Into<String>, rel_type: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            rel_type: rel_type.into(),
            to: to.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().expect("parse JobId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn status_strings_are_lowercase() {
        assert_eq!(JobStatus::Cancelled.to_string(), "cancelled");
        assert_eq!(
            serde_json::to_string(&JobStep::Uploading).unwrap(),
            "\"uploading\""
        );
        assert_eq!("processing".parse::<JobStatus>().unwrap(), JobStatus::Processing);
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn fragment_serializes_position_inline() {
        let frag = ContentFragment::new(Channel::Ocr, Position::Page(1), "Hello");
        let json = serde_json::to_value(&frag).expect("serialize");
        assert_eq!(json, serde_json::json!({"page": 1, "text": "Hello"}));

        let frag = ContentFragment::new(Channel::NativeText, Position::Section("Intro".into()), "x");
        let json = serde_json::to_value(&frag).expect("serialize");
        assert_eq!(json, serde_json::json!({"section": "Intro", "text": "x"}));
    }

    #[test]
    fn node_label_parse() {
        assert_eq!("Procedure".parse::<NodeLabel>().unwrap(), NodeLabel::Procedure);
        assert!("procedure".parse::<NodeLabel>().is_err());
    }
}
