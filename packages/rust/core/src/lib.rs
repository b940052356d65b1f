//! Core ingestion workflows for ConceptGraph.
//!
//! This crate ties together extraction, generation, hierarchy repair, and
//! graph materialization into the job lifecycle driven by
//! [`lifecycle::TaskController`], and exposes live job progress through
//! [`progress::watch`].

pub mod artifact;
pub mod edit;
pub mod generation;
pub mod lifecycle;
pub mod pipeline;
pub mod progress;
pub mod prompt;

#[cfg(test)]
mod test_support;

pub use generation::{GeminiGenerator, Generator, decode_json, strip_code_fences};
pub use lifecycle::{CancelOutcome, JobStore, RunOutcome, TaskController, cancel_job};
pub use pipeline::{DocumentParser, ParsedDocument, PipelineOptions};
pub use progress::{ProgressEvent, ProgressFeed, watch};
