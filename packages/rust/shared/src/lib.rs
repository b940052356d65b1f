//! Shared types, error model, and configuration for ConceptGraph.
//!
//! This crate is the foundation depended on by all other ConceptGraph crates.
//! It provides:
//! - [`ConceptGraphError`] — the unified error type
//! - Domain types ([`IngestionJob`], [`ContentFragment`], [`GraphNode`], [`JobId`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, ExtractionConfig, GenerationConfig, GraphConfig, PipelineConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{ConceptGraphError, Result};
pub use types::{
    Channel, ContentFragment, GraphNode, GraphRelationship, IngestionJob, JobId, JobStatus,
    JobStep, NodeLabel, Position,
};
