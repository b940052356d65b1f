//! Concept tree model, hierarchy repair, and graph materialization.
//!
//! The generated concept tree arrives as JSON. It is decoded once into a
//! [`ConceptTree`] (node kinds fixed at that point), repaired so procedural
//! `-step` siblings form one ordered chain, then written to a [`GraphStore`]
//! as idempotent node upserts and relationship merges.

pub mod flatten;
pub mod materialize;
pub mod repair;
pub mod source_link;
pub mod tree;

pub use flatten::flatten_properties;
pub use materialize::{GraphStore, RelationPolicy, UploadStats, upload};
pub use repair::{MAX_DEPTH, repair, repair_with_retry};
pub use source_link::{rewrite_source, rewrite_source_property, rewrite_tree_sources};
pub use tree::{ConceptNode, ConceptTree, Connection, NodeKind};
