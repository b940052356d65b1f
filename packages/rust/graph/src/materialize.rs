//! Writes a repaired concept tree into a graph store.
//!
//! Every write is an upsert (nodes by id) or a merge (edges by
//! `(from, type, to)`), so re-uploading the same tree converges to the same
//! graph. The walk stops at the first failed write; nodes written before it
//! stay in place.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use conceptgraph_shared::{
    ConceptGraphError, GraphConfig, GraphNode, GraphRelationship, NodeLabel, Result,
};
use conceptgraph_storage::Storage;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::flatten::flatten_properties;
use crate::tree::{ConceptNode, ConceptTree, NodeKind};

pub const HAS_CHILD: &str = "HAS_CHILD";
pub const HAS_QUESTION: &str = "HAS_QUESTION";

static RELATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

// ---------------------------------------------------------------------------
// Store seam
// ---------------------------------------------------------------------------

/// The two write primitives the materializer needs.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the node, or merge its properties into the existing one.
    async fn upsert_node(&self, node: &GraphNode) -> Result<()>;

    /// Create the edge unless an identical one exists.
    async fn merge_relationship(&self, rel: &GraphRelationship) -> Result<()>;
}

#[async_trait]
impl GraphStore for Storage {
    async fn upsert_node(&self, node: &GraphNode) -> Result<()> {
        self.upsert_graph_node(node).await
    }

    async fn merge_relationship(&self, rel: &GraphRelationship) -> Result<()> {
        self.merge_graph_relationship(rel).await
    }
}

// ---------------------------------------------------------------------------
// Relation policy
// ---------------------------------------------------------------------------

/// Which `connections` relation names may become edge types.
///
/// Names must look like identifiers (`[A-Za-z_][A-Za-z0-9_]*`). A non-empty
/// allow-list further restricts them.
#[derive(Debug, Clone, Default)]
pub struct RelationPolicy {
    allowed: HashSet<String>,
}

impl RelationPolicy {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &GraphConfig) -> Self {
        Self::new(config.allowed_relations.iter().cloned())
    }

    pub fn permits(&self, relation: &str) -> bool {
        RELATION_RE.is_match(relation)
            && (self.allowed.is_empty() || self.allowed.contains(relation))
    }
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

/// Counters reported after an upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub nodes: usize,
    pub questions: usize,
    pub relationships: usize,
    pub skipped_nodes: usize,
    pub skipped_relations: usize,
}

/// Materialize `tree` into `store`, parents before children.
#[instrument(skip_all, fields(root = ?tree.root.id))]
pub async fn upload(
    store: &dyn GraphStore,
    tree: &ConceptTree,
    policy: &RelationPolicy,
) -> Result<UploadStats> {
    let mut stats = UploadStats::default();
    let mut stack: Vec<(&ConceptNode, Option<&str>)> = vec![(&tree.root, None)];

    while let Some((node, parent_id)) = stack.pop() {
        let Some(id) = node.id_str() else {
            // The subtree has no anchor to attach to.
            warn!(parent = ?parent_id, "skipping node without id");
            stats.skipped_nodes += 1;
            continue;
        };

        write_node(store, node, id, parent_id, policy, &mut stats).await?;

        for child in node.children.iter().rev() {
            stack.push((child, Some(id)));
        }
    }

    info!(
        nodes = stats.nodes,
        questions = stats.questions,
        relationships = stats.relationships,
        skipped_nodes = stats.skipped_nodes,
        skipped_relations = stats.skipped_relations,
        "graph upload complete"
    );
    Ok(stats)
}

async fn write_node(
    store: &dyn GraphStore,
    node: &ConceptNode,
    id: &str,
    parent_id: Option<&str>,
    policy: &RelationPolicy,
    stats: &mut UploadStats,
) -> Result<()> {
    let graph_node = GraphNode {
        id: id.to_string(),
        label: node.kind.label(),
        properties: flatten_properties(&node.properties),
    };
    store
        .upsert_node(&graph_node)
        .await
        .map_err(|e| as_write_error(id, e))?;
    stats.nodes += 1;
    debug!(id, label = %graph_node.label, "upserted node");

    if node.kind == NodeKind::Assessment {
        for (idx, prompt) in node.question_prompts.iter().enumerate() {
            let question = GraphNode {
                id: format!("{id}-Q{}", idx + 1),
                label: NodeLabel::Question,
                properties: question_properties(prompt),
            };
            store
                .upsert_node(&question)
                .await
                .map_err(|e| as_write_error(&question.id, e))?;
            relate(store, id, GraphRelationship::new(id, HAS_QUESTION, &question.id), stats)
                .await?;
            stats.questions += 1;
        }
    }

    if let Some(parent) = parent_id {
        relate(store, id, GraphRelationship::new(parent, HAS_CHILD, id), stats).await?;
    }

    for conn in &node.connections {
        if !policy.permits(&conn.relation) {
            warn!(from = id, to = %conn.to, relation = %conn.relation, "skipping disallowed relation");
            stats.skipped_relations += 1;
            continue;
        }
        relate(
            store,
            id,
            GraphRelationship::new(id, conn.relation.as_str(), conn.to.as_str()),
            stats,
        )
        .await?;
    }

    Ok(())
}

async fn relate(
    store: &dyn GraphStore,
    node_id: &str,
    rel: GraphRelationship,
    stats: &mut UploadStats,
) -> Result<()> {
    store
        .merge_relationship(&rel)
        .await
        .map_err(|e| as_write_error(node_id, e))?;
    stats.relationships += 1;
    Ok(())
}

/// `text` comes from the prompt's `question` field, or the prompt itself
/// when it is plain text.
fn question_properties(prompt: &Value) -> Map<String, Value> {
    let text = match prompt {
        Value::Object(obj) => match obj.get("question") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        },
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut props = Map::new();
    props.insert("text".into(), Value::String(text));
    props
}

fn as_write_error(node_id: &str, err: ConceptGraphError) -> ConceptGraphError {
    match err {
        ConceptGraphError::GraphWrite { .. } => err,
        other => ConceptGraphError::graph_write(node_id, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingStore {
        nodes: Mutex<Vec<GraphNode>>,
        rels: Mutex<Vec<GraphRelationship>>,
        fail_on_upsert: Option<usize>,
        upserts: AtomicUsize,
    }

    #[async_trait]
    impl GraphStore for RecordingStore {
        async fn upsert_node(&self, node: &GraphNode) -> Result<()> {
            let n = self.upserts.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_upsert == Some(n) {
                return Err(ConceptGraphError::Storage("disk full".into()));
            }
            self.nodes.lock().unwrap().push(node.clone());
            Ok(())
        }

        async fn merge_relationship(&self, rel: &GraphRelationship) -> Result<()> {
            self.rels.lock().unwrap().push(rel.clone());
            Ok(())
        }
    }

    fn sample_tree() -> ConceptTree {
        ConceptTree::from_value(json!({
            "id": "C1",
            "name": "Lockout/Tagout",
            "meta": {"difficulty": "basic"},
            "connections": [
                {"to": "C9", "relation": "PREREQUISITE_FOR"},
                {"to": "C2", "relation": "DROP TABLE"}
            ],
            "children": [
                {"id": "P1", "children": [{"id": "P1-step1"}]},
                {"id": "A1", "question_prompts": [{"question": "Name two energy sources."}, "Why tag?"]},
                {"name": "orphan", "children": [{"id": "C-lost"}]}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn writes_nodes_edges_and_questions() {
        let store = RecordingStore::default();
        let stats = upload(&store, &sample_tree(), &RelationPolicy::default())
            .await
            .unwrap();

        let nodes = store.nodes.lock().unwrap();
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        // Pre-order, questions right after their assessment
        assert_eq!(ids, vec!["C1", "P1", "P1-step1", "A1", "A1-Q1", "A1-Q2"]);
        assert_eq!(nodes[0].label, NodeLabel::Concept);
        assert_eq!(nodes[0].properties["meta_difficulty"], "basic");
        assert_eq!(nodes[1].label, NodeLabel::Procedure);
        assert_eq!(nodes[3].label, NodeLabel::Assessment);
        assert_eq!(nodes[4].label, NodeLabel::Question);
        assert_eq!(nodes[4].properties["text"], "Name two energy sources.");
        assert_eq!(nodes[5].properties["text"], "Why tag?");

        let rels = store.rels.lock().unwrap();
        assert!(rels.contains(&GraphRelationship::new("C1", "PREREQUISITE_FOR", "C9")));
        assert!(rels.contains(&GraphRelationship::new("C1", HAS_CHILD, "P1")));
        assert!(rels.contains(&GraphRelationship::new("P1", HAS_CHILD, "P1-step1")));
        assert!(rels.contains(&GraphRelationship::new("A1", HAS_QUESTION, "A1-Q2")));
        assert!(!rels.iter().any(|r| r.rel_type == "DROP TABLE"));

        assert_eq!(stats.nodes, 4);
        assert_eq!(stats.questions, 2);
        assert_eq!(stats.skipped_nodes, 1);
        assert_eq!(stats.skipped_relations, 1);
    }

    #[tokio::test]
    async fn allow_list_restricts_relations() {
        let store = RecordingStore::default();
        let policy = RelationPolicy::new(["DEPENDS_ON"]);
        let stats = upload(&store, &sample_tree(), &policy).await.unwrap();
        assert_eq!(stats.skipped_relations, 2);
        assert!(
            !store
                .rels
                .lock()
                .unwrap()
                .iter()
                .any(|r| r.rel_type == "PREREQUISITE_FOR")
        );
    }

    #[tokio::test]
    async fn first_failure_aborts_without_rollback() {
        let store = RecordingStore {
            fail_on_upsert: Some(2),
            ..RecordingStore::default()
        };
        let err = upload(&store, &sample_tree(), &RelationPolicy::default())
            .await
            .unwrap_err();
        match err {
            ConceptGraphError::GraphWrite { node_id, message } => {
                assert_eq!(node_id, "P1-step1");
                assert!(message.contains("disk full"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.nodes.lock().unwrap().len(), 2);
    }

    #[test]
    fn relation_names_must_be_identifiers() {
        let open = RelationPolicy::default();
        assert!(open.permits("PREREQUISITE_FOR"));
        assert!(open.permits("_x1"));
        assert!(!open.permits("1ABC"));
        assert!(!open.permits("A-B"));
        assert!(!open.permits("A]->(b) DETACH DELETE b //"));
        assert!(!open.permits(""));
    }

    #[tokio::test]
    async fn rerun_is_idempotent_on_storage() {
        let tmp = std::env::temp_dir().join(format!("cg_graph_{}.db", uuid::Uuid::now_v7()));
        let storage = Storage::open(&tmp).await.unwrap();
        let tree = sample_tree();
        let policy = RelationPolicy::default();

        upload(&storage, &tree, &policy).await.unwrap();
        let nodes = storage.count_graph_nodes().await.unwrap();
        let children = storage.count_relationships(Some(HAS_CHILD)).await.unwrap();
        let all = storage.count_relationships(None).await.unwrap();

        upload(&storage, &tree, &policy).await.unwrap();
        assert_eq!(storage.count_graph_nodes().await.unwrap(), nodes);
        assert_eq!(storage.count_relationships(Some(HAS_CHILD)).await.unwrap(), children);
        assert_eq!(storage.count_relationships(None).await.unwrap(), all);
        assert_eq!(children, 3);

        // Connection target written by id even though no C9 node exists
        let out = storage.relationships_from("C1").await.unwrap();
        assert!(out.iter().any(|r| r.to == "C9" && r.rel_type == "PREREQUISITE_FOR"));
    }
}
