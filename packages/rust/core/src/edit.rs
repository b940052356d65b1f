//! Browsing and editing the materialized graph.

use serde_json::{Map, Value, json};
use tracing::{info, instrument};

use conceptgraph_graph::{flatten_properties, rewrite_source_property};
use conceptgraph_shared::{GraphNode, Result};
use conceptgraph_storage::Storage;

/// Id of the synthetic container returned by [`root_view`].
pub const ROOT_ID: &str = "root";

/// Keys an edit may never set.
const PROTECTED_KEYS: &[&str] = &["id", "children"];

/// Merge `props` into node `id`. Returns `false` when no such node exists;
/// nothing is created in that case.
///
/// `source` attributions are rewritten the same way as at ingestion and
/// nested values are flattened. A `null` value removes the key.
#[instrument(skip(storage, props))]
pub async fn update_node(
    storage: &Storage,
    id: &str,
    mut props: Map<String, Value>,
    static_url: &str,
) -> Result<bool> {
    for key in PROTECTED_KEYS {
        props.remove(*key);
    }
    rewrite_source_property(&mut props, static_url);
    let flat = flatten_properties(&props);

    let updated = storage.update_node_properties(id, &flat).await?;
    info!(updated, keys = flat.len(), "node edit applied");
    Ok(updated)
}

/// Top-level concepts under a synthetic `Central node` container.
pub async fn root_view(storage: &Storage) -> Result<Value> {
    let children: Vec<Value> = storage
        .root_concepts()
        .await?
        .iter()
        .map(node_json)
        .collect();
    Ok(json!({
        "id": ROOT_ID,
        "name": "Central node",
        "children": children,
    }))
}

/// Immediate children of `id`, or of the container when `id` is [`ROOT_ID`].
pub async fn children_view(storage: &Storage, id: &str) -> Result<Vec<Value>> {
    let nodes = if id == ROOT_ID {
        storage.root_concepts().await?
    } else {
        storage.children_of(id).await?
    };
    Ok(nodes.iter().map(node_json).collect())
}

/// Node properties plus `id` and the graph label as `node_label`.
///
/// Stored properties are never replaced by the graph label.
pub fn node_json(node: &GraphNode) -> Value {
    let mut obj = node.properties.clone();
    obj.insert("id".into(), Value::String(node.id.clone()));
    obj.entry("node_label")
        .or_insert_with(|| Value::String(node.label.as_str().into()));
    Value::Object(obj)
}
