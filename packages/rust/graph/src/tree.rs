//! In-memory concept tree decoded from generated JSON.

use conceptgraph_shared::{ConceptGraphError, NodeLabel, Result};
use serde_json::{Map, Value};
use tracing::warn;

/// Keys with structural meaning; everything else on a node is a property.
pub const STRUCTURAL_KEYS: &[&str] = &["id", "children", "connections", "question_prompts"];

/// Semantic kind of a node, fixed once from its id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Concept,
    Procedure,
    Assessment,
}

impl NodeKind {
    /// `P*` is a procedure, `A*` an assessment, anything else a concept.
    pub fn from_id(id: &str) -> Self {
        if id.starts_with('P') {
            Self::Procedure
        } else if id.starts_with('A') {
            Self::Assessment
        } else {
            Self::Concept
        }
    }

    pub fn label(&self) -> NodeLabel {
        match self {
            Self::Concept => NodeLabel::Concept,
            Self::Procedure => NodeLabel::Procedure,
            Self::Assessment => NodeLabel::Assessment,
        }
    }
}

/// A typed link to another node by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub to: String,
    pub relation: String,
}

/// One node of the generated hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptNode {
    /// Missing ids are tolerated in the tree but never written to the graph.
    pub id: Option<String>,
    pub kind: NodeKind,
    pub properties: Map<String, Value>,
    pub children: Vec<ConceptNode>,
    pub connections: Vec<Connection>,
    pub question_prompts: Vec<Value>,
}

impl ConceptNode {
    pub fn with_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            kind: NodeKind::from_id(&id),
            id: Some(id),
            properties: Map::new(),
            children: Vec::new(),
            connections: Vec::new(),
            question_prompts: Vec::new(),
        }
    }

    pub fn id_str(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Whether this node is a procedural step (`-step` in its id).
    pub fn is_step(&self) -> bool {
        self.id_str().is_some_and(|id| id.contains("-step"))
    }

    fn from_map(mut map: Map<String, Value>) -> Self {
        let id = match map.remove("id") {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let kind = id.as_deref().map_or(NodeKind::Concept, NodeKind::from_id);

        let children = match map.remove("children") {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(child) => Some(Self::from_map(child)),
                    other => {
                        warn!(parent = ?id, value = %other, "dropping non-object child");
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        };

        let connections = match map.remove("connections") {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| {
                    let conn = parse_connection(&item);
                    if conn.is_none() {
                        warn!(node = ?id, value = %item, "dropping malformed connection");
                    }
                    conn
                })
                .collect(),
            _ => Vec::new(),
        };

        let question_prompts = match map.remove("question_prompts") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(single) => vec![single],
        };

        Self {
            id,
            kind,
            properties: map,
            children,
            connections,
            question_prompts,
        }
    }

    /// Serialize back to the JSON shape of the generated tree.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(id) = &self.id {
            map.insert("id".into(), Value::String(id.clone()));
        }
        for (k, v) in &self.properties {
            map.insert(k.clone(), v.clone());
        }
        map.insert(
            "children".into(),
            Value::Array(self.children.iter().map(Self::to_value).collect()),
        );
        if !self.connections.is_empty() {
            let conns = self
                .connections
                .iter()
                .map(|c| {
                    let mut m = Map::new();
                    m.insert("to".into(), Value::String(c.to.clone()));
                    m.insert("relation".into(), Value::String(c.relation.clone()));
                    Value::Object(m)
                })
                .collect();
            map.insert("connections".into(), Value::Array(conns));
        }
        if !self.question_prompts.is_empty() {
            map.insert(
                "question_prompts".into(),
                Value::Array(self.question_prompts.clone()),
            );
        }
        Value::Object(map)
    }
}

fn parse_connection(value: &Value) -> Option<Connection> {
    let obj = value.as_object()?;
    let to = match obj.get("to")? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let relation = obj.get("relation")?.as_str()?.to_string();
    Some(Connection { to, relation })
}

/// The full generated hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptTree {
    pub root: ConceptNode,
}

impl ConceptTree {
    pub fn new(root: ConceptNode) -> Self {
        Self { root }
    }

    /// Decode a generated document. The root must be a JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::new(ConceptNode::from_map(map))),
            other => Err(ConceptGraphError::InvalidGeneratedOutput(format!(
                "expected a JSON object at the root, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        self.root.to_value()
    }

    /// Total number of nodes, root included.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
