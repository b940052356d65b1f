//! Rewrites `source` attributions like `doc.pdf [page 5]` into the static
//! asset URL of the uploaded document.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::tree::ConceptNode;

static SOURCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(.+?)\s*\[\s*page\b").expect("valid regex"));

/// Extension used when the attribution names a document without one.
const DEFAULT_EXTENSION: &str = "pdf";

/// Canonical asset URL for a `<name> [page ...]` attribution, or `None`
/// when `source` does not have that shape.
pub fn rewrite_source(source: &str, static_url: &str) -> Option<String> {
    let caps = SOURCE_RE.captures(source)?;
    let name = caps.get(1)?.as_str().trim();
    let file = Path::new(name).file_name()?.to_str()?;
    let path = Path::new(file);

    let stem = path.file_stem()?.to_str()?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or(DEFAULT_EXTENSION);

    Some(format!(
        "{}/uploads/{stem}.{ext}",
        static_url.trim_end_matches('/')
    ))
}

/// Apply [`rewrite_source`] to the `source` key of a property map.
/// Returns whether the value changed.
pub fn rewrite_source_property(props: &mut Map<String, Value>, static_url: &str) -> bool {
    let Some(Value::String(source)) = props.get("source") else {
        return false;
    };
    match rewrite_source(source, static_url) {
        Some(rewritten) => {
            props.insert("source".into(), Value::String(rewritten));
            true
        }
        None => false,
    }
}

/// Rewrite every node's `source` in the tree. Returns the number rewritten.
pub fn rewrite_tree_sources(root: &mut ConceptNode, static_url: &str) -> usize {
    let mut rewritten = 0;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if rewrite_source_property(&mut node.properties, static_url) {
            rewritten += 1;
        }
        stack.extend(node.children.iter_mut());
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ConceptTree;
    use serde_json::json;

    #[test]
    fn rewrites_page_attribution() {
        assert_eq!(
            rewrite_source("doc.pdf [page 5]", "/static/").as_deref(),
            Some("/static/uploads/doc.pdf")
        );
        assert_eq!(
            rewrite_source("CTF_copy [page 9]", "/static").as_deref(),
            Some("/static/uploads/CTF_copy.pdf")
        );
        assert_eq!(
            rewrite_source("decks/Intro Deck.pptx [Page 2-3]", "https://cdn.example.com/assets/").as_deref(),
            Some("https://cdn.example.com/assets/uploads/Intro Deck.pptx")
        );
    }

    #[test]
    fn leaves_other_values_alone() {
        assert_eq!(rewrite_source("/static/uploads/doc.pdf", "/static/"), None);
        assert_eq!(rewrite_source("Instructor notes", "/static/"), None);
        assert_eq!(rewrite_source("[page 1]", "/static/"), None);
    }

    #[test]
    fn rewrites_whole_tree() {
        let mut tree = ConceptTree::from_value(json!({
            "id": "C1",
            "source": "manual.pdf [page 1]",
            "children": [
                {"id": "C2", "source": "manual.pdf [page 4]"},
                {"id": "C3", "source": 7},
                {"id": "C4"}
            ]
        }))
        .unwrap();

        assert_eq!(rewrite_tree_sources(&mut tree.root, "/static/"), 2);
        assert_eq!(tree.root.properties["source"], "/static/uploads/manual.pdf");
        assert_eq!(tree.root.children[0].properties["source"], "/static/uploads/manual.pdf");
        assert_eq!(tree.root.children[1].properties["source"], 7);
    }
}
