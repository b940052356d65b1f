//! Hierarchy repair for procedural step chains.
//!
//! After repair, every level of the tree holds at most one `-step` node and
//! it is that level's last child. The remaining steps of the level hang
//! below it as a chain ordered by step number (`X-step1 -> X-step2 -> ...`).
//! Steps whose suffix is not a number sort after every numbered step.

use std::cmp::Ordering;
use std::time::Duration;

use conceptgraph_shared::{ConceptGraphError, Result};
use tracing::{debug, warn};

use crate::tree::{ConceptNode, ConceptTree};

/// Deepest nesting the repair pass accepts.
pub const MAX_DEPTH: usize = 512;

/// Repair a tree. Idempotent: `repair(repair(t)) == repair(t)`.
pub fn repair(mut tree: ConceptTree) -> Result<ConceptTree> {
    repair_node(&mut tree.root, 0)?;
    // Chaining moves whole subtrees deeper than where they were repaired.
    check_height(&tree.root, 0)?;
    Ok(tree)
}

/// Run [`repair`] up to `attempts` times, each on a fresh copy of `tree`,
/// sleeping `delay` between failures.
pub async fn repair_with_retry(
    tree: &ConceptTree,
    attempts: u32,
    delay: Duration,
) -> Result<ConceptTree> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match repair(tree.clone()) {
            Ok(repaired) => return Ok(repaired),
            Err(e) if attempt < attempts => {
                warn!(attempt, attempts, error = %e, "hierarchy repair failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn check_depth(depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(ConceptGraphError::Repair(format!(
            "tree nesting exceeds {MAX_DEPTH} levels"
        )));
    }
    Ok(())
}

fn check_height(node: &ConceptNode, depth: usize) -> Result<()> {
    check_depth(depth)?;
    node.children
        .iter()
        .try_for_each(|child| check_height(child, depth + 1))
}

/// Children first, then this level.
fn repair_node(node: &mut ConceptNode, depth: usize) -> Result<()> {
    check_depth(depth)?;
    for child in &mut node.children {
        repair_node(child, depth + 1)?;
    }
    normalize_level(node, depth)
}

/// Collapse the step children of `node` into one chain placed last.
fn normalize_level(node: &mut ConceptNode, depth: usize) -> Result<()> {
    check_depth(depth)?;

    let (mut steps, others): (Vec<_>, Vec<_>) = std::mem::take(&mut node.children)
        .into_iter()
        .partition(ConceptNode::is_step);

    if steps.is_empty() {
        node.children = others;
        return Ok(());
    }

    // Stable: equal numbers keep their sibling order.
    steps.sort_by(compare_steps);

    let mut deduped: Vec<ConceptNode> = Vec::with_capacity(steps.len());
    for step in steps {
        match deduped.last_mut() {
            Some(prev) if prev.id == step.id => {
                debug!(id = ?step.id, "merging duplicate step");
                absorb(prev, step, depth + 1)?;
            }
            _ => deduped.push(step),
        }
    }

    // Build the chain back to front: each step receives its successor.
    // Step `i` of the chain ends up at `depth + 1 + i`.
    let mut chain: Option<ConceptNode> = None;
    for (i, mut step) in deduped.into_iter().enumerate().rev() {
        if let Some(next) = chain.take() {
            attach(&mut step, next, depth + 1 + i)?;
        }
        chain = Some(step);
    }

    node.children = others;
    node.children.extend(chain);
    Ok(())
}

/// Append `next` under `parent`, or fold it into an existing child with the
/// same id so nothing further down the chain is dropped.
fn attach(parent: &mut ConceptNode, next: ConceptNode, depth: usize) -> Result<()> {
    match parent.children.iter_mut().find(|c| c.id == next.id) {
        Some(existing) => absorb(existing, next, depth + 1)?,
        None => parent.children.push(next),
    }
    normalize_level(parent, depth)
}

/// Merge `incoming` into `target`: children appended, missing properties,
/// connections and prompts filled in.
fn absorb(target: &mut ConceptNode, incoming: ConceptNode, depth: usize) -> Result<()> {
    check_depth(depth)?;
    for (k, v) in incoming.properties {
        target.properties.entry(k).or_insert(v);
    }
    for conn in incoming.connections {
        if !target.connections.contains(&conn) {
            target.connections.push(conn);
        }
    }
    if target.question_prompts.is_empty() {
        target.question_prompts = incoming.question_prompts;
    }
    target.children.extend(incoming.children);
    normalize_level(target, depth)
}

/// Number after the last `-step`, if it parses.
fn step_number(node: &ConceptNode) -> Option<u64> {
    node.id_str()
        .and_then(|id| id.rsplit_once("-step"))
        .and_then(|(_, n)| n.trim().parse().ok())
}

fn compare_steps(a: &ConceptNode, b: &ConceptNode) -> Ordering {
    match (step_number(a), step_number(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(value: serde_json::Value) -> ConceptTree {
        ConceptTree::from_value(value).unwrap()
    }

    fn ids(node: &ConceptNode) -> Vec<&str> {
        node.children.iter().filter_map(|c| c.id_str()).collect()
    }

    /// Follow the single step child at each level.
    fn chain(node: &ConceptNode) -> Vec<String> {
        let mut out = Vec::new();
        let mut cur = node.children.iter().find(|c| c.is_step());
        while let Some(step) = cur {
            out.push(step.id.clone().unwrap_or_default());
            cur = step.children.iter().find(|c| c.is_step());
        }
        out
    }

    fn assert_invariant(node: &ConceptNode) {
        let steps: Vec<usize> = node
            .children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_step())
            .map(|(i, _)| i)
            .collect();
        assert!(steps.len() <= 1, "more than one step under {:?}", node.id);
        if let Some(&i) = steps.first() {
            assert_eq!(i, node.children.len() - 1, "step not last under {:?}", node.id);
        }
        node.children.iter().for_each(assert_invariant);
    }

    #[test]
    fn unordered_siblings_become_chain() {
        let t = tree(json!({
            "id": "P1",
            "children": [
                {"id": "P1-step3"},
                {"id": "P1-step1"},
                {"id": "C9"},
                {"id": "P1-step2"}
            ]
        }));
        let fixed = repair(t).unwrap();
        assert_eq!(ids(&fixed.root), vec!["C9", "P1-step1"]);
        assert_eq!(chain(&fixed.root), vec!["P1-step1", "P1-step2", "P1-step3"]);
        assert_invariant(&fixed.root);
    }

    #[test]
    fn repair_is_idempotent() {
        let t = tree(json!({
            "id": "root",
            "children": [
                {"id": "P1", "children": [
                    {"id": "P1-step2", "children": [{"id": "P1-step4"}]},
                    {"id": "P1-step1", "children": [{"id": "P1-step2", "note": "dup"}]},
                    {"id": "P1-stepX"},
                    {"id": "P1-step10"}
                ]},
                {"id": "A1-step1"},
                {"id": "C1"}
            ]
        }));
        let once = repair(t).unwrap();
        let twice = repair(once.clone()).unwrap();
        assert_eq!(once, twice);
        assert_invariant(&once.root);
    }

    #[test]
    fn numeric_not_lexicographic_order() {
        let t = tree(json!({
            "id": "P2",
            "children": [{"id": "P2-step10"}, {"id": "P2-step9"}, {"id": "P2-step1"}]
        }));
        let fixed = repair(t).unwrap();
        assert_eq!(chain(&fixed.root), vec!["P2-step1", "P2-step9", "P2-step10"]);
    }

    #[test]
    fn malformed_suffix_goes_last() {
        let t = tree(json!({
            "id": "P3",
            "children": [{"id": "P3-stepfinal"}, {"id": "P3-step2"}, {"id": "P3-step1"}]
        }));
        let fixed = repair(t).unwrap();
        assert_eq!(chain(&fixed.root), vec!["P3-step1", "P3-step2", "P3-stepfinal"]);
    }

    #[test]
    fn duplicate_steps_are_merged() {
        let t = tree(json!({
            "id": "P4",
            "children": [
                {"id": "P4-step1", "title": "Isolate"},
                {"id": "P4-step2"},
                {"id": "P4-step1", "hint": "Lock", "children": [{"id": "C5"}]}
            ]
        }));
        let fixed = repair(t).unwrap();
        assert_eq!(chain(&fixed.root), vec!["P4-step1", "P4-step2"]);

        let step1 = &fixed.root.children[0];
        assert_eq!(step1.properties.get("title"), Some(&json!("Isolate")));
        assert_eq!(step1.properties.get("hint"), Some(&json!("Lock")));
        assert_eq!(ids(step1), vec!["C5", "P4-step2"]);
    }

    #[test]
    fn existing_child_absorbs_incoming_children() {
        // step1 already holds a step2 stub; the sibling step2 carries step3.
        let t = tree(json!({
            "id": "P5",
            "children": [
                {"id": "P5-step1", "children": [{"id": "P5-step2"}]},
                {"id": "P5-step2", "children": [{"id": "P5-step3"}]}
            ]
        }));
        let fixed = repair(t).unwrap();
        assert_eq!(chain(&fixed.root), vec!["P5-step1", "P5-step2", "P5-step3"]);
        assert_invariant(&fixed.root);
    }

    #[test]
    fn levels_without_steps_unchanged() {
        let input = json!({"id": "C1", "children": [{"id": "C3"}, {"id": "C2"}]});
        let fixed = repair(tree(input.clone())).unwrap();
        assert_eq!(fixed.to_value(), input);
    }

    #[test]
    fn depth_bound_is_a_repair_error() {
        let mut node = ConceptNode::with_id("C-leaf");
        for i in 0..(MAX_DEPTH + 2) {
            let mut parent = ConceptNode::with_id(format!("C{i}"));
            parent.children.push(node);
            node = parent;
        }
        let err = repair(ConceptTree::new(node)).unwrap_err();
        assert!(matches!(err, ConceptGraphError::Repair(_)));
    }

    fn flat_steps(count: usize) -> ConceptTree {
        let mut root = ConceptNode::with_id("P9");
        for n in (1..=count).rev() {
            root.children.push(ConceptNode::with_id(format!("P9-step{n}")));
        }
        ConceptTree::new(root)
    }

    #[test]
    fn long_chain_within_bound_is_stable() {
        let once = repair(flat_steps(MAX_DEPTH - 4)).unwrap();
        assert_eq!(chain(&once.root).len(), MAX_DEPTH - 4);
        let twice = repair(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn chain_deeper_than_bound_fails_on_first_pass() {
        let err = repair(flat_steps(MAX_DEPTH + 8)).unwrap_err();
        assert!(matches!(err, ConceptGraphError::Repair(_)));
    }

    #[test]
    fn subtree_pushed_past_bound_by_chaining_fails() {
        // Each piece is shallow on its own; the last step lands near the
        // bound once chained and its branch goes past it.
        let mut branch = ConceptNode::with_id("C-leaf");
        for i in 0..16 {
            let mut parent = ConceptNode::with_id(format!("C{i}"));
            parent.children.push(branch);
            branch = parent;
        }
        let mut tree = flat_steps(MAX_DEPTH - 4);
        tree.root.children[0].children.push(branch);

        let err = repair(tree).unwrap_err();
        assert!(matches!(err, ConceptGraphError::Repair(_)));
    }

    #[tokio::test]
    async fn retry_gives_up_after_attempts() {
        let mut node = ConceptNode::with_id("C-leaf");
        for i in 0..(MAX_DEPTH + 2) {
            let mut parent = ConceptNode::with_id(format!("C{i}"));
            parent.children.push(node);
            node = parent;
        }
        let deep = ConceptTree::new(node);
        let err = repair_with_retry(&deep, 3, Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ConceptGraphError::Repair(_)));

        let ok = repair_with_retry(&tree(json!({"id": "C1"})), 3, Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(ok.root.id_str(), Some("C1"));
    }
}
