//! Content-addressed copies of repaired concept trees.

use std::path::{Path, PathBuf};

use conceptgraph_shared::{ConceptGraphError, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Pretty-print `tree` and write it to `<dir>/<sha256>.json`.
///
/// Identical trees land on the same file.
pub async fn write_tree_artifact(dir: &Path, tree: &Value) -> Result<PathBuf> {
    let body = serde_json::to_string_pretty(tree)
        .map_err(|e| ConceptGraphError::validation(format!("serialize tree: {e}")))?;

    let digest = {
        let mut hasher = Sha256::new();
        hasher.update(body.as_bytes());
        format!("{:x}", hasher.finalize())
    };

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ConceptGraphError::io(dir, e))?;

    let path = dir.join(format!("{digest}.json"));
    tokio::fs::write(&path, body)
        .await
        .map_err(|e| ConceptGraphError::io(&path, e))?;

    debug!(path = %path.display(), "wrote tree artifact");
    Ok(path)
}
