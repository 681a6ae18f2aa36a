pub mod annotate;
pub mod catalog;
pub mod credential;
pub mod watch;

use anyhow::{Context as AnyhowContext, Result};
use overlay_reconciler::DocumentTree;
use std::fs;
use std::path::Path;

pub(crate) fn load_document(path: &Path) -> Result<DocumentTree> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read document {}", path.display()))?;
    DocumentTree::from_json(&raw)
        .with_context(|| format!("Failed to parse document {}", path.display()))
}

/// Writes the tree through a temp file so readers never see a partial document.
pub(crate) fn write_document(path: &Path, tree: &DocumentTree) -> Result<()> {
    let json = tree.to_json_pretty().context("Failed to serialize document")?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
