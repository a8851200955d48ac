//! Code emission sink.

use crate::error::{OrchestratorError, Result};
use crate::registry::Artifact;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Write each artifact's code to its path, creating parent directories.
///
/// Relative paths resolve against `root`. Entries without code are skipped.
/// Returns the paths written, in component-name order.
///
/// # Errors
///
/// Returns an error on the first file that cannot be written.
pub async fn write_artifacts(
    root: impl AsRef<Path>,
    artifacts: &BTreeMap<String, Artifact>,
) -> Result<Vec<PathBuf>> {
    let root = root.as_ref();
    let mut written = Vec::new();

    for (component, artifact) in artifacts {
        let Some(code) = &artifact.code else {
            debug!("Skipping {}: no code", component);
            continue;
        };

        let path = if artifact.path.is_absolute() {
            artifact.path.clone()
        } else {
            root.join(&artifact.path)
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                OrchestratorError::loop_error(format!(
                    "Failed to create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        tokio::fs::write(&path, code).await.map_err(|e| {
            OrchestratorError::loop_error(format!("Failed to write {}: {}", path.display(), e))
        })?;

        debug!("Wrote {} ({} bytes)", path.display(), code.len());
        written.push(path);
    }

    Ok(written)
}
