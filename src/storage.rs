//! Durable-swap file writes shared by the progress and checkpoint stores.
//!
//! Every persisted document is written to a temporary sibling file and
//! then renamed over the target. Rename is atomic on the same
//! filesystem, so an external reader observes either the previous
//! document or the complete new one, never a torn write. This is the
//! contract that lets a monitor process poll the same files without any
//! coordination with the writer.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tokio::fs;

/// Serialize `value` as pretty-printed JSON and atomically swap it into
/// place at `path`, creating parent directories as needed.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let contents = serde_json::to_string_pretty(value).context("Failed to serialize document")?;

    // Unique temp name so two writers racing on the same target never
    // collide on the intermediate file.
    let tmp = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp, contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("Failed to swap {} into place", path.display()));
    }
    Ok(())
}

/// Read and deserialize a JSON document, or `None` when the file does
/// not exist. Other IO or parse failures are real errors.
pub async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(contents) => {
            let value = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}
