// packages/engine/src/utils/fs.rs
//! Small JSON state files written atomically

use crate::utils::errors::{EngineError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Serialize `value` and replace `path` with it (write to a sibling temp file, then rename)
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| EngineError::StorageFailed(format!("Serialization error: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::StorageFailed(format!("Failed to create directory: {}", e))
            })?;
        }
    }

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, &data).await.map_err(|e| {
        EngineError::StorageFailed(format!("Failed to write {:?}: {}", tmp_path, e))
    })?;
    fs::rename(&tmp_path, path).await.map_err(|e| {
        EngineError::StorageFailed(format!("Failed to replace {:?}: {}", path, e))
    })?;

    debug!("Wrote {} bytes to {:?}", data.len(), path);
    Ok(())
}

/// Read a JSON state file; a missing file yields `None`
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(EngineError::StorageFailed(format!(
                "Failed to read {:?}: {}",
                path, e
            )))
        }
    };

    let value = serde_json::from_slice(&data).map_err(|e| {
        EngineError::StorageFailed(format!("Corrupt state file {:?}: {}", path, e))
    })?;
    Ok(Some(value))
}
