//! Reading and writing artifacts under the target directory.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Write `bytes` to `path` through a temp file and a rename.
///
/// The temp file name carries the PID so concurrent processes never share
/// one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CoreError::FileRead {
            path: parent.display().to_string(),
            message: e.to_string(),
        })?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!("{}.{}.tmp", file_name, std::process::id()));
    std::fs::write(&temp_path, bytes).map_err(|e| CoreError::Artifact {
        path: temp_path.display().to_string(),
        message: e.to_string(),
    })?;
    std::fs::rename(&temp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        CoreError::Artifact {
            path: path.display().to_string(),
            message: e.to_string(),
        }
    })
}

/// Serialize as pretty JSON and write atomically
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| CoreError::Artifact {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    write_atomic(path, json.as_bytes())
}

/// Read a JSON artifact; `None` when the file does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> CoreResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| CoreError::FileRead {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| CoreError::Artifact {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}
