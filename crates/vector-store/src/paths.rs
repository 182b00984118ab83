use crate::error::{Result, VectorStoreError};
use std::path::{Path, PathBuf};

pub const DEFAULT_DATA_DIR_NAME: &str = "vector_store";

pub const VECTORS_FILE_NAME: &str = "vectors.bin";
pub const METADATA_FILE_NAME: &str = "metadata.json";
pub const REMOTE_KEYS_FILE_NAME: &str = "remote_keys.json";

#[must_use]
pub fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR_NAME)
}

#[must_use]
pub fn vectors_path(data_dir: &Path) -> PathBuf {
    data_dir.join(VECTORS_FILE_NAME)
}

#[must_use]
pub fn metadata_path(data_dir: &Path) -> PathBuf {
    data_dir.join(METADATA_FILE_NAME)
}

#[must_use]
pub fn remote_keys_path(data_dir: &Path) -> PathBuf {
    data_dir.join(REMOTE_KEYS_FILE_NAME)
}

/// Sibling file an artifact is written to before it replaces `path`.
#[must_use]
pub fn staged_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` next to `path` without touching `path` itself.
pub(crate) async fn stage_bytes(path: &Path, bytes: Vec<u8>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| VectorStoreError::persistence("create", parent, e))?;
    }
    let staged = staged_path(path);
    tokio::fs::write(&staged, bytes)
        .await
        .map_err(|e| VectorStoreError::persistence("write", &staged, e))
}

/// Replace `path` with the file staged by [`stage_bytes`].
pub(crate) async fn commit_staged(path: &Path) -> Result<()> {
    tokio::fs::rename(staged_path(path), path)
        .await
        .map_err(|e| VectorStoreError::persistence("rename", path, e))
}
