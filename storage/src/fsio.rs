use std::path::Path;
use tokio::fs;

use crate::backend::BackendError;

/// Writes `bytes` to a temp file beside `path` then renames into place, so a
/// reader never observes a partial file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, bytes).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Reads a persisted state file, refusing anything that is not a JSON object.
/// Binary serialization formats are never accepted.
pub(crate) async fn read_strict_json(path: &Path) -> Result<Vec<u8>, BackendError> {
    let bytes = fs::read(path).await?;
    let first = bytes
        .iter()
        .find(|byte| !byte.is_ascii_whitespace())
        .copied();
    if first != Some(b'{') {
        return Err(BackendError::Corrupt(format!(
            "{} is not a JSON object",
            path.display()
        )));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        write_atomic(&path, b"{}").await.unwrap();

        assert_eq!(fs::read(&path).await.unwrap(), b"{}");
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn strict_json_rejects_binary_payloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, [0x80u8, 0x04, 0x95]).await.unwrap();

        let result = read_strict_json(&path).await;
        assert!(matches!(result, Err(BackendError::Corrupt(_))));
    }

    #[tokio::test]
    async fn strict_json_accepts_objects() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"  {\"version\":1}").await.unwrap();

        assert!(read_strict_json(&path).await.is_ok());
    }
}
