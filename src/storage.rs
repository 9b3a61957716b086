//! File storage collaborator used by [`crate::function::convert_document`].
//!
//! Requests reference their input by id and expect the result uploaded back
//! to the same store. [`DirectoryStore`] keeps files flat in one directory.

use crate::error::DocsconvError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Metadata of a file held by a [`FileStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub size: u64,
}

/// Where request inputs come from and converted outputs go.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Copy the file `id` to `dest`, returning its size.
    async fn download_to(&self, id: &str, dest: &Path) -> Result<u64, DocsconvError>;

    /// Store the contents of `source` under `name`.
    async fn upload(
        &self,
        name: &str,
        source: &Path,
        content_type: &str,
    ) -> Result<StoredFile, DocsconvError>;
}

/// A [`FileStore`] backed by a local directory. File ids are file names.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Use `root`, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, DocsconvError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| DocsconvError::Storage {
            id: root.display().to_string(),
            detail: e.to_string(),
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, DocsconvError> {
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\'])
            && !id.starts_with('.');
        if !valid {
            return Err(DocsconvError::Storage {
                id: id.to_string(),
                detail: "invalid file id".into(),
            });
        }
        Ok(self.root.join(id))
    }
}

#[async_trait]
impl FileStore for DirectoryStore {
    async fn download_to(&self, id: &str, dest: &Path) -> Result<u64, DocsconvError> {
        let src = self.path_for(id)?;
        tokio::fs::copy(&src, dest)
            .await
            .map_err(|e| DocsconvError::Storage {
                id: id.to_string(),
                detail: e.to_string(),
            })
    }

    async fn upload(
        &self,
        name: &str,
        source: &Path,
        content_type: &str,
    ) -> Result<StoredFile, DocsconvError> {
        let name = name.rsplit(['/', '\\']).next().unwrap_or_default().to_string();
        let storage_err = |detail: String| DocsconvError::Storage {
            id: name.clone(),
            detail,
        };

        let bytes = tokio::fs::read(source)
            .await
            .map_err(|e| storage_err(format!("read {}: {e}", source.display())))?;

        // Unique id in the store; written under a temp name, then renamed into place.
        let root = self.root.clone();
        let suffix = format!("-{name}");
        let stored = tokio::task::spawn_blocking(move || -> std::io::Result<PathBuf> {
            let mut tmp = tempfile::Builder::new()
                .prefix("f")
                .suffix(&suffix)
                .rand_bytes(12)
                .tempfile_in(&root)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            let (_, path) = tmp.keep().map_err(|e| e.error)?;
            Ok(path)
        })
        .await
        .map_err(|e| storage_err(e.to_string()))?
        .map_err(|e| storage_err(e.to_string()))?;

        let size = tokio::fs::metadata(&stored)
            .await
            .map(|m| m.len())
            .map_err(|e| storage_err(e.to_string()))?;
        let id = stored
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| storage_err("non UTF-8 file name".into()))?
            .to_string();

        Ok(StoredFile {
            id,
            name,
            content_type: content_type.to_string(),
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_download() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path().join("store")).unwrap();

        let src = dir.path().join("memo.pdf");
        std::fs::write(&src, b"%PDF-1.4 data").unwrap();
        let stored = store.upload("memo.pdf", &src, "application/pdf").await.unwrap();
        assert_eq!(stored.name, "memo.pdf");
        assert_eq!(stored.size, 13);
        assert!(stored.id.ends_with("-memo.pdf"), "got: {}", stored.id);

        let dest = dir.path().join("copy.pdf");
        let n = store.download_to(&stored.id, &dest).await.unwrap();
        assert_eq!(n, 13);
        assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-1.4 data");
    }

    #[tokio::test]
    async fn uploads_with_same_name_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"x").unwrap();
        let a = store.upload("a.txt", &src, "text/plain").await.unwrap();
        let b = store.upload("a.txt", &src, "text/plain").await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn ids_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path().join("store")).unwrap();
        let dest = dir.path().join("out");
        for id in ["../secret", "", "..", "a/b", ".hidden"] {
            assert!(
                matches!(
                    store.download_to(id, &dest).await,
                    Err(DocsconvError::Storage { .. })
                ),
                "id {id:?} accepted"
            );
        }
    }

    #[test]
    fn stored_file_serialises_camel_case() {
        let f = StoredFile {
            id: "f1-a.pdf".into(),
            name: "a.pdf".into(),
            content_type: "application/pdf".into(),
            size: 3,
        };
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["contentType"], "application/pdf");
    }
}
