//! Local file document backend
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::backend::{DocumentStore, StoredDocument};
use crate::error::{KeyError, KeyResult};
use crate::key_types::VersionToken;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Documents stored as plain files under a root directory
///
/// The version token is the SHA-256 of the file content. Writes compare the
/// token and replace the file under a process-local lock; another process
/// writing the same file between the compare and the rename is not detected.
pub struct FileDocumentStore {
    /// Storage directory
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileDocumentStore {
    /// Create a file backend rooted at `root`, creating the directory if needed
    pub async fn new<P: AsRef<Path>>(root: P) -> KeyResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        info!(root = %root.display(), "Initialized file document store");

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Resolve a document path, refusing anything that escapes the root
    fn document_path(&self, path: &str) -> KeyResult<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.trim().is_empty() || escapes {
            return Err(KeyError::InvalidInput(format!(
                "document path '{}' must be relative to the store root",
                path
            )));
        }
        Ok(self.root.join(relative))
    }

    fn content_version(content: &str) -> VersionToken {
        VersionToken::Revision(hex::encode(Sha256::digest(content.as_bytes())))
    }

    async fn read_file(&self, file: &Path) -> KeyResult<Option<String>> {
        match fs::read(file).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn read(&self, path: &str) -> KeyResult<Option<StoredDocument>> {
        let file = self.document_path(path)?;
        Ok(self.read_file(&file).await?.map(|content| {
            let version = Self::content_version(&content);
            StoredDocument { content, version }
        }))
    }

    async fn conditional_write(
        &self,
        path: &str,
        content: &str,
        expected: &VersionToken,
        message: &str,
    ) -> KeyResult<VersionToken> {
        let file = self.document_path(path)?;
        let _guard = self.write_lock.lock().await;

        let current = self
            .read_file(&file)
            .await?
            .map(|existing| Self::content_version(&existing))
            .unwrap_or(VersionToken::Missing);
        if &current != expected {
            return Err(KeyError::Conflict {
                path: path.to_string(),
                expected: expected.clone(),
            });
        }

        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write then rename so readers never see a partial document
        let mut staging = file.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        fs::write(&staging, content).await?;
        fs::rename(&staging, &file).await?;

        let version = Self::content_version(content);
        debug!(path = path, version = %version, message = message, "Document file written");
        Ok(version)
    }

    fn backend_name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_document_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = FileDocumentStore::new(dir.path()).await.unwrap();
        assert!(store.read("keys").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = FileDocumentStore::new(dir.path()).await.unwrap();

        let version = store
            .conditional_write("nested/keys.json", "{}", &VersionToken::Missing, "create")
            .await
            .unwrap();
        let read = store.read("nested/keys.json").await.unwrap().unwrap();
        assert_eq!(read.content, "{}");
        assert_eq!(read.version, version);
        assert!(dir.path().join("nested/keys.json").exists());
        assert!(!dir.path().join("nested/keys.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_external_edit_causes_conflict() {
        let dir = TempDir::new().unwrap();
        let store = FileDocumentStore::new(dir.path()).await.unwrap();

        let version = store
            .conditional_write("keys", "{}", &VersionToken::Missing, "create")
            .await
            .unwrap();
        std::fs::write(dir.path().join("keys"), "{\"edited\": true}").unwrap();

        let err = store
            .conditional_write("keys", "{}", &version, "stale")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("keys")).unwrap(),
            "{\"edited\": true}"
        );
    }

    #[tokio::test]
    async fn test_rejects_paths_outside_root() {
        let dir = TempDir::new().unwrap();
        let store = FileDocumentStore::new(dir.path()).await.unwrap();

        for bad in ["../keys", "/etc/passwd", ""] {
            let err = store.read(bad).await.unwrap_err();
            assert!(matches!(err, KeyError::InvalidInput(_)), "{:?} should be rejected", bad);
        }
    }
}
