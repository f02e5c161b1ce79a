//! In-memory document backend
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
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryDocument {
    content: String,
    revision: u64,
    message: Option<String>,
}

impl MemoryDocument {
    fn version(&self) -> VersionToken {
        VersionToken::Revision(self.revision.to_string())
    }
}

/// Process-local backend with revision-counter version tokens
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, MemoryDocument>>,
    next_revision: AtomicU64,
    writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_revision(&self) -> u64 {
        self.next_revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace content unconditionally, as an out-of-band edit would
    ///
    /// Not counted by `write_count`.
    pub async fn put_raw(&self, path: &str, content: &str) -> VersionToken {
        let doc = MemoryDocument {
            content: content.to_string(),
            revision: self.bump_revision(),
            message: None,
        };
        let version = doc.version();
        self.documents.write().await.insert(path.to_string(), doc);
        version
    }

    /// Current raw content at `path`
    pub async fn content(&self, path: &str) -> Option<String> {
        self.documents
            .read()
            .await
            .get(path)
            .map(|doc| doc.content.clone())
    }

    /// Message of the last conditional write to `path`
    pub async fn last_message(&self, path: &str) -> Option<String> {
        self.documents
            .read()
            .await
            .get(path)
            .and_then(|doc| doc.message.clone())
    }

    /// Number of successful conditional writes
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read(&self, path: &str) -> KeyResult<Option<StoredDocument>> {
        let documents = self.documents.read().await;
        Ok(documents.get(path).map(|doc| StoredDocument {
            content: doc.content.clone(),
            version: doc.version(),
        }))
    }

    async fn conditional_write(
        &self,
        path: &str,
        content: &str,
        expected: &VersionToken,
        message: &str,
    ) -> KeyResult<VersionToken> {
        let mut documents = self.documents.write().await;

        let current = documents
            .get(path)
            .map(MemoryDocument::version)
            .unwrap_or(VersionToken::Missing);
        if &current != expected {
            return Err(KeyError::Conflict {
                path: path.to_string(),
                expected: expected.clone(),
            });
        }

        let doc = MemoryDocument {
            content: content.to_string(),
            revision: self.bump_revision(),
            message: Some(message.to_string()),
        };
        let version = doc.version();
        documents.insert(path.to_string(), doc);
        self.writes.fetch_add(1, Ordering::SeqCst);

        debug!(path = path, version = %version, message = message, "Memory document written");
        Ok(version)
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
