//! Versioned document storage interface
//!
//! The key store reads and rewrites one whole document per operation. Backends
//! supply a version token with every read and reject a write whose expected
//! token is no longer current:
//! - GitHub Contents API (blob sha)
//! - Local files (content hash)
//! - In-memory (revision counter)
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


use crate::error::KeyResult;
use crate::key_types::VersionToken;
use async_trait::async_trait;

/// Raw document content together with the version it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub content: String,
    pub version: VersionToken,
}

/// Trait for versioned document backends
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read the document at `path`; `None` when it does not exist
    async fn read(&self, path: &str) -> KeyResult<Option<StoredDocument>>;

    /// Replace the document at `path` if it is still at `expected`
    ///
    /// `VersionToken::Missing` means the document must not exist yet. A stale
    /// token fails with `KeyError::Conflict` and leaves the stored document
    /// untouched. `message` describes the change (used as a commit message
    /// where the backend keeps history).
    async fn conditional_write(
        &self,
        path: &str,
        content: &str,
        expected: &VersionToken,
        message: &str,
    ) -> KeyResult<VersionToken>;

    /// Backend name for logs
    fn backend_name(&self) -> &str;
}
