//! Key lifecycle operations over a versioned document
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


use crate::backend::DocumentStore;
use crate::clock::{Clock, SystemClock};
use crate::document::KeyDocument;
use crate::error::{KeyError, KeyResult};
use crate::key_types::{KeyEntry, KeyId, Ttl, VersionToken};
use crate::scheduler::ExpirationScheduler;
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Prefix for every change message written to the backend
pub const COMMIT_PREFIX: &str = "[keyledger]";

/// Key store over a single versioned document
///
/// Every mutation is one fetch, an in-memory change, and one conditional
/// write with the fetched token. A `Conflict` is returned as-is; the caller
/// decides whether to redo the operation.
pub struct KeyStore {
    backend: Arc<dyn DocumentStore>,
    path: String,
    clock: Arc<dyn Clock>,
    scheduler: Option<Arc<ExpirationScheduler>>,
    /// Serializes this process's read-modify-write cycles. Other processes
    /// are only excluded by the version token.
    op_lock: Mutex<()>,
}

impl KeyStore {
    /// Create a key store for the document at `path`
    pub fn new(backend: Arc<dyn DocumentStore>, path: impl Into<String>) -> Self {
        Self {
            backend,
            path: path.into(),
            clock: Arc::new(SystemClock),
            scheduler: None,
            op_lock: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Hand newly added time-limited keys to `scheduler`
    pub fn with_scheduler(mut self, scheduler: Arc<ExpirationScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current document and its version
    ///
    /// A missing document is empty with `VersionToken::Missing`. Content that
    /// does not decode is logged and treated as empty under its stored
    /// version, so the next write replaces it.
    pub async fn fetch(&self) -> KeyResult<(KeyDocument, VersionToken)> {
        let stored = match self.backend.read(&self.path).await? {
            Some(stored) => stored,
            None => {
                debug!(path = %self.path, "No key document yet");
                return Ok((KeyDocument::new(), VersionToken::Missing));
            }
        };

        match KeyDocument::decode(&stored.content) {
            Ok(document) => Ok((document, stored.version)),
            Err(KeyError::MalformedDocument(reason)) => {
                warn!(
                    path = %self.path,
                    backend = self.backend.backend_name(),
                    version = %stored.version,
                    error = %reason,
                    "Key document is not a JSON object; treating it as empty, next write will overwrite it"
                );
                Ok((KeyDocument::new(), stored.version))
            }
            Err(e) => Err(e),
        }
    }

    async fn persist(
        &self,
        document: &KeyDocument,
        expected: &VersionToken,
        message: &str,
    ) -> KeyResult<VersionToken> {
        let content = document.encode()?;
        match self
            .backend
            .conditional_write(&self.path, &content, expected, message)
            .await
        {
            Ok(version) => Ok(version),
            Err(e) => {
                if e.is_conflict() {
                    warn!(path = %self.path, expected = %expected, "Key document changed since it was read");
                }
                Err(e)
            }
        }
    }

    /// Add or replace a key
    ///
    /// With `Ttl::Seconds`, `expires_at` is now plus the duration, and the key
    /// is handed to the attached scheduler once the write has succeeded.
    pub async fn add_key(
        &self,
        id: &str,
        value: &str,
        ttl: Ttl,
        added_by: &str,
    ) -> KeyResult<KeyEntry> {
        let id = id.trim();
        if id.is_empty() {
            return Err(KeyError::InvalidInput("key id must not be empty".to_string()));
        }

        // Stored timestamps carry microseconds
        let now = self.clock.now().trunc_subsecs(6);
        let expires_at = ttl.expires_at(now)?;
        let entry = KeyEntry::new(id, value, expires_at, added_by, now);

        let message = format!(
            "{} add key {} (expires {})",
            COMMIT_PREFIX,
            id,
            entry
                .expires_at
                .as_ref()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "never".to_string())
        );

        {
            let _guard = self.op_lock.lock().await;
            let (mut document, version) = self.fetch().await?;
            let replaced = document.insert(entry.clone()).is_some();
            self.persist(&document, &version, &message).await?;

            info!(key_id = %id, ttl = %ttl, replaced = replaced, "Added key");
        }

        if let Some(scheduler) = &self.scheduler {
            match expires_at {
                Some(expires) => scheduler.schedule(id, expires),
                // A lifetime replacement must not be removed by the old timer
                None => {
                    scheduler.cancel(id);
                }
            }
        }

        Ok(entry)
    }

    /// Remove a key by id
    ///
    /// The id is trimmed first. An absent id fails with `NotFound`, which
    /// carries every id currently in the document.
    pub async fn remove_key(&self, id: &str, reason: &str) -> KeyResult<bool> {
        let id = id.trim();

        let _guard = self.op_lock.lock().await;
        let (mut document, version) = self.fetch().await?;

        if document.remove(id).is_none() {
            let available = document.ids();
            warn!(key_id = %id, available = available.len(), "Key not found");
            return Err(KeyError::NotFound {
                id: id.to_string(),
                available,
            });
        }

        let message = format!("{} remove key {} ({})", COMMIT_PREFIX, id, reason);
        self.persist(&document, &version, &message).await?;

        if let Some(scheduler) = &self.scheduler {
            scheduler.cancel(id);
        }
        info!(key_id = %id, reason = reason, "Removed key");
        Ok(true)
    }

    /// Remove `id` only if it is still expired at `now`
    ///
    /// Timer path: a key that was replaced by a lifetime or later-expiring
    /// entry since the timer was set is left alone. Returns whether a removal
    /// was written.
    pub async fn expire_key(&self, id: &str, now: DateTime<Utc>) -> KeyResult<bool> {
        let _guard = self.op_lock.lock().await;
        let (mut document, version) = self.fetch().await?;

        match document.get(id) {
            None => {
                debug!(key_id = %id, "Key already gone");
                return Ok(false);
            }
            Some(entry) if !entry.is_expired_at(now) => {
                debug!(key_id = %id, "Key was renewed, not expiring");
                return Ok(false);
            }
            Some(_) => {}
        }

        document.remove(id);
        let message = format!("{} remove key {} (auto-expire (timer))", COMMIT_PREFIX, id);
        self.persist(&document, &version, &message).await?;

        info!(key_id = %id, "Auto-removed expired key");
        Ok(true)
    }

    /// Remove every entry expired at `now`
    ///
    /// Unparsable expiries count as expired. Nothing expired means no write
    /// and an empty result.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> KeyResult<BTreeSet<KeyId>> {
        let _guard = self.op_lock.lock().await;
        let (mut document, version) = self.fetch().await?;

        let expired = document.expired_ids(now);
        if expired.is_empty() {
            debug!(path = %self.path, keys = document.len(), "No expired keys to remove");
            return Ok(expired);
        }

        for id in &expired {
            document.remove(id);
        }

        let listed: Vec<&str> = expired.iter().map(String::as_str).collect();
        let message = format!("{} cleanup expired keys: {}", COMMIT_PREFIX, listed.join(", "));
        self.persist(&document, &version, &message).await?;

        info!(removed = expired.len(), keys = ?listed, "Removed expired keys");
        Ok(expired)
    }

    /// `cleanup_expired` at the store's current time
    pub async fn cleanup(&self) -> KeyResult<BTreeSet<KeyId>> {
        self.cleanup_expired(self.clock.now()).await
    }

    /// All entries sorted by id. Never removes anything.
    pub async fn list_keys(&self) -> KeyResult<Vec<KeyEntry>> {
        let (document, _) = self.fetch().await?;
        Ok(document.into_entries())
    }
}
