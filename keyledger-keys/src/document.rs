//! The persisted key document and its JSON codec
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


use crate::error::{KeyError, KeyResult};
use crate::key_types::{KeyEntry, KeyId, Timestamp};
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Wire form of an entry; the id is the enclosing object key
#[derive(Deserialize)]
struct StoredEntry {
    #[serde(deserialize_with = "scalar_string")]
    value: String,
    #[serde(default)]
    expires_at: Option<Timestamp>,
    #[serde(default)]
    added_by: String,
    #[serde(default = "unknown_timestamp")]
    added_at: Timestamp,
}

#[derive(Serialize)]
struct StoredEntryRef<'a> {
    value: &'a str,
    expires_at: &'a Option<Timestamp>,
    added_by: &'a str,
    added_at: &'a Timestamp,
}

/// Provenance recorded for bare `"id": <epoch seconds>` entries
pub const LEGACY_ADDED_BY: &str = "legacy";

/// Expiry recorded for entries that could not be read
pub const UNREADABLE_EXPIRY: &str = "unreadable entry";

fn unknown_timestamp() -> Timestamp {
    Timestamp::Unparsable("unknown".to_string())
}

/// Accept numbers and booleans where a string value is expected
fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(de::Error::invalid_type(
            de::Unexpected::Other(&other.to_string()),
            &"a string value",
        )),
    }
}

/// Turn one stored entry into a `KeyEntry`
///
/// A bare number is the old `{id: expiry}` layout, where the id is the key
/// itself. Anything else that does not fit is kept with its raw JSON as the
/// value and an unreadable expiry, so it counts as expired and is never
/// mistaken for a live key.
fn decode_entry(id: &str, raw: Value) -> KeyEntry {
    if raw.is_number() {
        let expires_at = serde_json::from_value::<Timestamp>(raw.clone())
            .unwrap_or_else(|_| Timestamp::Unparsable(raw.to_string()));
        return KeyEntry {
            id: id.to_string(),
            value: id.to_string(),
            expires_at: Some(expires_at),
            added_by: LEGACY_ADDED_BY.to_string(),
            added_at: unknown_timestamp(),
        };
    }

    match StoredEntry::deserialize(&raw) {
        Ok(stored) => KeyEntry {
            id: id.to_string(),
            value: stored.value,
            expires_at: stored.expires_at,
            added_by: stored.added_by,
            added_at: stored.added_at,
        },
        Err(e) => {
            warn!(key_id = %id, error = %e, "Unreadable key entry; keeping it as expired");
            KeyEntry {
                id: id.to_string(),
                value: raw.to_string(),
                expires_at: Some(Timestamp::Unparsable(UNREADABLE_EXPIRY.to_string())),
                added_by: String::new(),
                added_at: unknown_timestamp(),
            }
        }
    }
}

/// The full persisted state: ids mapped to entries, iterated in id order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyDocument {
    entries: BTreeMap<KeyId, KeyEntry>,
}

impl KeyDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode stored content
    ///
    /// Blank content and a JSON `null` are an empty document. Content that is
    /// not a JSON object is `MalformedDocument`. Inside an object each entry
    /// is read on its own, so one bad entry never hides the others.
    pub fn decode(content: &str) -> KeyResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::new());
        }

        let stored: Option<BTreeMap<KeyId, Value>> = serde_json::from_str(content)
            .map_err(|e| KeyError::MalformedDocument(e.to_string()))?;

        let entries = stored
            .unwrap_or_default()
            .into_iter()
            .map(|(id, raw)| {
                let entry = decode_entry(&id, raw);
                (id, entry)
            })
            .collect();

        Ok(Self { entries })
    }

    /// Encode as pretty-printed JSON with two-space indentation
    pub fn encode(&self) -> KeyResult<String> {
        let wire: BTreeMap<&str, StoredEntryRef<'_>> = self
            .entries
            .iter()
            .map(|(id, entry)| {
                (
                    id.as_str(),
                    StoredEntryRef {
                        value: &entry.value,
                        expires_at: &entry.expires_at,
                        added_by: &entry.added_by,
                        added_at: &entry.added_at,
                    },
                )
            })
            .collect();
        Ok(serde_json::to_string_pretty(&wire)?)
    }

    pub fn get(&self, id: &str) -> Option<&KeyEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Insert or replace the entry under its id, returning the previous one
    pub fn insert(&mut self, entry: KeyEntry) -> Option<KeyEntry> {
        self.entries.insert(entry.id.clone(), entry)
    }

    pub fn remove(&mut self, id: &str) -> Option<KeyEntry> {
        self.entries.remove(id)
    }

    /// All ids, sorted
    pub fn ids(&self) -> Vec<KeyId> {
        self.entries.keys().cloned().collect()
    }

    /// Entries in id order
    pub fn entries(&self) -> impl Iterator<Item = &KeyEntry> {
        self.entries.values()
    }

    pub fn into_entries(self) -> Vec<KeyEntry> {
        self.entries.into_values().collect()
    }

    /// Ids whose entries are expired at `now`
    pub fn expired_ids(&self, now: DateTime<Utc>) -> BTreeSet<KeyId> {
        self.entries
            .values()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
