//! Command surface over the key store
//!
//! These are the entry points a front end (the `keyledger` binary) calls.
//! Each command returns a `CommandOutput` whose `Display` is the human
//! readable result. Key values are never printed.
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
use crate::key_store::KeyStore;
use crate::key_types::{KeyEntry, KeyId, KeyStatus, Ttl};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use tracing::warn;

const RULE_WIDTH: usize = 70;

/// A request from the front end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add {
        id: String,
        value: String,
        ttl: Ttl,
        added_by: String,
    },
    Remove {
        id: String,
    },
    Cleanup,
    List,
}

/// Result of a successful command
#[derive(Debug, Clone)]
pub enum CommandOutput {
    /// The new entry, plus whatever the follow-up sweep removed
    Added {
        entry: KeyEntry,
        swept: BTreeSet<KeyId>,
    },
    Removed {
        id: KeyId,
    },
    Cleaned {
        removed: BTreeSet<KeyId>,
    },
    Listed {
        path: String,
        now: DateTime<Utc>,
        entries: Vec<KeyEntry>,
    },
}

/// Run one command against `store`
///
/// `Add` is followed by a cleanup pass. A failure in that pass is logged and
/// does not fail the add, which has already been written.
pub async fn execute(store: &KeyStore, command: Command) -> KeyResult<CommandOutput> {
    match command {
        Command::Add {
            id,
            value,
            ttl,
            added_by,
        } => {
            let entry = store.add_key(&id, &value, ttl, &added_by).await?;
            let swept = match store.cleanup().await {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(error = %e, "Cleanup after add failed");
                    BTreeSet::new()
                }
            };
            Ok(CommandOutput::Added { entry, swept })
        }
        Command::Remove { id } => {
            store.remove_key(&id, "manual").await?;
            Ok(CommandOutput::Removed {
                id: id.trim().to_string(),
            })
        }
        Command::Cleanup => Ok(CommandOutput::Cleaned {
            removed: store.cleanup().await?,
        }),
        Command::List => Ok(CommandOutput::Listed {
            path: store.path().to_string(),
            now: store.now(),
            entries: store.list_keys().await?,
        }),
    }
}

fn join_ids(ids: &BTreeSet<KeyId>) -> String {
    ids.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutput::Added { entry, swept } => {
                match &entry.expires_at {
                    Some(expires) => write!(f, "Added key '{}' (expires {})", entry.id, expires)?,
                    None => write!(f, "Added key '{}' (lifetime)", entry.id)?,
                }
                if !swept.is_empty() {
                    write!(f, "\nRemoved expired keys: {}", join_ids(swept))?;
                }
                Ok(())
            }
            CommandOutput::Removed { id } => write!(f, "Removed key '{}'", id),
            CommandOutput::Cleaned { removed } if removed.is_empty() => {
                write!(f, "No expired keys to remove.")
            }
            CommandOutput::Cleaned { removed } => {
                write!(f, "Removed expired keys: {}", join_ids(removed))
            }
            CommandOutput::Listed { entries, .. } if entries.is_empty() => {
                write!(f, "No keys present.")
            }
            CommandOutput::Listed { path, now, entries } => {
                let rule = "=".repeat(RULE_WIDTH);
                writeln!(f, "Keys in {} ({} total):", path, entries.len())?;
                writeln!(f, "{}", rule)?;
                for entry in entries {
                    let status = entry.status(*now);
                    writeln!(f)?;
                    writeln!(f, "Key ID: '{}'", entry.id)?;
                    writeln!(f, "  Status: {}", status.label())?;
                    if status != KeyStatus::Lifetime {
                        if let Some(expires) = &entry.expires_at {
                            writeln!(f, "  Expires: {}", expires)?;
                        }
                    }
                    writeln!(f, "  Added: {}", entry.added_at)?;
                    if !entry.added_by.is_empty() {
                        writeln!(f, "  Added by: {}", entry.added_by)?;
                    }
                }
                write!(f, "{}", rule)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::KeyError;
    use crate::memory_store::MemoryDocumentStore;
    use chrono::Duration;
    use std::sync::Arc;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn store() -> (KeyStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let store = KeyStore::new(Arc::new(MemoryDocumentStore::new()), "keys")
            .with_clock(clock.clone());
        (store, clock)
    }

    fn add(id: &str, ttl: Ttl) -> Command {
        Command::Add {
            id: id.to_string(),
            value: "secret-value".to_string(),
            ttl,
            added_by: "script".to_string(),
        }
    }

    #[tokio::test]
    async fn test_add_then_list_output() {
        let (store, _) = store();
        let added = execute(&store, add("alice", Ttl::Seconds(3600))).await.unwrap();
        assert_eq!(
            added.to_string(),
            "Added key 'alice' (expires 2026-10-15T13:00:00.000000+00:00)"
        );
        execute(&store, add("bob", Ttl::Lifetime)).await.unwrap();

        let listed = execute(&store, Command::List).await.unwrap().to_string();
        assert!(listed.starts_with("Keys in keys (2 total):"));
        assert!(listed.contains("Key ID: 'alice'\n  Status: expires\n  Expires: 2026-10-15T13:00:00.000000+00:00"));
        assert!(listed.contains("Key ID: 'bob'\n  Status: LIFETIME\n  Added:"));
        assert!(!listed.contains("secret-value"));
    }

    #[tokio::test]
    async fn test_add_sweeps_expired_keys() {
        let (store, clock) = store();
        execute(&store, add("old", Ttl::Seconds(10))).await.unwrap();
        clock.advance(Duration::seconds(20));

        match execute(&store, add("new", Ttl::Lifetime)).await.unwrap() {
            CommandOutput::Added { entry, swept } => {
                assert_eq!(entry.id, "new");
                assert_eq!(swept, BTreeSet::from(["old".to_string()]));
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remove_and_cleanup_output() {
        let (store, _) = store();
        execute(&store, add("alice", Ttl::Lifetime)).await.unwrap();

        let removed = execute(&store, Command::Remove { id: " alice ".to_string() }).await.unwrap();
        assert_eq!(removed.to_string(), "Removed key 'alice'");

        let err = execute(&store, Command::Remove { id: "alice".to_string() }).await.unwrap_err();
        assert!(matches!(err, KeyError::NotFound { .. }));

        let cleaned = execute(&store, Command::Cleanup).await.unwrap();
        assert_eq!(cleaned.to_string(), "No expired keys to remove.");

        let listed = execute(&store, Command::List).await.unwrap();
        assert_eq!(listed.to_string(), "No keys present.");
    }
}
