//! Ephemeral key ledger
//!
//! Keeps a small set of credentials with optional time-to-live in one JSON
//! document on a versioned backend. Every change is a read-modify-write
//! guarded by the backend's version token, so a stale writer gets a
//! `Conflict` instead of overwriting someone else's change.
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


pub mod backend;
pub mod clock;
pub mod commands;
pub mod document;
pub mod error;
pub mod github_store;
pub mod key_store;
pub mod key_types;
pub mod local_store;
pub mod memory_store;
pub mod scheduler;

pub use backend::{DocumentStore, StoredDocument};
pub use clock::{Clock, ManualClock, SystemClock};
pub use commands::{execute, Command, CommandOutput};
pub use document::KeyDocument;
pub use error::{KeyError, KeyResult};
pub use github_store::GitHubDocumentStore;
pub use key_store::KeyStore;
pub use key_types::{KeyEntry, KeyId, KeyStatus, Timestamp, Ttl, VersionToken};
pub use local_store::FileDocumentStore;
pub use memory_store::MemoryDocumentStore;
pub use scheduler::{ExpirationQueue, ExpirationScheduler, SchedulerHandle};
