//! Error types for key management
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


use crate::key_types::{KeyId, VersionToken};
use thiserror::Error;

/// Key management errors
#[derive(Error, Debug)]
pub enum KeyError {
    /// The id is absent. `available` holds every id present at lookup time, sorted.
    #[error("Key not found: '{id}' ({})", describe_available(.available))]
    NotFound { id: KeyId, available: Vec<KeyId> },

    #[error("Conflict writing {path}: document changed since version {expected} was read")]
    Conflict { path: String, expected: VersionToken },

    #[error("Malformed key document: {0}")]
    MalformedDocument(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl KeyError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, KeyError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, KeyError::NotFound { .. })
    }
}

fn describe_available(available: &[KeyId]) -> String {
    if available.is_empty() {
        "no keys present".to_string()
    } else {
        let quoted: Vec<String> = available.iter().map(|k| format!("'{}'", k)).collect();
        format!(
            "available keys ({}): {}; ids are case-sensitive",
            available.len(),
            quoted.join(", ")
        )
    }
}

/// Result type for key operations
pub type KeyResult<T> = Result<T, KeyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_available_ids() {
        let err = KeyError::NotFound {
            id: "Alice".to_string(),
            available: vec!["alice".to_string(), "bob".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("'Alice'"));
        assert!(msg.contains("available keys (2): 'alice', 'bob'"));
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_not_found_with_empty_document() {
        let err = KeyError::NotFound {
            id: "ghost".to_string(),
            available: Vec::new(),
        };
        assert!(err.to_string().contains("no keys present"));
    }

    #[test]
    fn test_conflict_display() {
        let err = KeyError::Conflict {
            path: "keys".to_string(),
            expected: VersionToken::Revision("abc123".to_string()),
        };
        assert!(err.is_conflict());
        assert!(err.to_string().contains("abc123"));
    }
}
