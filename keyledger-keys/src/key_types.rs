//! Key type definitions
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
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a key. Always a string, never coerced to a number.
pub type KeyId = String;

/// Opaque marker for the exact document content last read
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionToken {
    /// No document exists yet; a write with this token creates it
    Missing,
    /// Backend-specific revision (git blob sha, content hash, counter)
    Revision(String),
}

impl VersionToken {
    pub fn is_missing(&self) -> bool {
        matches!(self, VersionToken::Missing)
    }

    pub fn revision(&self) -> Option<&str> {
        match self {
            VersionToken::Missing => None,
            VersionToken::Revision(rev) => Some(rev),
        }
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionToken::Missing => write!(f, "<missing>"),
            VersionToken::Revision(rev) => write!(f, "{}", rev),
        }
    }
}

/// A stored timestamp
///
/// Text that cannot be parsed is kept verbatim so that re-encoding the
/// document never drops it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timestamp {
    Valid(DateTime<Utc>),
    Unparsable(String),
}

impl Timestamp {
    /// Parse RFC 3339, falling back to a naive ISO-8601 date-time read as UTC
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Timestamp::Valid(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
            return Timestamp::Valid(Utc.from_utc_datetime(&naive));
        }
        Timestamp::Unparsable(raw.to_string())
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Valid(dt) => Some(*dt),
            Timestamp::Unparsable(_) => None,
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp::Valid(dt)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Valid(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Micros, false)),
            Timestamp::Unparsable(raw) => write!(f, "{}", raw),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Older documents stored expiry as epoch seconds
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value {
            serde_json::Value::String(raw) => Timestamp::parse(&raw),
            serde_json::Value::Number(n) => n
                .as_f64()
                .and_then(|secs| {
                    let whole = secs.floor();
                    let nanos = ((secs - whole) * 1e9) as u32;
                    DateTime::from_timestamp(whole as i64, nanos)
                })
                .map(Timestamp::Valid)
                .unwrap_or_else(|| Timestamp::Unparsable(n.to_string())),
            other => Timestamp::Unparsable(other.to_string()),
        })
    }
}

/// Requested lifetime for a new key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Seconds(u64),
    Lifetime,
}

impl Ttl {
    /// Absolute expiry for a key added at `now`
    pub fn expires_at(&self, now: DateTime<Utc>) -> KeyResult<Option<DateTime<Utc>>> {
        match self {
            Ttl::Lifetime => Ok(None),
            Ttl::Seconds(secs) => {
                let overflow = || KeyError::InvalidInput(format!("duration of {} seconds is too large", secs));
                let secs = i64::try_from(*secs).map_err(|_| overflow())?;
                let delta = chrono::Duration::try_seconds(secs).ok_or_else(overflow)?;
                now.checked_add_signed(delta).map(Some).ok_or_else(overflow)
            }
        }
    }
}

impl From<Option<u64>> for Ttl {
    fn from(secs: Option<u64>) -> Self {
        secs.map(Ttl::Seconds).unwrap_or(Ttl::Lifetime)
    }
}

impl FromStr for Ttl {
    type Err = KeyError;

    /// Accepts whole seconds or the word `lifetime` (any case)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("lifetime") {
            return Ok(Ttl::Lifetime);
        }
        trimmed.parse::<u64>().map(Ttl::Seconds).map_err(|_| {
            KeyError::InvalidInput(format!(
                "invalid duration '{}'. Use integer seconds or 'lifetime'",
                s
            ))
        })
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ttl::Seconds(secs) => write!(f, "{}s", secs),
            Ttl::Lifetime => write!(f, "lifetime"),
        }
    }
}

/// Expiry state of an entry at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Lifetime,
    Expires(DateTime<Utc>),
    Expired,
    /// Stored expiry could not be parsed; treated as expired
    Unparsable,
}

impl KeyStatus {
    pub fn label(&self) -> &'static str {
        match self {
            KeyStatus::Lifetime => "LIFETIME",
            KeyStatus::Expires(_) => "expires",
            KeyStatus::Expired => "expired",
            KeyStatus::Unparsable => "unparsable expiry",
        }
    }
}

/// One managed credential record
///
/// Entries are never edited in place. Changing a value means writing a new
/// entry under the same id.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub id: KeyId,
    pub value: String,
    pub expires_at: Option<Timestamp>,
    pub added_by: String,
    pub added_at: Timestamp,
}

impl KeyEntry {
    pub fn new(
        id: impl Into<KeyId>,
        value: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
        added_by: impl Into<String>,
        added_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
            expires_at: expires_at.map(Timestamp::Valid),
            added_by: added_by.into(),
            added_at: Timestamp::Valid(added_at),
        }
    }

    pub fn is_lifetime(&self) -> bool {
        self.expires_at.is_none()
    }

    /// True once `expires_at <= now`, or when the stored expiry is unreadable
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match &self.expires_at {
            None => false,
            Some(Timestamp::Valid(expires)) => *expires <= now,
            Some(Timestamp::Unparsable(_)) => true,
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> KeyStatus {
        match &self.expires_at {
            None => KeyStatus::Lifetime,
            Some(Timestamp::Unparsable(_)) => KeyStatus::Unparsable,
            Some(Timestamp::Valid(expires)) if *expires <= now => KeyStatus::Expired,
            Some(Timestamp::Valid(expires)) => KeyStatus::Expires(*expires),
        }
    }
}

impl fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyEntry")
            .field("id", &self.id)
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("added_by", &self.added_by)
            .field("added_at", &self.added_at)
            .finish()
    }
}
