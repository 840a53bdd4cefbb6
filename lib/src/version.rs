//! Time-ordered unique version tokens.
//!
//! A resource's mutable partition is keyed by the token minted when the
//! resource was created. The token embeds that creation instant (used when
//! binding queries) together with a per-generator sequence number and a
//! random node component, so two tokens minted in the same millisecond, even
//! by different processes, still differ.

use crate::errors::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionToken {
    // field order is the ordering: instant, then sequence, then node
    instant: DateTime<Utc>,
    sequence: u32,
    node: u32,
}

impl VersionToken {
    /// Builds a token; the instant is truncated to millisecond precision.
    pub fn new(instant: DateTime<Utc>, sequence: u32, node: u32) -> Self {
        let millis = instant.timestamp_millis();
        let instant = Utc.timestamp_millis_opt(millis).single().unwrap_or(instant);
        VersionToken {
            instant,
            sequence,
            node,
        }
    }

    /// The creation instant embedded in this token.
    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    pub fn instant_millis(&self) -> i64 {
        self.instant.timestamp_millis()
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn node(&self) -> u32 {
        self.node
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}-{:08x}-{:08x}",
            self.instant_millis() as u64,
            self.sequence,
            self.node
        )
    }
}

impl FromStr for VersionToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::encoding("version token", format!("malformed token '{}'", s));
        let mut parts = s.split('-');
        let (Some(millis), Some(sequence), Some(node), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(bad());
        };
        let millis = u64::from_str_radix(millis, 16).map_err(|_| bad())? as i64;
        let sequence = u32::from_str_radix(sequence, 16).map_err(|_| bad())?;
        let node = u32::from_str_radix(node, 16).map_err(|_| bad())?;
        let instant = Utc.timestamp_millis_opt(millis).single().ok_or_else(bad)?;
        Ok(VersionToken {
            instant,
            sequence,
            node,
        })
    }
}

impl TryFrom<String> for VersionToken {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<VersionToken> for String {
    fn from(value: VersionToken) -> Self {
        value.to_string()
    }
}

/// Source of fresh version tokens.
pub trait VersionTokenGenerator: Send + Sync {
    fn next_token(&self) -> VersionToken;
}

/// Generator whose tokens strictly increase, even if the wall clock stalls or
/// steps backwards.
#[derive(Debug)]
pub struct MonotonicTokens {
    node: u32,
    // (last millisecond handed out, sequence within it)
    state: Mutex<(i64, u32)>,
}

impl MonotonicTokens {
    pub fn new() -> Self {
        Self::with_node(rand::random())
    }

    pub fn with_node(node: u32) -> Self {
        MonotonicTokens {
            node,
            state: Mutex::new((i64::MIN, 0)),
        }
    }

    fn advance(&self, now_millis: i64) -> (i64, u32) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (last, sequence) = *state;
        *state = if now_millis > last {
            (now_millis, 0)
        } else if sequence == u32::MAX {
            (last + 1, 0)
        } else {
            (last, sequence + 1)
        };
        *state
    }
}

impl Default for MonotonicTokens {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionTokenGenerator for MonotonicTokens {
    fn next_token(&self) -> VersionToken {
        let (millis, sequence) = self.advance(Utc::now().timestamp_millis());
        let instant = Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now);
        VersionToken::new(instant, sequence, self.node)
    }
}
