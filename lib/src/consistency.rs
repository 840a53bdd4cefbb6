//! Consistency levels and the policy that assigns one to each class of
//! operation, so binary and RDF I/O can be tuned independently.

use crate::errors::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Acknowledgment strength required from the store for a read or write.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConsistencyLevel {
    Any,
    /// Single-replica acknowledgment; the weakest level that still reads data.
    #[default]
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
    LocalOne,
}

impl ConsistencyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsistencyLevel::Any => "ANY",
            ConsistencyLevel::One => "ONE",
            ConsistencyLevel::Two => "TWO",
            ConsistencyLevel::Three => "THREE",
            ConsistencyLevel::Quorum => "QUORUM",
            ConsistencyLevel::All => "ALL",
            ConsistencyLevel::LocalQuorum => "LOCAL_QUORUM",
            ConsistencyLevel::EachQuorum => "EACH_QUORUM",
            ConsistencyLevel::Serial => "SERIAL",
            ConsistencyLevel::LocalSerial => "LOCAL_SERIAL",
            ConsistencyLevel::LocalOne => "LOCAL_ONE",
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsistencyLevel {
    type Err = Error;

    /// Accepts the driver spelling in any case, with `-` or `_` separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Ok(match normalized.as_str() {
            "ANY" => ConsistencyLevel::Any,
            "ONE" => ConsistencyLevel::One,
            "TWO" => ConsistencyLevel::Two,
            "THREE" => ConsistencyLevel::Three,
            "QUORUM" => ConsistencyLevel::Quorum,
            "ALL" => ConsistencyLevel::All,
            "LOCAL_QUORUM" => ConsistencyLevel::LocalQuorum,
            "EACH_QUORUM" => ConsistencyLevel::EachQuorum,
            "SERIAL" => ConsistencyLevel::Serial,
            "LOCAL_SERIAL" => ConsistencyLevel::LocalSerial,
            "LOCAL_ONE" => ConsistencyLevel::LocalOne,
            _ => {
                return Err(Error::encoding(
                    "consistency level",
                    format!("unknown level '{}'", s),
                ))
            }
        })
    }
}

impl TryFrom<String> for ConsistencyLevel {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConsistencyLevel> for String {
    fn from(value: ConsistencyLevel) -> Self {
        value.as_str().to_string()
    }
}

/// The four classes of operation that carry their own consistency level.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OperationClass {
    BinaryRead,
    BinaryWrite,
    MutableRead,
    MutableWrite,
}

/// Maps each [`OperationClass`] to a [`ConsistencyLevel`]. Every slot is
/// always set; the default is [`ConsistencyLevel::One`] everywhere.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyPolicy {
    pub binary_read: ConsistencyLevel,
    pub binary_write: ConsistencyLevel,
    pub mutable_read: ConsistencyLevel,
    pub mutable_write: ConsistencyLevel,
}

impl ConsistencyPolicy {
    /// A policy with the same level in every slot.
    pub fn uniform(level: ConsistencyLevel) -> Self {
        ConsistencyPolicy {
            binary_read: level,
            binary_write: level,
            mutable_read: level,
            mutable_write: level,
        }
    }

    pub fn level(&self, class: OperationClass) -> ConsistencyLevel {
        match class {
            OperationClass::BinaryRead => self.binary_read,
            OperationClass::BinaryWrite => self.binary_write,
            OperationClass::MutableRead => self.mutable_read,
            OperationClass::MutableWrite => self.mutable_write,
        }
    }
}
