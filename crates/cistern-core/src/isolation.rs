//! Transaction isolation levels

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction isolation level applied to a physical connection.
///
/// `Undefined` means "leave the driver default untouched"; it is the only
/// level the pool never forwards to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionIsolation {
    /// Keep whatever the driver ships with
    #[default]
    Undefined,
    /// Transactions are not supported
    None,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl TransactionIsolation {
    /// Conventional numeric level code (-1 for `Undefined`)
    pub fn level(&self) -> i32 {
        match self {
            Self::Undefined => -1,
            Self::None => 0,
            Self::ReadUncommitted => 1,
            Self::ReadCommitted => 2,
            Self::RepeatableRead => 4,
            Self::Serializable => 8,
        }
    }

    /// Parse a conventional numeric level code
    pub fn from_level(level: i32) -> Option<Self> {
        match level {
            -1 => Some(Self::Undefined),
            0 => Some(Self::None),
            1 => Some(Self::ReadUncommitted),
            2 => Some(Self::ReadCommitted),
            4 => Some(Self::RepeatableRead),
            8 => Some(Self::Serializable),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionIsolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Undefined => "undefined",
            Self::None => "none",
            Self::ReadUncommitted => "read-uncommitted",
            Self::ReadCommitted => "read-committed",
            Self::RepeatableRead => "repeatable-read",
            Self::Serializable => "serializable",
        };
        write!(f, "{}", name)
    }
}
