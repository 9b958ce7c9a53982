//! Dynamic field value type.

use crate::types::RecordId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamic record field value.
///
/// This type represents any field value rowcache can index or cache.
/// Floats are intentionally not supported: index keys must have exact,
/// stable equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldValue {
    /// Null / absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (supports the full i64 range).
    Int(i64),
    /// Text string (UTF-8).
    Text(String),
}

impl FieldValue {
    /// Returns true if this value is null.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Interprets this value as a record identifier.
    #[must_use]
    pub const fn as_id(&self) -> Option<RecordId> {
        match self {
            Self::Int(id) => Some(RecordId::new(*id)),
            _ => None,
        }
    }

    /// Returns the name of this value's type, for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Text(_) => "text",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<RecordId> for FieldValue {
    fn from(id: RecordId) -> Self {
        Self::Int(id.as_i64())
    }
}
