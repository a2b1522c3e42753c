//! Typed attribute values

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

/// Integral width and signedness requested from the number converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntKind {
    I32,
    U32,
    I64,
    U64,
}

impl IntKind {
    pub fn name(&self) -> &'static str {
        match self {
            IntKind::I32 => "i32",
            IntKind::U32 => "u32",
            IntKind::I64 => "i64",
            IntKind::U64 => "u64",
        }
    }
}

/// Type a property expects after conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetType {
    Text,
    TextList,
    Integer(IntKind),
    Timestamp,
    Boolean,
    Binary,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Text => write!(f, "text"),
            TargetType::TextList => write!(f, "text list"),
            TargetType::Integer(kind) => write!(f, "{}", kind.name()),
            TargetType::Timestamp => write!(f, "timestamp"),
            TargetType::Boolean => write!(f, "boolean"),
            TargetType::Binary => write!(f, "binary"),
        }
    }
}

/// A converted attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    TextList(Vec<String>),
    Integer(i64),
    Unsigned(u64),
    Timestamp(DateTime<Utc>),
    Boolean(bool),
    Binary(Vec<u8>),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Unsigned(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Unsigned(v) => Some(*v),
            Value::Integer(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_text_list(self) -> Option<Vec<String>> {
        match self {
            Value::TextList(v) => Some(v),
            Value::Text(s) => Some(vec![s]),
            _ => None,
        }
    }

    /// String forms used as claim values
    pub fn to_claim_values(&self) -> Vec<String> {
        match self {
            Value::Text(s) => vec![s.clone()],
            Value::TextList(v) => v.clone(),
            Value::Integer(v) => vec![v.to_string()],
            Value::Unsigned(v) => vec![v.to_string()],
            Value::Timestamp(t) => vec![t.to_rfc3339_opts(SecondsFormat::Secs, true)],
            Value::Boolean(b) => vec![b.to_string()],
            Value::Binary(b) => vec![base64::engine::general_purpose::STANDARD.encode(b)],
        }
    }
}
