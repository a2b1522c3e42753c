//! Value converters
//!
//! Pure transforms from raw directory values to typed values:
//! - binary security identifiers to `S-1-5-...` strings
//! - Windows FILETIME ticks to UTC timestamps
//! - decimal or little-endian numbers to integers

use crate::value::{IntKind, TargetType, Value};
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use dirauth_core::types::RawValue;
use dirauth_core::ConversionError;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

/// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_DIFF_SECS: i64 = 11_644_473_600;

/// FILETIME ticks per second (100ns resolution)
const FILETIME_TICKS_PER_SEC: i64 = 10_000_000;

/// A caller-supplied converter
pub trait ValueConverter: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn convert(&self, raw: RawValue<'_>, target: TargetType) -> Result<Value, ConversionError>;
}

/// Converter attached to a schema attribute
#[derive(Debug, Clone)]
pub enum Converter {
    Sid,
    FileTime,
    Number,
    Custom(Arc<dyn ValueConverter>),
}

impl Converter {
    pub fn name(&self) -> &str {
        match self {
            Converter::Sid => "sid",
            Converter::FileTime => "filetime",
            Converter::Number => "number",
            Converter::Custom(c) => c.name(),
        }
    }

    /// Target type assumed when a declaration does not set one
    pub fn default_target(&self) -> Option<TargetType> {
        match self {
            Converter::Sid => Some(TargetType::Text),
            Converter::FileTime => Some(TargetType::Timestamp),
            Converter::Number => Some(TargetType::Integer(IntKind::I64)),
            Converter::Custom(_) => None,
        }
    }

    pub fn convert(&self, raw: RawValue<'_>, target: TargetType) -> Result<Value, ConversionError> {
        match self {
            Converter::Sid => {
                if target != TargetType::Text {
                    return Err(invalid_target(self, target));
                }
                if let Some(text) = raw.as_text() {
                    if text.starts_with("S-") {
                        return Ok(Value::Text(text.to_string()));
                    }
                }
                sid_to_string(raw.as_bytes()).map(Value::Text)
            }
            Converter::FileTime => {
                if target != TargetType::Timestamp {
                    return Err(invalid_target(self, target));
                }
                let ticks = parse_number(raw, IntKind::I64)?.as_i64().ok_or_else(|| {
                    ConversionError::InconvertibleNumber {
                        value: text_or_base64(raw),
                        target: target.to_string(),
                    }
                })?;
                filetime_to_datetime(ticks).map(Value::Timestamp)
            }
            Converter::Number => match target {
                TargetType::Integer(kind) => parse_number(raw, kind),
                other => Err(ConversionError::MissingParseSupport(other.to_string())),
            },
            Converter::Custom(c) => c.convert(raw, target),
        }
    }
}

fn invalid_target(converter: &Converter, target: TargetType) -> ConversionError {
    ConversionError::InvalidTargetType {
        converter: converter.name().to_string(),
        target: target.to_string(),
    }
}

/// Decode a binary Windows security identifier.
///
/// Layout: revision (1 byte), sub-authority count N (1 byte), 48-bit
/// big-endian identifier authority, then N little-endian u32 sub-authorities.
pub fn sid_to_string(bytes: &[u8]) -> Result<String, ConversionError> {
    if bytes.len() < 2 {
        return Err(ConversionError::InvalidSid(format!(
            "expected at least 2 bytes, got {} ({})",
            bytes.len(),
            hex::encode(bytes)
        )));
    }

    let revision = bytes[0];
    let count = bytes[1] as usize;
    let expected = 8 + 4 * count;
    if bytes.len() != expected {
        return Err(ConversionError::InvalidSid(format!(
            "{} sub-authorities need {} bytes, got {}",
            count,
            expected,
            bytes.len()
        )));
    }

    let authority = bytes[2..8]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

    let mut sid = format!("S-{}-{}", revision, authority);
    for chunk in bytes[8..].chunks_exact(4) {
        let sub = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let _ = write!(sid, "-{}", sub);
    }

    Ok(sid)
}

/// Convert FILETIME ticks (100ns since 1601-01-01 UTC) to a timestamp
pub fn filetime_to_datetime(ticks: i64) -> Result<DateTime<Utc>, ConversionError> {
    let secs = ticks.div_euclid(FILETIME_TICKS_PER_SEC) - FILETIME_UNIX_DIFF_SECS;
    let nanos = (ticks.rem_euclid(FILETIME_TICKS_PER_SEC) * 100) as u32;

    DateTime::<Utc>::from_timestamp(secs, nanos).ok_or_else(|| {
        ConversionError::InconvertibleNumber {
            value: ticks.to_string(),
            target: TargetType::Timestamp.to_string(),
        }
    })
}

/// Parse a directory number into the requested integer kind.
///
/// Text is parsed as decimal; a value that does not fit the target but fits
/// its same-width counterpart is bit-reinterpreted (AD stores unsigned flag
/// words as signed text). Binary values of 4 or 8 bytes are read as
/// little-endian.
pub fn parse_number(raw: RawValue<'_>, kind: IntKind) -> Result<Value, ConversionError> {
    let inconvertible = || ConversionError::InconvertibleNumber {
        value: match raw.as_text() {
            Some(text) => text.to_string(),
            None => hex::encode(raw.as_bytes()),
        },
        target: kind.name().to_string(),
    };

    if let Some(text) = raw.as_text() {
        let text = text.trim();
        let parsed = match kind {
            IntKind::I32 => text
                .parse::<i32>()
                .or_else(|_| text.parse::<u32>().map(|v| v as i32))
                .map(|v| Value::Integer(i64::from(v))),
            IntKind::U32 => text
                .parse::<u32>()
                .or_else(|_| text.parse::<i32>().map(|v| v as u32))
                .map(|v| Value::Unsigned(u64::from(v))),
            IntKind::I64 => text
                .parse::<i64>()
                .or_else(|_| text.parse::<u64>().map(|v| v as i64))
                .map(Value::Integer),
            IntKind::U64 => text
                .parse::<u64>()
                .or_else(|_| text.parse::<i64>().map(|v| v as u64))
                .map(Value::Unsigned),
        };
        if let Ok(value) = parsed {
            return Ok(value);
        }
        if matches!(raw, RawValue::Text(_)) {
            return Err(inconvertible());
        }
    }

    let bytes = raw.as_bytes();
    match (kind, bytes.len()) {
        (IntKind::I32, 4) => Ok(Value::Integer(i64::from(i32::from_le_bytes(
            bytes.try_into().map_err(|_| inconvertible())?,
        )))),
        (IntKind::U32, 4) => Ok(Value::Unsigned(u64::from(u32::from_le_bytes(
            bytes.try_into().map_err(|_| inconvertible())?,
        )))),
        (IntKind::I64, 8) => Ok(Value::Integer(i64::from_le_bytes(
            bytes.try_into().map_err(|_| inconvertible())?,
        ))),
        (IntKind::U64, 8) => Ok(Value::Unsigned(u64::from_le_bytes(
            bytes.try_into().map_err(|_| inconvertible())?,
        ))),
        _ => Err(inconvertible()),
    }
}

/// Conversion applied when a schema attribute has no converter
pub fn default_convert(raw: RawValue<'_>, target: TargetType) -> Result<Value, ConversionError> {
    match target {
        TargetType::Text => Ok(Value::Text(text_or_base64(raw))),
        TargetType::TextList => Ok(Value::TextList(vec![text_or_base64(raw)])),
        TargetType::Integer(kind) => parse_number(raw, kind),
        TargetType::Boolean => match raw.as_text().map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("true") => Ok(Value::Boolean(true)),
            Some(v) if v.eq_ignore_ascii_case("false") => Ok(Value::Boolean(false)),
            _ => Err(ConversionError::InconvertibleNumber {
                value: text_or_base64(raw),
                target: target.to_string(),
            }),
        },
        TargetType::Timestamp => raw
            .as_text()
            .and_then(parse_generalized_time)
            .map(Value::Timestamp)
            .ok_or_else(|| ConversionError::InconvertibleNumber {
                value: text_or_base64(raw),
                target: target.to_string(),
            }),
        TargetType::Binary => Ok(Value::Binary(raw.as_bytes().to_vec())),
    }
}

fn text_or_base64(raw: RawValue<'_>) -> String {
    match raw.as_text() {
        Some(text) => text.to_string(),
        None => base64::engine::general_purpose::STANDARD.encode(raw.as_bytes()),
    }
}

/// LDAP GeneralizedTime ("20240102030405.0Z") or RFC 3339
fn parse_generalized_time(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y%m%d%H%M%S%.fZ")
        .ok()
        .map(|naive| naive.and_utc())
}
