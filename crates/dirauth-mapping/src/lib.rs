//! Dirauth Mapping - schema-aware translation of directory entries
//!
//! # Overview
//!
//! ```text
//!   declarations() / configure(|b| ...)
//!               │
//!               ▼
//!   ┌───────────────────────┐      ┌──────────────────┐
//!   │ AttributeMapBuilder<T>│─────▶│ AttributeMap<T>  │
//!   └───────────────────────┘      └────────┬─────────┘
//!                                           │
//!   DirectoryEntry ──▶ Converter ──▶ EntryMapper<T> ──▶ T / Vec<Claim>
//! ```
//!
//! - **Attribute maps** bind logical properties of a type to directory
//!   attributes for exactly one schema, with role flags and claim types.
//! - **Converters** decode SIDs, FILETIME timestamps and numbers.
//! - **Entry mappers** build typed objects or claims from raw entries.

mod attribute;
mod convert;
mod map;
mod mapper;
mod value;

pub use attribute::{Role, SchemaAttribute};
pub use convert::{
    default_convert, filetime_to_datetime, parse_number, sid_to_string, Converter,
    ValueConverter,
};
pub use map::{AttributeMap, AttributeMapBuilder, DirectoryObject};
pub use mapper::{ClaimFilter, EntryMapper};
pub use value::{IntKind, TargetType, Value};
