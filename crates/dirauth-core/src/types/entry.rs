//! Directory entry types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Search scope for directory searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    /// Only the base entry itself
    Base,
    /// Immediate children of the base entry
    OneLevel,
    /// The base entry and everything below it
    #[default]
    Subtree,
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchScope::Base => write!(f, "base"),
            SearchScope::OneLevel => write!(f, "one"),
            SearchScope::Subtree => write!(f, "sub"),
        }
    }
}

/// A configured search base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchBase {
    /// Base DN, e.g. "ou=people,dc=example,dc=com"
    pub dn: String,

    #[serde(default)]
    pub scope: SearchScope,
}

impl SearchBase {
    pub fn new(dn: impl Into<String>, scope: SearchScope) -> Self {
        Self {
            dn: dn.into(),
            scope,
        }
    }

    pub fn subtree(dn: impl Into<String>) -> Self {
        Self::new(dn, SearchScope::Subtree)
    }
}

/// A raw value of a directory attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawValue<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

impl<'a> RawValue<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        match self {
            RawValue::Text(s) => s.as_bytes(),
            RawValue::Binary(b) => b,
        }
    }

    /// Text form, if the value is valid UTF-8
    pub fn as_text(&self) -> Option<&'a str> {
        match self {
            RawValue::Text(s) => Some(s),
            RawValue::Binary(b) => std::str::from_utf8(b).ok(),
        }
    }
}

/// A directory record: distinguished name plus a multi-valued attribute bag.
///
/// Text and binary values are held apart, the same way `ldap3` splits
/// `attrs` and `bin_attrs`. Attribute lookups ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub dn: String,

    #[serde(default)]
    pub attrs: HashMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Default::default()
        }
    }

    /// Add text values for an attribute
    pub fn with_attr<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs
            .entry(name.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Add binary values for an attribute
    pub fn with_binary<I>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        self.bin_attrs
            .entry(name.to_string())
            .or_default()
            .extend(values);
        self
    }

    pub fn text_values(&self, name: &str) -> Option<&[String]> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    pub fn binary_values(&self, name: &str) -> Option<&[Vec<u8>]> {
        self.bin_attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// First text value of an attribute
    pub fn first(&self, name: &str) -> Option<&str> {
        self.text_values(name)
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    /// All values of an attribute, text values first
    pub fn raw_values(&self, name: &str) -> Vec<RawValue<'_>> {
        let mut values: Vec<RawValue<'_>> = self
            .text_values(name)
            .unwrap_or_default()
            .iter()
            .map(|s| RawValue::Text(s.as_str()))
            .collect();
        values.extend(
            self.binary_values(name)
                .unwrap_or_default()
                .iter()
                .map(|b| RawValue::Binary(b.as_slice())),
        );
        values
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.text_values(name).map_or(false, |v| !v.is_empty())
            || self.binary_values(name).map_or(false, |v| !v.is_empty())
    }

    /// Copy of this entry holding only the requested attributes
    pub fn project(&self, attributes: &[String]) -> Self {
        let wanted = |k: &String| attributes.iter().any(|a| a.eq_ignore_ascii_case(k));
        Self {
            dn: self.dn.clone(),
            attrs: self
                .attrs
                .iter()
                .filter(|(k, _)| wanted(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            bin_attrs: self
                .bin_attrs
                .iter()
                .filter(|(k, _)| wanted(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}
