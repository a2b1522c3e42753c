//! Entry to object / claim mapping

use crate::attribute::{Role, SchemaAttribute};
use crate::convert::default_convert;
use crate::map::{AttributeMap, DirectoryObject};
use crate::value::{TargetType, Value};
use dirauth_core::types::{Claim, DirectoryEntry, RawValue};
use dirauth_core::{ConversionError, Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Predicate deciding whether a (claim type, claim value) pair is kept
pub type ClaimFilter = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Generic schema-aware mapper over one attribute map
pub struct EntryMapper<T> {
    map: Arc<AttributeMap<T>>,
}

impl<T> Clone for EntryMapper<T> {
    fn clone(&self) -> Self {
        Self {
            map: Arc::clone(&self.map),
        }
    }
}

impl<T: DirectoryObject> EntryMapper<T> {
    pub fn new(map: AttributeMap<T>) -> Self {
        Self { map: Arc::new(map) }
    }

    pub fn attribute_map(&self) -> &AttributeMap<T> {
        &self.map
    }

    /// Materialize an object from an entry
    pub fn to_object(&self, entry: &DirectoryEntry) -> Result<T> {
        self.to_object_with_flag(entry, false)
    }

    /// Materialize an object, setting the primary group flag property when
    /// `primary` is true
    pub fn to_object_with_flag(&self, entry: &DirectoryEntry, primary: bool) -> Result<T> {
        let mut object = T::default();

        for attr in self.map.attributes() {
            if attr.has_role(Role::PrimaryGroupFlag) && attr.is_computed() {
                object.set_property(&attr.property, Value::Boolean(primary))?;
                continue;
            }

            let value = match convert_attribute(entry, attr) {
                Ok(Some(value)) => value,
                Ok(None) if attr.required => {
                    return Err(Error::MissingRequiredAttribute {
                        entry: entry.dn.clone(),
                        attribute: attr.attribute.clone().unwrap_or_default(),
                    });
                }
                Ok(None) => continue,
                Err(e) if attr.required => return Err(e.into()),
                Err(e) => {
                    warn!(
                        "Skipping attribute {:?} of {}: {}",
                        attr.attribute, entry.dn, e
                    );
                    continue;
                }
            };

            if let Err(e) = object.set_property(&attr.property, value) {
                if attr.required {
                    return Err(e.into());
                }
                warn!("Skipping property {} of {}: {}", attr.property, entry.dn, e);
            }
        }

        Ok(object)
    }

    /// Claims carried by the entry's own attributes.
    ///
    /// May contain duplicates; collapse them with a `ClaimSet`.
    pub fn claims(&self, entry: &DirectoryEntry, filter: Option<&ClaimFilter>) -> Vec<Claim> {
        let mut claims = Vec::new();

        for attr in self.map.attributes().filter(|a| !a.claims.is_empty()) {
            let Some(name) = &attr.attribute else {
                continue;
            };

            for raw in entry.raw_values(name) {
                let value = match convert_one(raw, attr) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("Skipping claim value of {} on {}: {}", name, entry.dn, e);
                        continue;
                    }
                };

                for claim_value in value.to_claim_values() {
                    for claim_type in &attr.claims {
                        if filter.map_or(true, |f| f(claim_type, &claim_value)) {
                            claims.push(Claim::new(claim_type.clone(), claim_value.clone()));
                        } else {
                            debug!("Claim {}={} filtered out", claim_type, claim_value);
                        }
                    }
                }
            }
        }

        claims
    }

    /// Converted value of the property holding a role
    pub fn role_value(&self, entry: &DirectoryEntry, role: Role) -> Option<Value> {
        let attr = self.map.with_role(role)?;
        match convert_attribute(entry, attr) {
            Ok(value) => value,
            Err(e) => {
                warn!("Cannot read {:?} of {}: {}", role, entry.dn, e);
                None
            }
        }
    }

    /// Identity value rendered as a string (SID text, uidNumber, ...)
    pub fn identity(&self, entry: &DirectoryEntry) -> Option<String> {
        self.role_value(entry, Role::Identity)
            .and_then(|v| v.to_claim_values().into_iter().next())
    }
}

/// Read and convert one attribute; `Ok(None)` when absent
fn convert_attribute(
    entry: &DirectoryEntry,
    attr: &SchemaAttribute,
) -> std::result::Result<Option<Value>, ConversionError> {
    let Some(name) = &attr.attribute else {
        return Ok(None);
    };

    let raw = entry.raw_values(name);
    if raw.is_empty() {
        if attr.has_role(Role::DistinguishedName) && !entry.dn.is_empty() {
            return Ok(Some(Value::Text(entry.dn.clone())));
        }
        return Ok(None);
    }

    if attr.target == TargetType::TextList {
        let mut values = Vec::with_capacity(raw.len());
        for value in raw {
            if let Some(list) = convert_one(value, attr)?.into_text_list() {
                values.extend(list);
            }
        }
        return Ok(Some(Value::TextList(values)));
    }

    convert_one(raw[0], attr).map(Some)
}

fn convert_one(raw: RawValue<'_>, attr: &SchemaAttribute) -> std::result::Result<Value, ConversionError> {
    // list members are converted one by one as text
    let target = match attr.target {
        TargetType::TextList => TargetType::Text,
        other => other,
    };
    match &attr.converter {
        Some(converter) => converter.convert(raw, target),
        None => default_convert(raw, target),
    }
}
