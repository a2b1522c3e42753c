//! Attribute maps and their builder

use crate::attribute::{Role, SchemaAttribute};
use crate::value::Value;
use dirauth_core::types::Schema;
use dirauth_core::{ConversionError, Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// A type that can be materialized from directory entries.
///
/// `declarations()` is the static registration table: one
/// [`SchemaAttribute`] per (schema, property) the type supports.
pub trait DirectoryObject: Default + Send + Sync + 'static {
    /// Logical property names the type exposes
    fn properties() -> &'static [&'static str];

    /// Declarations for every schema the type supports
    fn declarations() -> Vec<SchemaAttribute> {
        Vec::new()
    }

    /// Assign one converted value
    fn set_property(&mut self, property: &str, value: Value) -> std::result::Result<(), ConversionError>;
}

/// Ordered attribute bindings of one type for one schema
pub struct AttributeMap<T> {
    schema: Schema,
    attributes: Vec<SchemaAttribute>,
    by_property: HashMap<String, usize>,
    by_attribute: HashMap<String, usize>,
    by_role: HashMap<Role, usize>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DirectoryObject> AttributeMap<T> {
    /// Build from the type's declaration table
    pub fn for_schema(schema: &Schema) -> Result<Self> {
        let declarations: Vec<SchemaAttribute> = T::declarations()
            .into_iter()
            .filter(|a| &a.schema == schema)
            .collect();

        if declarations.is_empty() {
            return Err(Error::Configuration(format!(
                "{} declares no attributes for schema {}",
                std::any::type_name::<T>(),
                schema
            )));
        }

        declarations
            .into_iter()
            .try_fold(AttributeMapBuilder::<T>::new(), AttributeMapBuilder::add)?
            .build()
    }

    /// Build from a fluent configuration program
    pub fn configure<F>(configure: F) -> Result<Self>
    where
        F: FnOnce(AttributeMapBuilder<T>) -> Result<AttributeMapBuilder<T>>,
    {
        configure(AttributeMapBuilder::new())?.build()
    }
}

impl<T> AttributeMap<T> {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn attributes(&self) -> impl Iterator<Item = &SchemaAttribute> {
        self.attributes.iter()
    }

    pub fn get(&self, property: &str) -> Option<&SchemaAttribute> {
        self.by_property.get(property).map(|i| &self.attributes[*i])
    }

    /// Lookup by directory attribute name, ignoring case
    pub fn by_attribute(&self, attribute: &str) -> Option<&SchemaAttribute> {
        self.by_attribute
            .get(&attribute.to_ascii_lowercase())
            .map(|i| &self.attributes[*i])
    }

    pub fn with_role(&self, role: Role) -> Option<&SchemaAttribute> {
        self.by_role.get(&role).map(|i| &self.attributes[*i])
    }

    /// Directory attribute names to request when searching
    pub fn directory_attributes(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.attributes.iter().filter_map(|a| a.attribute.as_ref()) {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name.clone());
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl<T> Clone for AttributeMap<T> {
    fn clone(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            attributes: self.attributes.clone(),
            by_property: self.by_property.clone(),
            by_attribute: self.by_attribute.clone(),
            by_role: self.by_role.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for AttributeMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeMap")
            .field("type", &std::any::type_name::<T>())
            .field("schema", &self.schema)
            .field("attributes", &self.attributes.len())
            .finish()
    }
}

/// Accumulates and validates schema attributes.
///
/// Locked to the schema of the first attribute added.
pub struct AttributeMapBuilder<T> {
    schema: Option<Schema>,
    attributes: Vec<SchemaAttribute>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DirectoryObject> AttributeMapBuilder<T> {
    pub fn new() -> Self {
        Self {
            schema: None,
            attributes: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Add a fully described attribute
    pub fn add(mut self, attribute: SchemaAttribute) -> Result<Self> {
        match &self.schema {
            Some(schema) if schema != &attribute.schema => {
                return Err(Error::SchemaMismatch {
                    expected: schema.to_string(),
                    actual: attribute.schema.to_string(),
                });
            }
            Some(_) => {}
            None => self.schema = Some(attribute.schema.clone()),
        }

        if !T::properties().contains(&attribute.property.as_str()) {
            return Err(Error::Configuration(format!(
                "{} has no property named {}",
                std::any::type_name::<T>(),
                attribute.property
            )));
        }

        if self
            .attributes
            .iter()
            .any(|a| a.property == attribute.property)
        {
            return Err(Error::Configuration(format!(
                "Property {} is mapped twice for schema {}",
                attribute.property, attribute.schema
            )));
        }

        for role in &attribute.roles {
            if let Some(holder) = self.attributes.iter().find(|a| a.has_role(*role)) {
                return Err(Error::Configuration(format!(
                    "Role {:?} is already held by property {}, cannot assign it to {}",
                    role, holder.property, attribute.property
                )));
            }
        }

        if attribute.is_computed() && !attribute.has_role(Role::PrimaryGroupFlag) {
            return Err(Error::Configuration(format!(
                "Property {} has no directory attribute",
                attribute.property
            )));
        }

        self.attributes.push(attribute);
        Ok(self)
    }

    /// Shorthand for `add(configure(SchemaAttribute::new(..)))`
    pub fn map<F>(self, schema: Schema, property: &str, attribute: &str, configure: F) -> Result<Self>
    where
        F: FnOnce(SchemaAttribute) -> SchemaAttribute,
    {
        self.add(configure(SchemaAttribute::new(schema, property, attribute)))
    }

    pub fn build(self) -> Result<AttributeMap<T>> {
        let schema = self.schema.ok_or_else(|| {
            Error::Configuration(format!(
                "No attributes configured for {}",
                std::any::type_name::<T>()
            ))
        })?;

        let mut by_property = HashMap::new();
        let mut by_attribute = HashMap::new();
        let mut by_role = HashMap::new();
        for (i, attr) in self.attributes.iter().enumerate() {
            by_property.insert(attr.property.clone(), i);
            if let Some(name) = &attr.attribute {
                by_attribute.entry(name.to_ascii_lowercase()).or_insert(i);
            }
            for role in &attr.roles {
                by_role.insert(*role, i);
            }
        }

        Ok(AttributeMap {
            schema,
            attributes: self.attributes,
            by_property,
            by_attribute,
            by_role,
            _marker: PhantomData,
        })
    }
}

impl<T: DirectoryObject> Default for AttributeMapBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::convert::Converter;
    use crate::value::{IntKind, TargetType};

    #[derive(Debug, Default, Clone, PartialEq)]
    pub(crate) struct Account {
        pub id: String,
        pub dn: String,
        pub login: String,
        pub mail: Option<String>,
        pub alt_mail: Option<String>,
        pub groups: Vec<String>,
        pub rid: Option<u64>,
        pub primary: bool,
    }

    impl DirectoryObject for Account {
        fn properties() -> &'static [&'static str] {
            &["id", "dn", "login", "mail", "alt_mail", "groups", "rid", "primary"]
        }

        fn declarations() -> Vec<SchemaAttribute> {
            let ad = Schema::ActiveDirectory;
            vec![
                SchemaAttribute::new(ad.clone(), "id", "objectSid")
                    .converter(Converter::Sid)
                    .identity()
                    .required()
                    .claim("sid"),
                SchemaAttribute::new(ad.clone(), "dn", "distinguishedName").distinguished_name(),
                SchemaAttribute::new(ad.clone(), "login", "sAMAccountName")
                    .account_name()
                    .required()
                    .claim("name"),
                SchemaAttribute::new(ad.clone(), "mail", "mail").claim("email"),
                SchemaAttribute::new(ad.clone(), "alt_mail", "userPrincipalName").claim("email"),
                SchemaAttribute::new(ad.clone(), "groups", "memberOf").group_membership(),
                SchemaAttribute::new(ad.clone(), "rid", "primaryGroupID")
                    .converter(Converter::Number)
                    .target(TargetType::Integer(IntKind::U32)),
                SchemaAttribute::primary_group_flag(ad, "primary"),
                SchemaAttribute::new(Schema::Rfc2307, "id", "uidNumber")
                    .converter(Converter::Number)
                    .identity(),
                SchemaAttribute::new(Schema::Rfc2307, "login", "uid").account_name(),
            ]
        }

        fn set_property(
            &mut self,
            property: &str,
            value: Value,
        ) -> std::result::Result<(), ConversionError> {
            let mismatch = || ConversionError::InvalidTargetType {
                converter: property.to_string(),
                target: "account property".to_string(),
            };
            match property {
                "id" => match value {
                    Value::Text(s) => self.id = s,
                    other => self.id = other.to_claim_values().join(","),
                },
                "dn" => self.dn = value.into_text().ok_or_else(mismatch)?,
                "login" => self.login = value.into_text().ok_or_else(mismatch)?,
                "mail" => self.mail = value.into_text(),
                "alt_mail" => self.alt_mail = value.into_text(),
                "groups" => self.groups = value.into_text_list().ok_or_else(mismatch)?,
                "rid" => self.rid = value.as_u64(),
                "primary" => self.primary = value.as_bool().ok_or_else(mismatch)?,
                _ => return Err(mismatch()),
            }
            Ok(())
        }
    }

    #[test]
    fn test_for_schema_filters_declarations() {
        let map = AttributeMap::<Account>::for_schema(&Schema::ActiveDirectory).unwrap();
        assert_eq!(map.schema(), &Schema::ActiveDirectory);
        assert_eq!(map.len(), 8);
        assert!(map.attributes().all(|a| a.schema == Schema::ActiveDirectory));

        let map = AttributeMap::<Account>::for_schema(&Schema::Rfc2307).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.with_role(Role::Identity).unwrap().attribute.as_deref(), Some("uidNumber"));
    }

    #[test]
    fn test_for_schema_without_declarations() {
        let err = AttributeMap::<Account>::for_schema(&Schema::IdentityManagementForUnix).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_lookups() {
        let map = AttributeMap::<Account>::for_schema(&Schema::ActiveDirectory).unwrap();
        assert_eq!(map.get("login").unwrap().attribute.as_deref(), Some("sAMAccountName"));
        assert_eq!(map.by_attribute("SAMACCOUNTNAME").unwrap().property, "login");
        assert_eq!(map.with_role(Role::GroupMembership).unwrap().property, "groups");
        assert_eq!(map.with_role(Role::PrimaryGroupFlag).unwrap().property, "primary");

        let attrs = map.directory_attributes();
        assert!(attrs.contains(&"objectSid".to_string()));
        assert!(!attrs.iter().any(|a| a.is_empty()));
        assert_eq!(attrs.len(), 7);
    }

    #[test]
    fn test_fluent_configuration() {
        let map = AttributeMap::<Account>::configure(|b| {
            b.map(Schema::Custom("corp".into()), "id", "employeeNumber", |a| a.identity())?
                .map(Schema::Custom("corp".into()), "login", "uid", |a| a.account_name())
        })
        .unwrap();
        assert_eq!(map.schema(), &Schema::Custom("corp".into()));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_schema_lock() {
        let err = AttributeMapBuilder::<Account>::new()
            .map(Schema::ActiveDirectory, "id", "objectSid", |a| a)
            .unwrap()
            .map(Schema::Rfc2307, "login", "uid", |a| a)
            .err()
            .unwrap();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }

    #[test]
    fn test_duplicate_property() {
        let err = AttributeMapBuilder::<Account>::new()
            .map(Schema::ActiveDirectory, "mail", "mail", |a| a)
            .unwrap()
            .map(Schema::ActiveDirectory, "mail", "otherMailbox", |a| a)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_duplicate_role() {
        let err = AttributeMapBuilder::<Account>::new()
            .map(Schema::ActiveDirectory, "id", "objectSid", |a| a.identity())
            .unwrap()
            .map(Schema::ActiveDirectory, "login", "sAMAccountName", |a| a.identity())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("Identity")));
    }

    #[test]
    fn test_unknown_property() {
        let err = AttributeMapBuilder::<Account>::new()
            .map(Schema::ActiveDirectory, "shoe_size", "shoeSize", |a| a)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_computed_requires_flag_role() {
        let mut attr = SchemaAttribute::primary_group_flag(Schema::ActiveDirectory, "primary");
        attr.roles.clear();
        let err = AttributeMapBuilder::<Account>::new().add(attr).err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_empty_builder() {
        assert!(AttributeMapBuilder::<Account>::new().build().is_err());
    }
}
