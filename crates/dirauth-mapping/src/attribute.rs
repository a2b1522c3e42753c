//! Logical property to directory attribute bindings

use crate::convert::Converter;
use crate::value::TargetType;
use dirauth_core::types::Schema;

/// Role a property plays for the mapping engine.
///
/// Each role may be held by at most one property of a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Unique identifier (objectSid, uidNumber, ...)
    Identity,
    DistinguishedName,
    /// Login name (sAMAccountName, uid)
    AccountName,
    /// Multi-valued list of the groups an entry belongs to
    GroupMembership,
    /// Set on a group produced as the user's primary group
    PrimaryGroupFlag,
}

/// One property binding for one schema
#[derive(Debug, Clone)]
pub struct SchemaAttribute {
    pub schema: Schema,
    pub property: String,
    /// `None` for computed properties
    pub attribute: Option<String>,
    pub target: TargetType,
    pub converter: Option<Converter>,
    pub required: bool,
    pub roles: Vec<Role>,
    pub claims: Vec<String>,
}

impl SchemaAttribute {
    pub fn new(schema: Schema, property: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            schema,
            property: property.into(),
            attribute: Some(attribute.into()),
            target: TargetType::Text,
            converter: None,
            required: false,
            roles: Vec::new(),
            claims: Vec::new(),
        }
    }

    /// A flag property that is not read from the directory
    pub fn primary_group_flag(schema: Schema, property: impl Into<String>) -> Self {
        Self {
            schema,
            property: property.into(),
            attribute: None,
            target: TargetType::Boolean,
            converter: None,
            required: false,
            roles: vec![Role::PrimaryGroupFlag],
            claims: Vec::new(),
        }
    }

    pub fn target(mut self, target: TargetType) -> Self {
        self.target = target;
        self
    }

    /// Attach a converter; also switches the target to the converter's
    /// natural output type, call [`target`](Self::target) afterwards to
    /// override it.
    pub fn converter(mut self, converter: Converter) -> Self {
        if let Some(target) = converter.default_target() {
            self.target = target;
        }
        self.converter = Some(converter);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    pub fn identity(self) -> Self {
        self.role(Role::Identity)
    }

    pub fn distinguished_name(self) -> Self {
        self.role(Role::DistinguishedName)
    }

    pub fn account_name(self) -> Self {
        self.role(Role::AccountName)
    }

    pub fn group_membership(self) -> Self {
        self.role(Role::GroupMembership).target(TargetType::TextList)
    }

    /// Emit the converted value as a claim of this type
    pub fn claim(mut self, claim_type: impl Into<String>) -> Self {
        self.claims.push(claim_type.into());
        self
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_computed(&self) -> bool {
        self.attribute.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::IntKind;

    #[test]
    fn test_converter_sets_natural_target() {
        let attr = SchemaAttribute::new(Schema::ActiveDirectory, "last_logon", "lastLogonTimestamp")
            .converter(Converter::FileTime);
        assert_eq!(attr.target, TargetType::Timestamp);

        let attr = SchemaAttribute::new(Schema::ActiveDirectory, "rid", "primaryGroupID")
            .converter(Converter::Number)
            .target(TargetType::Integer(IntKind::U32));
        assert_eq!(attr.target, TargetType::Integer(IntKind::U32));
    }

    #[test]
    fn test_roles_are_not_duplicated() {
        let attr = SchemaAttribute::new(Schema::Rfc2307, "id", "uidNumber")
            .identity()
            .identity();
        assert_eq!(attr.roles, vec![Role::Identity]);
        assert!(attr.has_role(Role::Identity));
        assert!(!attr.is_computed());
    }

    #[test]
    fn test_primary_group_flag_is_computed() {
        let attr = SchemaAttribute::primary_group_flag(Schema::ActiveDirectory, "is_primary");
        assert!(attr.is_computed());
        assert!(attr.has_role(Role::PrimaryGroupFlag));
    }
}
