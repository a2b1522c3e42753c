//! Directory schemas and their attribute conventions
//!
//! Supports:
//! - Microsoft Active Directory
//! - RFC 2307 (posixAccount / posixGroup)
//! - Identity Management for Unix (RFC 2307 attributes stored in AD)
//! - Custom schemas with an explicit mapping

use serde::{Deserialize, Serialize};
use std::fmt;

/// Named convention for which attributes carry identity, membership, etc.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Schema {
    #[default]
    ActiveDirectory,
    Rfc2307,
    IdentityManagementForUnix,
    Custom(String),
}

impl Schema {
    pub fn name(&self) -> &str {
        match self {
            Schema::ActiveDirectory => "active_directory",
            Schema::Rfc2307 => "rfc2307",
            Schema::IdentityManagementForUnix => "identity_management_for_unix",
            Schema::Custom(name) => name,
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-schema attribute names and filter templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchemaMapping {
    /// Attribute holding the entry's distinguished name
    pub distinguished_name_attribute: String,

    /// Multi-valued attribute listing the groups an entry belongs to
    pub group_membership_attribute: String,

    /// Attribute used to look up a referenced group
    pub group_identity_attribute: String,

    /// Attribute holding the primary group reference, if the schema has one
    #[serde(default)]
    pub primary_group_attribute: Option<String>,

    /// Attribute to search when resolving the primary group
    #[serde(default)]
    pub primary_group_search_attribute: Option<String>,

    /// Primary group value is a RID relative to the user's domain SID
    #[serde(default)]
    pub primary_group_is_relative: bool,

    /// User search filter, use {username} as placeholder
    pub user_filter: String,

    /// Group search filter, use {attribute} and {value} as placeholders
    pub group_filter: String,

    /// Attribute written by password changes
    pub password_attribute: String,
}

impl SchemaMapping {
    /// Active Directory defaults
    pub fn active_directory() -> Self {
        Self {
            distinguished_name_attribute: "distinguishedName".to_string(),
            group_membership_attribute: "memberOf".to_string(),
            group_identity_attribute: "distinguishedName".to_string(),
            primary_group_attribute: Some("primaryGroupID".to_string()),
            primary_group_search_attribute: Some("objectSid".to_string()),
            primary_group_is_relative: true,
            user_filter: "(&(objectClass=user)(sAMAccountName={username}))".to_string(),
            group_filter: "(&(objectClass=group)({attribute}={value}))".to_string(),
            password_attribute: "unicodePwd".to_string(),
        }
    }

    /// RFC 2307 defaults (OpenLDAP with the memberof overlay)
    pub fn rfc2307() -> Self {
        Self {
            distinguished_name_attribute: "entryDN".to_string(),
            group_membership_attribute: "memberOf".to_string(),
            group_identity_attribute: "entryDN".to_string(),
            primary_group_attribute: Some("gidNumber".to_string()),
            primary_group_search_attribute: Some("gidNumber".to_string()),
            primary_group_is_relative: false,
            user_filter: "(&(objectClass=posixAccount)(uid={username}))".to_string(),
            group_filter: "(&(objectClass=posixGroup)({attribute}={value}))".to_string(),
            password_attribute: "userPassword".to_string(),
        }
    }

    /// Identity Management for Unix defaults
    pub fn identity_management_for_unix() -> Self {
        Self {
            primary_group_attribute: Some("gidNumber".to_string()),
            primary_group_search_attribute: Some("gidNumber".to_string()),
            primary_group_is_relative: false,
            user_filter: "(&(objectClass=user)(uid={username}))".to_string(),
            ..Self::active_directory()
        }
    }

    /// Built-in defaults; custom schemas have none
    pub fn defaults_for(schema: &Schema) -> Option<Self> {
        match schema {
            Schema::ActiveDirectory => Some(Self::active_directory()),
            Schema::Rfc2307 => Some(Self::rfc2307()),
            Schema::IdentityManagementForUnix => Some(Self::identity_management_for_unix()),
            Schema::Custom(_) => None,
        }
    }

    /// Build user search filter with username substitution.
    ///
    /// The username must already be filter-escaped.
    pub fn build_user_filter(&self, escaped_username: &str) -> String {
        self.user_filter.replace("{username}", escaped_username)
    }

    /// Build group search filter for one attribute/value pair.
    ///
    /// The value must already be filter-escaped.
    pub fn build_group_filter(&self, attribute: &str, escaped_value: &str) -> String {
        self.group_filter
            .replace("{attribute}", attribute)
            .replace("{value}", escaped_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_filter_building() {
        let mapping = SchemaMapping::rfc2307();
        assert_eq!(
            mapping.build_user_filter("john"),
            "(&(objectClass=posixAccount)(uid=john))"
        );
    }

    #[test]
    fn test_group_filter_building() {
        let mapping = SchemaMapping::active_directory();
        assert_eq!(
            mapping.build_group_filter("objectSid", "S-1-5-21-1-2-3-513"),
            "(&(objectClass=group)(objectSid=S-1-5-21-1-2-3-513))"
        );
    }

    #[test]
    fn test_idmu_inherits_ad_membership() {
        let mapping = SchemaMapping::identity_management_for_unix();
        assert_eq!(mapping.group_membership_attribute, "memberOf");
        assert!(!mapping.primary_group_is_relative);
        assert_eq!(mapping.primary_group_attribute.as_deref(), Some("gidNumber"));
    }

    #[test]
    fn test_custom_schema_has_no_defaults() {
        assert!(SchemaMapping::defaults_for(&Schema::Custom("corp".into())).is_none());
        assert_eq!(Schema::Custom("corp".into()).to_string(), "corp");
    }
}
