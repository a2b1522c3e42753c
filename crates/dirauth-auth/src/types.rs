//! Stock user and group objects
//!
//! Supports:
//! - Active Directory
//! - RFC 2307 (OpenLDAP, 389 Directory Server with posix accounts)
//! - Identity Management for Unix (AD with posix attributes)

use chrono::{DateTime, Utc};
use dirauth_core::types::claim_types;
use dirauth_core::types::{ClaimSet, Schema};
use dirauth_core::ConversionError;
use dirauth_mapping::{Converter, DirectoryObject, IntKind, SchemaAttribute, TargetType, Value};
use serde::{Deserialize, Serialize};

// ============================================================================
// Users
// ============================================================================

/// A directory user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LdapUser {
    /// SID on Active Directory, uidNumber on RFC 2307
    pub id: String,
    pub dn: String,
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub upn: Option<String>,
    pub uid_number: Option<i64>,
    /// Primary group RID (AD) or gidNumber
    pub primary_group_id: Option<u64>,
    /// Direct group memberships as listed on the entry
    pub member_of: Vec<String>,
    pub last_logon: Option<DateTime<Utc>>,
}

impl DirectoryObject for LdapUser {
    fn properties() -> &'static [&'static str] {
        &[
            "id",
            "dn",
            "username",
            "display_name",
            "email",
            "upn",
            "uid_number",
            "primary_group_id",
            "member_of",
            "last_logon",
        ]
    }

    fn declarations() -> Vec<SchemaAttribute> {
        let ad = Schema::ActiveDirectory;
        let posix = Schema::Rfc2307;
        let idmu = Schema::IdentityManagementForUnix;
        let rid = TargetType::Integer(IntKind::U32);

        vec![
            // Active Directory
            SchemaAttribute::new(ad.clone(), "id", "objectSid")
                .converter(Converter::Sid)
                .identity()
                .required()
                .claim(claim_types::SID),
            SchemaAttribute::new(ad.clone(), "dn", "distinguishedName").distinguished_name(),
            SchemaAttribute::new(ad.clone(), "username", "sAMAccountName")
                .account_name()
                .required()
                .claim(claim_types::NAME),
            SchemaAttribute::new(ad.clone(), "display_name", "displayName")
                .claim(claim_types::DISPLAY_NAME),
            SchemaAttribute::new(ad.clone(), "email", "mail").claim(claim_types::EMAIL),
            SchemaAttribute::new(ad.clone(), "upn", "userPrincipalName").claim(claim_types::UPN),
            SchemaAttribute::new(ad.clone(), "member_of", "memberOf").group_membership(),
            SchemaAttribute::new(ad.clone(), "primary_group_id", "primaryGroupID")
                .converter(Converter::Number)
                .target(rid),
            SchemaAttribute::new(ad, "last_logon", "lastLogonTimestamp")
                .converter(Converter::FileTime),
            // RFC 2307
            SchemaAttribute::new(posix.clone(), "id", "uidNumber")
                .converter(Converter::Number)
                .identity()
                .required(),
            SchemaAttribute::new(posix.clone(), "uid_number", "uidNumber")
                .converter(Converter::Number)
                .claim(claim_types::UID_NUMBER),
            SchemaAttribute::new(posix.clone(), "dn", "entryDN").distinguished_name(),
            SchemaAttribute::new(posix.clone(), "username", "uid")
                .account_name()
                .required()
                .claim(claim_types::NAME),
            SchemaAttribute::new(posix.clone(), "display_name", "cn")
                .claim(claim_types::DISPLAY_NAME),
            SchemaAttribute::new(posix.clone(), "email", "mail").claim(claim_types::EMAIL),
            SchemaAttribute::new(posix.clone(), "member_of", "memberOf").group_membership(),
            SchemaAttribute::new(posix, "primary_group_id", "gidNumber")
                .converter(Converter::Number)
                .target(rid),
            // Identity Management for Unix
            SchemaAttribute::new(idmu.clone(), "id", "objectSid")
                .converter(Converter::Sid)
                .identity()
                .required()
                .claim(claim_types::SID),
            SchemaAttribute::new(idmu.clone(), "dn", "distinguishedName").distinguished_name(),
            SchemaAttribute::new(idmu.clone(), "username", "uid")
                .account_name()
                .required()
                .claim(claim_types::NAME),
            SchemaAttribute::new(idmu.clone(), "display_name", "displayName")
                .claim(claim_types::DISPLAY_NAME),
            SchemaAttribute::new(idmu.clone(), "email", "mail").claim(claim_types::EMAIL),
            SchemaAttribute::new(idmu.clone(), "upn", "userPrincipalName")
                .claim(claim_types::UPN),
            SchemaAttribute::new(idmu.clone(), "uid_number", "uidNumber")
                .converter(Converter::Number)
                .claim(claim_types::UID_NUMBER),
            SchemaAttribute::new(idmu.clone(), "member_of", "memberOf").group_membership(),
            SchemaAttribute::new(idmu, "primary_group_id", "gidNumber")
                .converter(Converter::Number)
                .target(rid),
        ]
    }

    fn set_property(&mut self, property: &str, value: Value) -> Result<(), ConversionError> {
        let mismatch = || mismatch(property);
        match property {
            "id" => self.id = identity_text(value),
            "dn" => self.dn = value.into_text().ok_or_else(mismatch)?,
            "username" => self.username = value.into_text().ok_or_else(mismatch)?,
            "display_name" => self.display_name = value.into_text(),
            "email" => self.email = value.into_text(),
            "upn" => self.upn = value.into_text(),
            "uid_number" => self.uid_number = value.as_i64(),
            "primary_group_id" => self.primary_group_id = value.as_u64(),
            "member_of" => self.member_of = value.into_text_list().ok_or_else(mismatch)?,
            "last_logon" => self.last_logon = value.as_timestamp(),
            _ => return Err(mismatch()),
        }
        Ok(())
    }
}

// ============================================================================
// Groups
// ============================================================================

/// A directory group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LdapGroup {
    /// SID on Active Directory, gidNumber on RFC 2307
    pub id: String,
    pub dn: String,
    pub name: String,
    pub description: Option<String>,
    pub gid_number: Option<i64>,
    /// Groups this group is itself a member of
    pub member_of: Vec<String>,
    /// Set when resolved as the user's primary group
    pub is_primary: bool,
}

impl DirectoryObject for LdapGroup {
    fn properties() -> &'static [&'static str] {
        &[
            "id",
            "dn",
            "name",
            "description",
            "gid_number",
            "member_of",
            "is_primary",
        ]
    }

    fn declarations() -> Vec<SchemaAttribute> {
        let ad = Schema::ActiveDirectory;
        let posix = Schema::Rfc2307;
        let idmu = Schema::IdentityManagementForUnix;

        vec![
            SchemaAttribute::new(ad.clone(), "id", "objectSid")
                .converter(Converter::Sid)
                .identity()
                .required()
                .claim(claim_types::GROUP_SID),
            SchemaAttribute::new(ad.clone(), "dn", "distinguishedName").distinguished_name(),
            SchemaAttribute::new(ad.clone(), "name", "cn")
                .account_name()
                .required()
                .claim(claim_types::ROLE),
            SchemaAttribute::new(ad.clone(), "description", "description"),
            SchemaAttribute::new(ad.clone(), "member_of", "memberOf").group_membership(),
            SchemaAttribute::primary_group_flag(ad, "is_primary"),
            SchemaAttribute::new(posix.clone(), "id", "gidNumber")
                .converter(Converter::Number)
                .identity()
                .required()
                .claim(claim_types::GID_NUMBER),
            SchemaAttribute::new(posix.clone(), "gid_number", "gidNumber")
                .converter(Converter::Number),
            SchemaAttribute::new(posix.clone(), "dn", "entryDN").distinguished_name(),
            SchemaAttribute::new(posix.clone(), "name", "cn")
                .account_name()
                .required()
                .claim(claim_types::ROLE),
            SchemaAttribute::new(posix.clone(), "description", "description"),
            SchemaAttribute::new(posix.clone(), "member_of", "memberOf").group_membership(),
            SchemaAttribute::primary_group_flag(posix, "is_primary"),
            SchemaAttribute::new(idmu.clone(), "id", "objectSid")
                .converter(Converter::Sid)
                .identity()
                .required()
                .claim(claim_types::GROUP_SID),
            SchemaAttribute::new(idmu.clone(), "dn", "distinguishedName").distinguished_name(),
            SchemaAttribute::new(idmu.clone(), "name", "cn")
                .account_name()
                .required()
                .claim(claim_types::ROLE),
            SchemaAttribute::new(idmu.clone(), "description", "description"),
            SchemaAttribute::new(idmu.clone(), "gid_number", "gidNumber")
                .converter(Converter::Number)
                .claim(claim_types::GID_NUMBER),
            SchemaAttribute::new(idmu.clone(), "member_of", "memberOf").group_membership(),
            SchemaAttribute::primary_group_flag(idmu, "is_primary"),
        ]
    }

    fn set_property(&mut self, property: &str, value: Value) -> Result<(), ConversionError> {
        let mismatch = || mismatch(property);
        match property {
            "id" => self.id = identity_text(value),
            "dn" => self.dn = value.into_text().ok_or_else(mismatch)?,
            "name" => self.name = value.into_text().ok_or_else(mismatch)?,
            "description" => self.description = value.into_text(),
            "gid_number" => self.gid_number = value.as_i64(),
            "member_of" => self.member_of = value.into_text_list().ok_or_else(mismatch)?,
            "is_primary" => self.is_primary = value.as_bool().ok_or_else(mismatch)?,
            _ => return Err(mismatch()),
        }
        Ok(())
    }
}

// ============================================================================
// Login result
// ============================================================================

/// Outcome of a successful login
#[derive(Debug, Clone, Serialize)]
pub struct LoginResult<U = LdapUser, G = LdapGroup> {
    pub user: U,
    pub groups: Vec<G>,
    pub claims: ClaimSet,
}

fn identity_text(value: Value) -> String {
    match value {
        Value::Text(s) => s,
        other => other.to_claim_values().join(","),
    }
}

fn mismatch(property: &str) -> ConversionError {
    ConversionError::InvalidTargetType {
        converter: property.to_string(),
        target: "property type".to_string(),
    }
}
