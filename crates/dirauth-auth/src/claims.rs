//! Typed objects and claims for a user and their groups

use crate::groups::{GroupLookup, GroupResolver, ResolvedGroup};
use crate::types::LoginResult;
use dirauth_core::types::{Claim, ClaimSet, DirectoryEntry, Schema, SchemaMapping};
use dirauth_core::Result;
use dirauth_mapping::{AttributeMap, ClaimFilter, DirectoryObject, EntryMapper};
use std::sync::Arc;
use tracing::{debug, warn};

/// Maps a user entry and its resolved groups to objects and claims
pub struct IdentityMapper<U, G> {
    users: EntryMapper<U>,
    groups: EntryMapper<G>,
    mapping: SchemaMapping,
    primary_group_claim: Option<String>,
    filter: Option<ClaimFilter>,
}

impl<U, G> Clone for IdentityMapper<U, G> {
    fn clone(&self) -> Self {
        Self {
            users: self.users.clone(),
            groups: self.groups.clone(),
            mapping: self.mapping.clone(),
            primary_group_claim: self.primary_group_claim.clone(),
            filter: self.filter.clone(),
        }
    }
}

impl<U: DirectoryObject, G: DirectoryObject> IdentityMapper<U, G> {
    /// Mapper using the declaration tables of `U` and `G`
    pub fn for_schema(schema: &Schema, mapping: SchemaMapping) -> Result<Self> {
        Ok(Self::new(
            AttributeMap::for_schema(schema)?,
            AttributeMap::for_schema(schema)?,
            mapping,
        ))
    }

    pub fn new(users: AttributeMap<U>, groups: AttributeMap<G>, mapping: SchemaMapping) -> Self {
        Self {
            users: EntryMapper::new(users),
            groups: EntryMapper::new(groups),
            mapping,
            primary_group_claim: None,
            filter: None,
        }
    }

    /// Emit the primary group's identity under `claim_type`
    pub fn with_primary_group_claim(mut self, claim_type: Option<String>) -> Self {
        self.primary_group_claim = claim_type;
        self
    }

    /// Keep only claims accepted by `filter`
    pub fn with_claim_filter(mut self, filter: ClaimFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn users(&self) -> &EntryMapper<U> {
        &self.users
    }

    pub fn groups(&self) -> &EntryMapper<G> {
        &self.groups
    }

    /// Attributes to request for user entries
    pub fn user_attributes(&self) -> Vec<String> {
        let mut attributes = self.users.attribute_map().directory_attributes();
        let extra = [
            Some(&self.mapping.group_membership_attribute),
            self.mapping.primary_group_attribute.as_ref(),
            self.mapping.primary_group_search_attribute.as_ref(),
        ];
        for name in extra.into_iter().flatten() {
            if !attributes.iter().any(|a| a.eq_ignore_ascii_case(name)) {
                attributes.push(name.clone());
            }
        }
        attributes
    }

    /// Attributes to request for group entries
    pub fn group_attributes(&self) -> Vec<String> {
        self.groups.attribute_map().directory_attributes()
    }

    pub fn resolver(&self, lookup: Arc<dyn GroupLookup>) -> GroupResolver {
        GroupResolver::new(lookup, self.mapping.clone(), self.group_attributes())
    }

    /// Groups as typed objects; entries that fail to map are skipped
    pub fn group_objects(&self, groups: &[ResolvedGroup]) -> Vec<G> {
        groups
            .iter()
            .filter_map(|group| {
                match self.groups.to_object_with_flag(&group.entry, group.primary) {
                    Ok(object) => Some(object),
                    Err(e) => {
                        warn!("Skipping group {}: {}", group.entry.dn, e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Union of the user's claims and every group's claims
    pub fn claims(&self, user: &DirectoryEntry, groups: &[ResolvedGroup]) -> ClaimSet {
        let filter = self.filter.as_ref();
        let mut claims: ClaimSet = self.users.claims(user, filter).into_iter().collect();

        for group in groups {
            claims.extend(self.groups.claims(&group.entry, filter));
        }

        if let Some(claim_type) = &self.primary_group_claim {
            let primary = groups
                .iter()
                .find(|g| g.primary)
                .and_then(|g| self.groups.identity(&g.entry));
            if let Some(value) = primary {
                if filter.map_or(true, |f| f(claim_type, &value)) {
                    claims.insert(Claim::new(claim_type.clone(), value));
                }
            }
        }

        debug!("Built {} claims for {}", claims.len(), user.dn);
        claims
    }

    /// Object, groups and claims for a user entry.
    ///
    /// Failures of single groups are contained. A user entry that cannot
    /// be mapped, or a cancelled resolution, fails the whole call.
    pub async fn load(
        &self,
        lookup: Arc<dyn GroupLookup>,
        entry: &DirectoryEntry,
        recursive: bool,
    ) -> Result<LoginResult<U, G>> {
        let user = self.users.to_object(entry)?;
        let resolved = self.resolver(lookup).resolve(entry, recursive).collect().await?;

        Ok(LoginResult {
            user,
            groups: self.group_objects(&resolved),
            claims: self.claims(entry, &resolved),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LdapGroup, LdapUser};
    use dirauth_core::types::claim_types;

    fn mapper() -> IdentityMapper<LdapUser, LdapGroup> {
        let schema = Schema::ActiveDirectory;
        IdentityMapper::for_schema(&schema, SchemaMapping::defaults_for(&schema).unwrap()).unwrap()
    }

    fn user() -> DirectoryEntry {
        DirectoryEntry::new("CN=Jane,OU=Users,DC=example,DC=com")
            .with_attr("objectSid", ["S-1-5-21-1-2-3-1104"])
            .with_attr("sAMAccountName", ["jane"])
            .with_attr("mail", ["jane@example.com"])
    }

    fn group(name: &str, rid: u32, primary: bool) -> ResolvedGroup {
        ResolvedGroup {
            entry: DirectoryEntry::new(format!("CN={},DC=example,DC=com", name))
                .with_attr("objectSid", [format!("S-1-5-21-1-2-3-{}", rid)])
                .with_attr("cn", [name]),
            primary,
        }
    }

    #[test]
    fn test_claims_union() {
        let groups = vec![group("Domain Users", 513, true), group("Admins", 2001, false)];
        let claims = mapper().claims(&user(), &groups);

        assert!(claims.contains(claim_types::SID, "S-1-5-21-1-2-3-1104"));
        assert!(claims.contains(claim_types::EMAIL, "jane@example.com"));
        assert!(claims.contains(claim_types::ROLE, "Admins"));
        assert!(claims.contains(claim_types::ROLE, "Domain Users"));
        assert!(claims.contains(claim_types::GROUP_SID, "S-1-5-21-1-2-3-2001"));
        assert_eq!(claims.values_of(claim_types::PRIMARY_GROUP_SID).count(), 0);
    }

    #[test]
    fn test_primary_group_claim() {
        let groups = vec![group("Domain Users", 513, true), group("Admins", 2001, false)];
        let claims = mapper()
            .with_primary_group_claim(Some(claim_types::PRIMARY_GROUP_SID.to_string()))
            .claims(&user(), &groups);

        let primary: Vec<&str> = claims.values_of(claim_types::PRIMARY_GROUP_SID).collect();
        assert_eq!(primary, vec!["S-1-5-21-1-2-3-513"]);
    }

    #[test]
    fn test_claim_filter_applies_to_groups() {
        let filter: ClaimFilter = Arc::new(|claim_type: &str, _: &str| claim_type != claim_types::GROUP_SID);
        let claims = mapper()
            .with_claim_filter(filter)
            .claims(&user(), &[group("Admins", 2001, false)]);

        assert!(claims.contains(claim_types::ROLE, "Admins"));
        assert_eq!(claims.values_of(claim_types::GROUP_SID).count(), 0);
    }

    #[test]
    fn test_duplicate_group_claims_collapse() {
        let groups = vec![group("Admins", 2001, false), group("Admins", 2001, false)];
        let claims = mapper().claims(&user(), &groups);
        assert_eq!(claims.values_of(claim_types::ROLE).count(), 1);
    }

    #[test]
    fn test_group_objects_skip_unmappable() {
        let broken = ResolvedGroup {
            entry: DirectoryEntry::new("CN=Broken,DC=example,DC=com").with_attr("cn", ["Broken"]),
            primary: false,
        };
        let groups = mapper().group_objects(&[group("Admins", 2001, false), broken]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Admins");
    }

    #[test]
    fn test_user_attributes_include_mapping_attributes() {
        let attributes = mapper().user_attributes();
        for name in ["objectSid", "sAMAccountName", "memberOf", "primaryGroupID"] {
            assert!(attributes.iter().any(|a| a == name), "missing {}", name);
        }
    }
}
