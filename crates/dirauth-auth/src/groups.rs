//! Group membership resolution
//!
//! Walks the membership graph of one entry depth-first. The graph may
//! contain cycles; a visited set of lower-cased DNs, scoped to one
//! traversal, keeps every group from being expanded or yielded twice.

use async_trait::async_trait;
use dirauth_core::types::{DirectoryEntry, SchemaMapping};
use dirauth_core::{Error, Result};
use dirauth_mapping::{Converter, TargetType};
use futures::Stream;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of group entries
#[async_trait]
pub trait GroupLookup: Send + Sync {
    /// Group whose `attribute` equals `value`
    async fn find_group(
        &self,
        attribute: &str,
        value: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryEntry>>;
}

/// A group produced by a traversal
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGroup {
    pub entry: DirectoryEntry,
    /// Reached through the primary group attribute
    pub primary: bool,
}

/// Creates traversals for entries
#[derive(Clone)]
pub struct GroupResolver {
    lookup: Arc<dyn GroupLookup>,
    mapping: Arc<SchemaMapping>,
    attributes: Arc<Vec<String>>,
}

impl GroupResolver {
    /// `attributes` are requested for every group entry; the membership and
    /// group identity attributes are added when missing
    pub fn new(lookup: Arc<dyn GroupLookup>, mapping: SchemaMapping, attributes: Vec<String>) -> Self {
        let mut attributes = attributes;
        for required in [
            &mapping.group_membership_attribute,
            &mapping.group_identity_attribute,
        ] {
            if !attributes.iter().any(|a| a.eq_ignore_ascii_case(required)) {
                attributes.push(required.clone());
            }
        }

        Self {
            lookup,
            mapping: Arc::new(mapping),
            attributes: Arc::new(attributes),
        }
    }

    /// Lazily resolve the groups of `entry`
    pub fn resolve(&self, entry: &DirectoryEntry, recursive: bool) -> GroupTraversal {
        let mut visited = HashSet::new();
        visited.insert(entry.dn.to_lowercase());

        let mut traversal = GroupTraversal {
            lookup: Arc::clone(&self.lookup),
            mapping: Arc::clone(&self.mapping),
            attributes: Arc::clone(&self.attributes),
            recursive,
            primary: self.primary_group(entry),
            stack: Vec::new(),
            visited,
        };
        traversal.push_memberships(entry);
        traversal
    }

    /// (attribute, value) identifying the entry's primary group
    fn primary_group(&self, entry: &DirectoryEntry) -> Option<(String, String)> {
        let attribute = self.mapping.primary_group_attribute.as_deref()?;
        let search = self.mapping.primary_group_search_attribute.as_deref()?;
        let id = entry.first(attribute)?;

        if !self.mapping.primary_group_is_relative {
            return Some((search.to_string(), id.to_string()));
        }

        // relative id: append to the domain part of the entry's own SID
        let raw = *entry.raw_values(search).first()?;
        let sid = match Converter::Sid.convert(raw, TargetType::Text) {
            Ok(value) => value.into_text()?,
            Err(e) => {
                debug!("Cannot read SID of {}, skipping primary group: {}", entry.dn, e);
                return None;
            }
        };
        let Some((domain, _)) = sid.rsplit_once('-') else {
            debug!("SID {} of {} has no domain part", sid, entry.dn);
            return None;
        };
        Some((search.to_string(), format!("{}-{}", domain, id)))
    }
}

/// One finite, non-restartable walk over a membership graph
pub struct GroupTraversal {
    lookup: Arc<dyn GroupLookup>,
    mapping: Arc<SchemaMapping>,
    attributes: Arc<Vec<String>>,
    recursive: bool,
    primary: Option<(String, String)>,
    stack: Vec<String>,
    visited: HashSet<String>,
}

impl GroupTraversal {
    /// Next group, or `None` when the walk is complete.
    ///
    /// Lookup failures only drop the affected branch. Cancellation and a
    /// disposed session end the walk with an error.
    pub async fn next(&mut self) -> Result<Option<ResolvedGroup>> {
        if let Some((attribute, value)) = self.primary.take() {
            if let Some(entry) = self.lookup(&attribute, &value).await? {
                if self.visit(&entry.dn) {
                    self.expand(&entry);
                    return Ok(Some(ResolvedGroup {
                        entry,
                        primary: true,
                    }));
                }
            }
        }

        while let Some(reference) = self.stack.pop() {
            if self.visited.contains(&reference.to_lowercase()) {
                continue;
            }

            let attribute = self.mapping.group_identity_attribute.clone();
            let Some(entry) = self.lookup(&attribute, &reference).await? else {
                self.visited.insert(reference.to_lowercase());
                continue;
            };
            if !self.visit(&entry.dn) {
                // reached under another identifier
                self.visited.insert(reference.to_lowercase());
                continue;
            }

            self.expand(&entry);
            return Ok(Some(ResolvedGroup {
                entry,
                primary: false,
            }));
        }

        Ok(None)
    }

    /// Drain the traversal; nothing is returned when it was cut short
    pub async fn collect(mut self) -> Result<Vec<ResolvedGroup>> {
        let mut groups = Vec::new();
        while let Some(group) = self.next().await? {
            groups.push(group);
        }
        Ok(groups)
    }

    /// Stream of groups; a terminal error is the last item
    pub fn into_stream(self) -> impl Stream<Item = Result<ResolvedGroup>> + Send {
        futures::stream::unfold(Some(self), |state| async move {
            let mut traversal = state?;
            match traversal.next().await {
                Ok(Some(group)) => Some((Ok(group), Some(traversal))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    async fn lookup(&self, attribute: &str, value: &str) -> Result<Option<DirectoryEntry>> {
        match self.lookup.find_group(attribute, value, &self.attributes).await {
            Ok(Some(entry)) => Ok(Some(entry)),
            Ok(None) => {
                debug!("Group {}={} not found", attribute, value);
                Ok(None)
            }
            Err(e @ (Error::Cancelled | Error::Disposed)) => Err(e),
            Err(e) => {
                warn!("Group lookup {}={} failed: {}", attribute, value, e);
                Ok(None)
            }
        }
    }

    /// Mark a DN visited; false if it already was
    fn visit(&mut self, dn: &str) -> bool {
        self.visited.insert(dn.to_lowercase())
    }

    fn expand(&mut self, group: &DirectoryEntry) {
        if self.recursive {
            self.push_memberships(group);
        }
    }

    fn push_memberships(&mut self, entry: &DirectoryEntry) {
        let Some(references) = entry.text_values(&self.mapping.group_membership_attribute) else {
            return;
        };
        // reversed so the first listed membership is popped first
        for reference in references.iter().rev() {
            if !self.visited.contains(&reference.to_lowercase()) {
                self.stack.push(reference.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirauth_core::types::Schema;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Groups keyed by lower-cased (attribute, value)
    #[derive(Default)]
    struct FakeLookup {
        groups: HashMap<(String, String), DirectoryEntry>,
        failing: HashSet<String>,
        cancelled: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeLookup {
        fn group(mut self, dn: &str, sid: &str, member_of: &[&str]) -> Self {
            let entry = DirectoryEntry::new(dn)
                .with_attr("objectSid", [sid])
                .with_attr("memberOf", member_of.iter().copied());
            self.groups
                .insert(("distinguishedname".into(), dn.to_lowercase()), entry.clone());
            self.groups.insert(("objectsid".into(), sid.to_lowercase()), entry);
            self
        }

        fn failing(mut self, dn: &str) -> Self {
            self.failing.insert(dn.to_lowercase());
            self
        }

        fn cancelled(mut self, dn: &str) -> Self {
            self.cancelled.insert(dn.to_lowercase());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl GroupLookup for FakeLookup {
        async fn find_group(
            &self,
            attribute: &str,
            value: &str,
            _attributes: &[String],
        ) -> Result<Option<DirectoryEntry>> {
            self.calls.lock().push(value.to_string());
            if self.failing.contains(&value.to_lowercase()) {
                return Err(Error::Directory("lookup failed".into()));
            }
            if self.cancelled.contains(&value.to_lowercase()) {
                return Err(Error::Cancelled);
            }
            Ok(self
                .groups
                .get(&(attribute.to_lowercase(), value.to_lowercase()))
                .cloned())
        }
    }

    fn ad_mapping() -> SchemaMapping {
        SchemaMapping::defaults_for(&Schema::ActiveDirectory).unwrap()
    }

    fn resolver(lookup: Arc<FakeLookup>) -> GroupResolver {
        GroupResolver::new(lookup, ad_mapping(), vec!["cn".to_string()])
    }

    fn user(member_of: &[&str]) -> DirectoryEntry {
        DirectoryEntry::new("CN=Jane,OU=Users,DC=example,DC=com")
            .with_attr("objectSid", ["S-1-5-21-1-2-3-1104"])
            .with_attr("memberOf", member_of.iter().copied())
    }

    fn dns(groups: &[ResolvedGroup]) -> Vec<&str> {
        groups.iter().map(|g| g.entry.dn.as_str()).collect()
    }

    #[tokio::test]
    async fn test_direct_and_recursive() {
        let lookup = Arc::new(
            FakeLookup::default()
                .group("CN=G1,DC=x", "S-1-5-21-1-2-3-2001", &["CN=G2,DC=x"])
                .group("CN=G2,DC=x", "S-1-5-21-1-2-3-2002", &[]),
        );
        let resolver = resolver(lookup);

        let direct = resolver.resolve(&user(&["CN=G1,DC=x"]), false).collect().await.unwrap();
        assert_eq!(dns(&direct), vec!["CN=G1,DC=x"]);

        let all = resolver.resolve(&user(&["CN=G1,DC=x"]), true).collect().await.unwrap();
        assert_eq!(dns(&all), vec!["CN=G1,DC=x", "CN=G2,DC=x"]);
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let lookup = Arc::new(
            FakeLookup::default()
                .group("CN=G1,DC=x", "S-1-5-21-1-2-3-2001", &["CN=G2,DC=x"])
                .group("CN=G2,DC=x", "S-1-5-21-1-2-3-2002", &["cn=g1,dc=x"]),
        );
        let all = resolver(lookup.clone())
            .resolve(&user(&["CN=G1,DC=x", "CN=G2,DC=x"]), true)
            .collect()
            .await
            .unwrap();

        assert_eq!(dns(&all), vec!["CN=G1,DC=x", "CN=G2,DC=x"]);
        // each group looked up once
        assert_eq!(lookup.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_and_failing_groups_are_skipped() {
        let lookup = Arc::new(
            FakeLookup::default()
                .group("CN=G1,DC=x", "S-1-5-21-1-2-3-2001", &["CN=Broken,DC=x"])
                .group("CN=G3,DC=x", "S-1-5-21-1-2-3-2003", &[])
                .failing("CN=Broken,DC=x"),
        );
        let all = resolver(lookup)
            .resolve(&user(&["CN=G1,DC=x", "CN=Gone,DC=x", "CN=G3,DC=x"]), true)
            .collect()
            .await
            .unwrap();
        assert_eq!(dns(&all), vec!["CN=G1,DC=x", "CN=G3,DC=x"]);
    }

    #[tokio::test]
    async fn test_no_membership_attribute() {
        let lookup = Arc::new(FakeLookup::default());
        let entry = DirectoryEntry::new("CN=Svc,DC=x");
        let mut traversal = resolver(lookup).resolve(&entry, true);
        assert!(traversal.next().await.unwrap().is_none());
        assert!(traversal.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_primary_group_from_relative_id() {
        let lookup = Arc::new(
            FakeLookup::default()
                .group("CN=Domain Users,DC=x", "S-1-5-21-1-2-3-513", &[])
                .group("CN=G1,DC=x", "S-1-5-21-1-2-3-2001", &[]),
        );
        let entry = user(&["CN=G1,DC=x"]).with_attr("primaryGroupID", ["513"]);

        let all = resolver(lookup).resolve(&entry, false).collect().await.unwrap();
        assert_eq!(dns(&all), vec!["CN=Domain Users,DC=x", "CN=G1,DC=x"]);
        assert!(all[0].primary);
        assert!(!all[1].primary);
    }

    #[tokio::test]
    async fn test_primary_group_also_listed_is_yielded_once() {
        let lookup = Arc::new(
            FakeLookup::default().group("CN=Domain Users,DC=x", "S-1-5-21-1-2-3-513", &[]),
        );
        let entry = user(&["CN=Domain Users,DC=x"]).with_attr("primaryGroupID", ["513"]);

        let all = resolver(lookup).resolve(&entry, true).collect().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].primary);
    }

    #[tokio::test]
    async fn test_primary_group_skipped_without_sid_separator() {
        let lookup = Arc::new(FakeLookup::default());
        let entry = DirectoryEntry::new("CN=Odd,DC=x")
            .with_attr("objectSid", ["garbage"])
            .with_attr("primaryGroupID", ["513"]);

        let all = resolver(lookup.clone()).resolve(&entry, true).collect().await.unwrap();
        assert!(all.is_empty());
        assert!(lookup.calls().is_empty());
    }

    #[tokio::test]
    async fn test_direct_primary_group_for_posix_schemas() {
        let mapping = SchemaMapping::defaults_for(&Schema::Rfc2307).unwrap();
        let group = DirectoryEntry::new("cn=staff,ou=groups,dc=example,dc=org")
            .with_attr("cn", ["staff"])
            .with_attr("gidNumber", ["100"]);

        let mut lookup = FakeLookup::default();
        lookup
            .groups
            .insert(("gidnumber".into(), "100".into()), group);
        let lookup = Arc::new(lookup);

        let entry = DirectoryEntry::new("uid=jdoe,ou=people,dc=example,dc=org")
            .with_attr("gidNumber", ["100"]);
        let resolver = GroupResolver::new(lookup, mapping, Vec::new());
        let all = resolver.resolve(&entry, false).collect().await.unwrap();
        assert_eq!(dns(&all), vec!["cn=staff,ou=groups,dc=example,dc=org"]);
        assert!(all[0].primary);
    }

    #[tokio::test]
    async fn test_stream() {
        let lookup = Arc::new(
            FakeLookup::default()
                .group("CN=G1,DC=x", "S-1-5-21-1-2-3-2001", &["CN=G2,DC=x"])
                .group("CN=G2,DC=x", "S-1-5-21-1-2-3-2002", &[]),
        );
        let groups: Vec<Result<ResolvedGroup>> = resolver(lookup)
            .resolve(&user(&["CN=G1,DC=x"]), true)
            .into_stream()
            .collect()
            .await;
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.is_ok()));
    }

    #[tokio::test]
    async fn test_groups_reached_by_dn_are_yielded() {
        let lookup = Arc::new(
            FakeLookup::default()
                .group("CN=G1,OU=Groups,DC=x", "S-1-5-21-1-2-3-2001", &[])
                .group("CN=G2,OU=Groups,DC=x", "S-1-5-21-1-2-3-2002", &[]),
        );
        let entry = user(&["CN=G1,OU=Groups,DC=x", "cn=g2,ou=groups,dc=x"]);

        let direct = resolver(lookup).resolve(&entry, false).collect().await.unwrap();
        assert_eq!(
            dns(&direct),
            vec!["CN=G1,OU=Groups,DC=x", "CN=G2,OU=Groups,DC=x"]
        );
        assert!(direct.iter().all(|g| !g.primary));
    }

    #[tokio::test]
    async fn test_cancellation_ends_traversal_with_error() {
        let lookup = Arc::new(
            FakeLookup::default()
                .group("CN=G1,DC=x", "S-1-5-21-1-2-3-2001", &["CN=G2,DC=x"])
                .group("CN=G2,DC=x", "S-1-5-21-1-2-3-2002", &[])
                .cancelled("CN=G2,DC=x"),
        );

        let result = resolver(lookup.clone())
            .resolve(&user(&["CN=G1,DC=x", "CN=G3,DC=x"]), true)
            .collect()
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        // nothing looked up after the cancelled branch
        assert_eq!(lookup.calls(), vec!["CN=G1,DC=x", "CN=G2,DC=x"]);
    }

    #[tokio::test]
    async fn test_stream_stops_after_cancellation() {
        let lookup = Arc::new(
            FakeLookup::default()
                .group("CN=G1,DC=x", "S-1-5-21-1-2-3-2001", &[])
                .cancelled("CN=G2,DC=x"),
        );
        let items: Vec<Result<ResolvedGroup>> = resolver(lookup)
            .resolve(&user(&["CN=G1,DC=x", "CN=G2,DC=x", "CN=G3,DC=x"]), false)
            .into_stream()
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(Error::Cancelled)));
    }
}
