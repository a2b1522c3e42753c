//! Security claims

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Well-known claim types used by the stock user and group declarations
pub mod claim_types {
    pub const SID: &str = "sid";
    pub const NAME: &str = "name";
    pub const DISPLAY_NAME: &str = "display_name";
    pub const EMAIL: &str = "email";
    pub const UPN: &str = "upn";
    pub const UID_NUMBER: &str = "uid_number";
    pub const ROLE: &str = "role";
    pub const GROUP_SID: &str = "group_sid";
    pub const GID_NUMBER: &str = "gid_number";
    pub const PRIMARY_GROUP_SID: &str = "primary_group_sid";
}

/// A (type, value) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.claim_type, self.value)
    }
}

/// Insertion-ordered claim collection that collapses duplicate pairs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClaimSet {
    claims: Vec<Claim>,
    #[serde(skip)]
    seen: HashSet<Claim>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a claim; returns false when the pair was already present
    pub fn insert(&mut self, claim: Claim) -> bool {
        if self.seen.contains(&claim) {
            return false;
        }
        self.seen.insert(claim.clone());
        self.claims.push(claim);
        true
    }

    pub fn contains(&self, claim_type: &str, value: &str) -> bool {
        self.claims
            .iter()
            .any(|c| c.claim_type == claim_type && c.value == value)
    }

    /// All values carried by one claim type
    pub fn values_of<'a>(&'a self, claim_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.claims
            .iter()
            .filter(move |c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Claim> {
        self.claims.iter()
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn into_vec(self) -> Vec<Claim> {
        self.claims
    }
}

impl Extend<Claim> for ClaimSet {
    fn extend<T: IntoIterator<Item = Claim>>(&mut self, iter: T) {
        for claim in iter {
            self.insert(claim);
        }
    }
}

impl FromIterator<Claim> for ClaimSet {
    fn from_iter<T: IntoIterator<Item = Claim>>(iter: T) -> Self {
        let mut set = ClaimSet::new();
        set.extend(iter);
        set
    }
}
