//! In-memory directory
//!
//! Backs tests and dry runs. Understands `&`, `|`, `!`, equality and
//! presence filters, base/one/sub scopes, paging and modifications, and
//! lets callers take servers offline.

use crate::client::{
    DirectoryClient, DirectoryConnection, Modification, SearchPage, SearchRequest, TlsOptions,
};
use async_trait::async_trait;
use dirauth_core::types::{DirectoryEntry, SearchScope};
use dirauth_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct MemoryState {
    entries: Vec<DirectoryEntry>,
    /// bind name (lowercased) -> password
    accounts: HashMap<String, String>,
    allow_anonymous: bool,
    unreachable: HashSet<String>,
    busy: HashSet<String>,
    failing_filters: Vec<String>,
    response_delay: Option<Duration>,
    connects: Vec<String>,
    binds: Vec<String>,
    searches: Vec<SearchRequest>,
    modifications: Vec<(String, Vec<Modification>)>,
}

/// Shared in-memory directory; clones see the same data
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&self, entry: DirectoryEntry) {
        self.state.lock().entries.push(entry);
    }

    pub fn with_entry(self, entry: DirectoryEntry) -> Self {
        self.add_entry(entry);
        self
    }

    /// Register credentials accepted by bind
    pub fn add_account(&self, name: &str, password: &str) {
        self.state
            .lock()
            .accounts
            .insert(name.to_lowercase(), password.to_string());
    }

    pub fn with_account(self, name: &str, password: &str) -> Self {
        self.add_account(name, password);
        self
    }

    /// Accept binds with an empty password
    pub fn allow_anonymous(&self, allow: bool) {
        self.state.lock().allow_anonymous = allow;
    }

    /// Refuse connections to `server`
    pub fn set_reachable(&self, server: &str, reachable: bool) {
        let mut state = self.state.lock();
        if reachable {
            state.unreachable.remove(server);
        } else {
            state.unreachable.insert(server.to_string());
        }
    }

    /// Accept connections to `server` but answer binds with "busy"
    pub fn set_busy(&self, server: &str, busy: bool) {
        let mut state = self.state.lock();
        if busy {
            state.busy.insert(server.to_string());
        } else {
            state.busy.remove(server);
        }
    }

    /// Fail searches whose filter contains `fragment`
    pub fn fail_searches_containing(&self, fragment: &str) {
        self.state.lock().failing_filters.push(fragment.to_string());
    }

    /// Delay every search page by `delay`
    pub fn set_response_delay(&self, delay: Option<Duration>) {
        self.state.lock().response_delay = delay;
    }

    /// Servers connected to, in order
    pub fn connects(&self) -> Vec<String> {
        self.state.lock().connects.clone()
    }

    pub fn binds(&self) -> Vec<String> {
        self.state.lock().binds.clone()
    }

    pub fn searches(&self) -> Vec<SearchRequest> {
        self.state.lock().searches.clone()
    }

    pub fn search_count(&self) -> usize {
        self.state.lock().searches.len()
    }

    pub fn modifications(&self) -> Vec<(String, Vec<Modification>)> {
        self.state.lock().modifications.clone()
    }

    pub fn entry(&self, dn: &str) -> Option<DirectoryEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .find(|e| e.dn.eq_ignore_ascii_case(dn))
            .cloned()
    }
}

#[async_trait]
impl DirectoryClient for MemoryDirectory {
    async fn connect(
        &self,
        server: &str,
        _port: u16,
        _tls: &TlsOptions,
    ) -> Result<Box<dyn DirectoryConnection>> {
        let mut state = self.state.lock();
        state.connects.push(server.to_string());
        if state.unreachable.contains(server) {
            return Err(Error::Connection(format!("{} is unreachable", server)));
        }
        Ok(Box::new(MemoryConnection {
            server: server.to_string(),
            directory: self.clone(),
        }))
    }
}

struct MemoryConnection {
    server: String,
    directory: MemoryDirectory,
}

#[async_trait]
impl DirectoryConnection for MemoryConnection {
    async fn bind(&mut self, name: &str, password: &str) -> Result<()> {
        let mut state = self.directory.state.lock();
        state.binds.push(name.to_string());

        if state.busy.contains(&self.server) {
            return Err(Error::Connection(format!("{} is busy", self.server)));
        }
        if password.is_empty() {
            return if state.allow_anonymous {
                Ok(())
            } else {
                Err(Error::AuthenticationFailed(
                    "anonymous bind not allowed".to_string(),
                ))
            };
        }
        match state.accounts.get(&name.to_lowercase()) {
            Some(expected) if expected == password => Ok(()),
            _ => Err(Error::AuthenticationFailed(
                "invalid credentials".to_string(),
            )),
        }
    }

    async fn search_page(
        &mut self,
        request: &SearchRequest,
        cookie: Option<Vec<u8>>,
    ) -> Result<SearchPage> {
        let delay = self.directory.state.lock().response_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = &mut *self.directory.state.lock();
        state.searches.push(request.clone());

        if state
            .failing_filters
            .iter()
            .any(|f| request.filter.contains(f.as_str()))
        {
            return Err(Error::Directory(format!(
                "search {} rejected",
                request.filter
            )));
        }

        let filter = Filter::parse(&request.filter)?;
        let matches: Vec<DirectoryEntry> = state
            .entries
            .iter()
            .filter(|e| in_scope(&e.dn, &request.base, request.scope))
            .filter(|e| filter.matches(e))
            .map(|e| {
                if request.attributes.is_empty() || request.attributes.iter().any(|a| a == "*") {
                    e.clone()
                } else {
                    e.project(&request.attributes)
                }
            })
            .collect();

        let offset = cookie
            .and_then(|c| c.try_into().ok().map(u64::from_le_bytes))
            .unwrap_or(0) as usize;
        let size = request.page_size.max(1) as usize;
        let end = (offset + size).min(matches.len());
        let entries = matches.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let cookie = (end < matches.len()).then(|| (end as u64).to_le_bytes().to_vec());

        Ok(SearchPage { entries, cookie })
    }

    async fn modify(&mut self, dn: &str, modifications: Vec<Modification>) -> Result<()> {
        let state = &mut *self.directory.state.lock();
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.dn.eq_ignore_ascii_case(dn))
            .ok_or_else(|| Error::Directory(format!("no such object: {}", dn)))?;

        for modification in &modifications {
            apply(entry, modification);
        }
        state.modifications.push((dn.to_string(), modifications));
        Ok(())
    }

    async fn unbind(&mut self) -> Result<()> {
        Ok(())
    }
}

fn apply(entry: &mut DirectoryEntry, modification: &Modification) {
    let name = modification.attribute().to_string();
    let values = modification.values();
    let text: Option<Vec<String>> = values
        .iter()
        .map(|v| String::from_utf8(v.clone()).ok())
        .collect();

    match modification {
        Modification::Replace { .. } => {
            entry.attrs.remove(&name);
            entry.bin_attrs.remove(&name);
            if values.is_empty() {
                return;
            }
            match text {
                Some(text) => {
                    entry.attrs.insert(name, text);
                }
                None => {
                    entry.bin_attrs.insert(name, values.to_vec());
                }
            }
        }
        Modification::Add { .. } => match text {
            Some(text) => entry.attrs.entry(name).or_default().extend(text),
            None => entry.bin_attrs.entry(name).or_default().extend(values.iter().cloned()),
        },
        Modification::Delete { .. } if values.is_empty() => {
            entry.attrs.remove(&name);
            entry.bin_attrs.remove(&name);
        }
        Modification::Delete { .. } => {
            if let Some(existing) = entry.attrs.get_mut(&name) {
                existing.retain(|v| !values.iter().any(|d| d == v.as_bytes()));
            }
            if let Some(existing) = entry.bin_attrs.get_mut(&name) {
                existing.retain(|v| !values.contains(v));
            }
        }
    }
}

fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
    let dn = dn.to_lowercase();
    let base = base.to_lowercase();
    match scope {
        SearchScope::Base => dn == base,
        SearchScope::OneLevel => parent(&dn).map_or(false, |p| p == base),
        SearchScope::Subtree => {
            base.is_empty() || dn == base || dn.ends_with(&format!(",{}", base))
        }
    }
}

fn parent(dn: &str) -> Option<&str> {
    dn.split_once(',').map(|(_, rest)| rest)
}

/// Parsed search filter
#[derive(Debug, PartialEq)]
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal(String, String),
    Present(String),
}

impl Filter {
    fn parse(input: &str) -> Result<Self> {
        let mut parser = FilterParser {
            input: input.trim().as_bytes(),
            pos: 0,
        };
        let filter = parser.filter()?;
        if parser.pos != parser.input.len() {
            return Err(parser.error());
        }
        Ok(filter)
    }

    fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Filter::And(parts) => parts.iter().all(|f| f.matches(entry)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(entry)),
            Filter::Not(inner) => !inner.matches(entry),
            Filter::Present(attr) => is_dn_attribute(attr) || entry.has_attribute(attr),
            Filter::Equal(attr, value) => {
                if is_dn_attribute(attr) && entry.dn.eq_ignore_ascii_case(value) {
                    return true;
                }
                let text = entry
                    .text_values(attr)
                    .map_or(false, |vs| vs.iter().any(|v| v.eq_ignore_ascii_case(value)));
                let binary = entry
                    .binary_values(attr)
                    .map_or(false, |vs| vs.iter().any(|v| v.as_slice() == value.as_bytes()));
                text || binary
            }
        }
    }
}

fn is_dn_attribute(attr: &str) -> bool {
    attr.eq_ignore_ascii_case("distinguishedName") || attr.eq_ignore_ascii_case("entryDN")
}

struct FilterParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl FilterParser<'_> {
    fn error(&self) -> Error {
        Error::Directory(format!(
            "invalid filter {:?} at offset {}",
            String::from_utf8_lossy(self.input),
            self.pos
        ))
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.input.get(self.pos) == Some(&byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error())
        }
    }

    fn filter(&mut self) -> Result<Filter> {
        self.expect(b'(')?;
        let filter = match self.input.get(self.pos) {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error()),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>> {
        let mut parts = Vec::new();
        while self.input.get(self.pos) == Some(&b'(') {
            parts.push(self.filter()?);
        }
        Ok(parts)
    }

    fn item(&mut self) -> Result<Filter> {
        let start = self.pos;
        while !matches!(self.input.get(self.pos), Some(b'=') | Some(b')') | None) {
            self.pos += 1;
        }
        let attr = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
        self.expect(b'=')?;

        let mut value = Vec::new();
        let mut wildcard = false;
        while let Some(&byte) = self.input.get(self.pos) {
            match byte {
                b')' => break,
                b'*' => {
                    wildcard = true;
                    self.pos += 1;
                }
                b'\\' => {
                    let hex = self
                        .input
                        .get(self.pos + 1..self.pos + 3)
                        .and_then(|h| std::str::from_utf8(h).ok())
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                        .ok_or_else(|| self.error())?;
                    value.push(hex);
                    self.pos += 3;
                }
                _ => {
                    value.push(byte);
                    self.pos += 1;
                }
            }
        }

        if wildcard && value.is_empty() {
            return Ok(Filter::Present(attr));
        }
        if wildcard {
            // substring matching is not needed by any caller
            return Err(self.error());
        }
        Ok(Filter::Equal(
            attr,
            String::from_utf8_lossy(&value).into_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> MemoryDirectory {
        MemoryDirectory::new()
            .with_entry(
                DirectoryEntry::new("CN=Jane,OU=Users,DC=example,DC=com")
                    .with_attr("objectClass", ["top", "user"])
                    .with_attr("sAMAccountName", ["jane"]),
            )
            .with_entry(
                DirectoryEntry::new("CN=John,OU=Users,DC=example,DC=com")
                    .with_attr("objectClass", ["top", "user"])
                    .with_attr("sAMAccountName", ["john"]),
            )
            .with_entry(
                DirectoryEntry::new("CN=Admins,OU=Groups,DC=example,DC=com")
                    .with_attr("objectClass", ["top", "group"]),
            )
            .with_account("jane", "secret")
    }

    async fn open(directory: &MemoryDirectory) -> Box<dyn DirectoryConnection> {
        directory
            .connect("dc1", 389, &TlsOptions::default())
            .await
            .unwrap()
    }

    #[test]
    fn test_filter_parsing() {
        assert_eq!(
            Filter::parse("(&(objectClass=user)(sAMAccountName=j\\2ane))").unwrap(),
            Filter::And(vec![
                Filter::Equal("objectClass".into(), "user".into()),
                Filter::Equal("sAMAccountName".into(), "j*ne".into()),
            ])
        );
        assert_eq!(
            Filter::parse("(!(mail=*))").unwrap(),
            Filter::Not(Box::new(Filter::Present("mail".into())))
        );
        assert!(Filter::parse("(uid=jane").is_err());
        assert!(Filter::parse("(uid=ja*)").is_err());
    }

    #[test]
    fn test_scopes() {
        let dn = "CN=Jane,OU=Users,DC=example,DC=com";
        assert!(in_scope(dn, "dc=example,dc=com", SearchScope::Subtree));
        assert!(in_scope(dn, "OU=Users,DC=example,DC=com", SearchScope::OneLevel));
        assert!(!in_scope(dn, "DC=example,DC=com", SearchScope::OneLevel));
        assert!(in_scope(dn, dn, SearchScope::Base));
        assert!(!in_scope(dn, "DC=other,DC=com", SearchScope::Subtree));
    }

    #[tokio::test]
    async fn test_bind() {
        let directory = directory();
        let mut conn = open(&directory).await;
        assert!(conn.bind("JANE", "secret").await.is_ok());
        assert!(matches!(
            conn.bind("jane", "wrong").await,
            Err(Error::AuthenticationFailed(_))
        ));
        assert!(conn.bind("jane", "").await.is_err());

        directory.allow_anonymous(true);
        assert!(conn.bind("", "").await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_and_busy() {
        let directory = directory();
        directory.set_reachable("dc1", false);
        assert!(matches!(
            directory.connect("dc1", 389, &TlsOptions::default()).await,
            Err(Error::Connection(_))
        ));

        directory.set_reachable("dc1", true);
        directory.set_busy("dc1", true);
        let mut conn = open(&directory).await;
        assert!(matches!(
            conn.bind("jane", "secret").await,
            Err(Error::Connection(_))
        ));
        assert_eq!(directory.connects(), vec!["dc1", "dc1"]);
    }

    #[tokio::test]
    async fn test_paged_search() {
        let directory = directory();
        let mut conn = open(&directory).await;
        let request = SearchRequest::new(
            "DC=example,DC=com",
            SearchScope::Subtree,
            "(objectClass=user)",
        )
        .page_size(1)
        .attributes(vec!["sAMAccountName".to_string()]);

        let first = conn.search_page(&request, None).await.unwrap();
        assert_eq!(first.entries.len(), 1);
        assert!(!first.entries[0].has_attribute("objectClass"));
        assert!(first.cookie.is_some());

        let second = conn.search_page(&request, first.cookie).await.unwrap();
        assert_eq!(second.entries.len(), 1);
        assert!(second.cookie.is_none());
        assert_eq!(directory.search_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_search() {
        let directory = directory();
        directory.fail_searches_containing("Admins");
        let mut conn = open(&directory).await;
        let request = SearchRequest::new(
            "DC=example,DC=com",
            SearchScope::Subtree,
            "(distinguishedName=CN=Admins,OU=Groups,DC=example,DC=com)",
        );
        assert!(matches!(
            conn.search_page(&request, None).await,
            Err(Error::Directory(_))
        ));
    }

    #[tokio::test]
    async fn test_modify() {
        let directory = directory();
        let mut conn = open(&directory).await;
        let dn = "CN=Jane,OU=Users,DC=example,DC=com";
        conn.modify(
            dn,
            vec![
                Modification::Replace {
                    attribute: "mail".into(),
                    values: vec![b"jane@example.com".to_vec()],
                },
                Modification::Add {
                    attribute: "unicodePwd".into(),
                    values: vec![vec![0xff, 0xfe]],
                },
            ],
        )
        .await
        .unwrap();

        let entry = directory.entry(dn).unwrap();
        assert_eq!(entry.first("mail"), Some("jane@example.com"));
        assert_eq!(entry.binary_values("unicodePwd").unwrap().len(), 1);
        assert_eq!(directory.modifications().len(), 1);

        assert!(conn.modify("CN=Nobody", vec![]).await.is_err());
    }
}
