//! LDAP transport over `ldap3`
//!
//! Supports LDAP, LDAPS (SSL), and STARTTLS connections and RFC 2696
//! simple paged results.

use crate::client::{
    DirectoryClient, DirectoryConnection, Modification, SearchPage, SearchRequest, TlsOptions,
};
use async_trait::async_trait;
use dirauth_core::types::{DirectoryEntry, SearchScope};
use dirauth_core::{Error, Result};
use ldap3::controls::{Control, ControlType, PagedResults, RawControl};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapResult, Mod, Scope, SearchEntry};
use std::collections::HashSet;
use tracing::{debug, warn};

// Result codes (RFC 4511, section 4.1.9)
const RC_SUCCESS: u32 = 0;
const RC_NO_SUCH_OBJECT: u32 = 32;
const RC_INVALID_CREDENTIALS: u32 = 49;
const RC_BUSY: u32 = 51;
const RC_UNAVAILABLE: u32 = 52;
const RC_UNWILLING_TO_PERFORM: u32 = 53;

/// [`DirectoryClient`] talking to a real server
#[derive(Debug, Clone, Copy, Default)]
pub struct LdapDirectoryClient;

impl LdapDirectoryClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DirectoryClient for LdapDirectoryClient {
    async fn connect(
        &self,
        server: &str,
        port: u16,
        tls: &TlsOptions,
    ) -> Result<Box<dyn DirectoryConnection>> {
        let scheme = if tls.use_ssl { "ldaps" } else { "ldap" };
        let url = format!("{}://{}:{}", scheme, server, port);

        let mut settings = LdapConnSettings::new()
            .set_conn_timeout(tls.timeout)
            .set_starttls(tls.start_tls);
        if tls.skip_verify {
            settings = settings.set_no_tls_verify(true);
        }
        if tls.verifier.is_some() && (tls.use_ssl || tls.start_tls) {
            warn!(
                "Custom certificate verifier is not supported by the LDAP transport, \
                 using platform verification for {}",
                url
            );
        }

        debug!("Connecting to LDAP server: {}", url);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| Error::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        ldap3::drive!(conn);

        Ok(Box::new(LdapConnection { url, ldap }))
    }
}

struct LdapConnection {
    url: String,
    ldap: Ldap,
}

#[async_trait]
impl DirectoryConnection for LdapConnection {
    async fn bind(&mut self, name: &str, password: &str) -> Result<()> {
        let result = self
            .ldap
            .simple_bind(name, password)
            .await
            .map_err(|e| Error::Connection(format!("Bind to {} failed: {}", self.url, e)))?;

        match result.rc {
            RC_SUCCESS => Ok(()),
            RC_INVALID_CREDENTIALS => {
                Err(Error::AuthenticationFailed("invalid credentials".to_string()))
            }
            RC_UNWILLING_TO_PERFORM => Err(Error::AuthenticationFailed(
                "account disabled or locked".to_string(),
            )),
            RC_BUSY | RC_UNAVAILABLE => Err(Error::Connection(format!(
                "{} is not accepting binds (code {})",
                self.url, result.rc
            ))),
            rc => Err(Error::AuthenticationFailed(format!(
                "bind rejected with code {}: {}",
                rc, result.text
            ))),
        }
    }

    async fn search_page(
        &mut self,
        request: &SearchRequest,
        cookie: Option<Vec<u8>>,
    ) -> Result<SearchPage> {
        let control: RawControl = PagedResults {
            size: request.page_size,
            cookie: cookie.unwrap_or_default(),
        }
        .into();
        let attrs: Vec<&str> = request.attributes.iter().map(String::as_str).collect();

        let ldap3::SearchResult(rs, res) = self
            .ldap
            .with_controls(vec![control])
            .search(&request.base, scope(request.scope), &request.filter, attrs)
            .await
            .map_err(|e| Error::Connection(format!("Search on {} failed: {}", self.url, e)))?;

        match res.rc {
            RC_SUCCESS => {}
            // Base missing on this server: nothing to return from it
            RC_NO_SUCH_OBJECT => {
                debug!("Search base {} does not exist", request.base);
                return Ok(SearchPage::default());
            }
            RC_BUSY | RC_UNAVAILABLE => {
                return Err(Error::Connection(format!(
                    "{} is unavailable (code {})",
                    self.url, res.rc
                )))
            }
            rc => {
                return Err(Error::Directory(format!(
                    "Search {} under {} failed with code {}: {}",
                    request.filter, request.base, rc, res.text
                )))
            }
        }

        let entries = rs
            .into_iter()
            .map(SearchEntry::construct)
            // continuation references carry no dn
            .filter(|e| !e.dn.is_empty())
            .map(|e| DirectoryEntry {
                dn: e.dn,
                attrs: e.attrs,
                bin_attrs: e.bin_attrs,
            })
            .collect();

        Ok(SearchPage {
            entries,
            cookie: paging_cookie(&res),
        })
    }

    async fn modify(&mut self, dn: &str, modifications: Vec<Modification>) -> Result<()> {
        let mods: Vec<Mod<Vec<u8>>> = modifications.into_iter().map(to_mod).collect();

        let result = self
            .ldap
            .modify(dn, mods)
            .await
            .map_err(|e| Error::Connection(format!("Modify on {} failed: {}", self.url, e)))?;

        match result.rc {
            RC_SUCCESS => Ok(()),
            RC_BUSY | RC_UNAVAILABLE => Err(Error::Connection(format!(
                "{} is unavailable (code {})",
                self.url, result.rc
            ))),
            rc => Err(Error::Directory(format!(
                "Modify of {} failed with code {}: {}",
                dn, rc, result.text
            ))),
        }
    }

    async fn unbind(&mut self) -> Result<()> {
        self.ldap
            .unbind()
            .await
            .map_err(|e| Error::Connection(format!("Unbind from {} failed: {}", self.url, e)))
    }
}

fn scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::OneLevel => Scope::OneLevel,
        SearchScope::Subtree => Scope::Subtree,
    }
}

/// Cookie of the paged results response control, `None` once exhausted
fn paging_cookie(result: &LdapResult) -> Option<Vec<u8>> {
    result
        .ctrls
        .iter()
        .find_map(|ctrl| match ctrl {
            Control(Some(ControlType::PagedResults), raw) => {
                Some(raw.parse::<PagedResults>().cookie)
            }
            _ => None,
        })
        .filter(|cookie| !cookie.is_empty())
}

fn to_mod(modification: Modification) -> Mod<Vec<u8>> {
    fn set(values: Vec<Vec<u8>>) -> HashSet<Vec<u8>> {
        values.into_iter().collect()
    }

    match modification {
        Modification::Add { attribute, values } => Mod::Add(attribute.into_bytes(), set(values)),
        Modification::Delete { attribute, values } => {
            Mod::Delete(attribute.into_bytes(), set(values))
        }
        Modification::Replace { attribute, values } => {
            Mod::Replace(attribute.into_bytes(), set(values))
        }
    }
}
