//! Directory transport seam
//!
//! [`DirectoryClient`] opens connections, [`DirectoryConnection`] carries
//! the four operations the identity layer needs. Implementations report
//! failures with these variants:
//!
//! - unreachable server, broken transport, server busy: `Error::Connection`
//! - credentials rejected by the server: `Error::AuthenticationFailed`
//! - any other operation failure: `Error::Directory`

use async_trait::async_trait;
use dirauth_core::types::{DirectoryEntry, SearchScope};
use dirauth_core::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Certificate presented by a server during the TLS handshake
#[derive(Debug, Clone, Copy)]
pub struct PeerCertificate<'a> {
    pub server_name: &'a str,
    /// DER encoded end-entity certificate
    pub end_entity: &'a [u8],
    /// DER encoded intermediates
    pub intermediates: &'a [Vec<u8>],
}

/// Caller supplied server certificate check
pub trait CertificateVerifier: Send + Sync {
    fn verify(&self, certificate: &PeerCertificate<'_>) -> bool;
}

impl<F> CertificateVerifier for F
where
    F: Fn(&PeerCertificate<'_>) -> bool + Send + Sync,
{
    fn verify(&self, certificate: &PeerCertificate<'_>) -> bool {
        self(certificate)
    }
}

/// Transport security settings for new connections
#[derive(Clone, Default)]
pub struct TlsOptions {
    /// Connect with ldaps://
    pub use_ssl: bool,
    pub start_tls: bool,
    pub skip_verify: bool,
    pub verifier: Option<Arc<dyn CertificateVerifier>>,
    /// Connect timeout handed to the transport
    pub timeout: Duration,
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("use_ssl", &self.use_ssl)
            .field("start_tls", &self.start_tls)
            .field("skip_verify", &self.skip_verify)
            .field("verifier", &self.verifier.as_ref().map(|_| "<custom>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// One attribute modification; values are raw bytes so binary attributes
/// such as `unicodePwd` can be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    Add { attribute: String, values: Vec<Vec<u8>> },
    /// Empty `values` removes the whole attribute
    Delete { attribute: String, values: Vec<Vec<u8>> },
    Replace { attribute: String, values: Vec<Vec<u8>> },
}

impl Modification {
    pub fn attribute(&self) -> &str {
        match self {
            Modification::Add { attribute, .. }
            | Modification::Delete { attribute, .. }
            | Modification::Replace { attribute, .. } => attribute,
        }
    }

    pub fn values(&self) -> &[Vec<u8>] {
        match self {
            Modification::Add { values, .. }
            | Modification::Delete { values, .. }
            | Modification::Replace { values, .. } => values,
        }
    }
}

/// A search, run page by page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: SearchScope,
    pub filter: String,
    /// Empty means all user attributes
    pub attributes: Vec<String>,
    pub page_size: i32,
}

impl SearchRequest {
    pub fn new(base: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope,
            filter: filter.into(),
            attributes: Vec::new(),
            page_size: dirauth_core::DEFAULT_PAGE_SIZE,
        }
    }

    pub fn attributes(mut self, attributes: Vec<String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size;
        self
    }
}

/// One page of search results
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub entries: Vec<DirectoryEntry>,
    /// Continuation cookie; `None` on the last page
    pub cookie: Option<Vec<u8>>,
}

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn connect(
        &self,
        server: &str,
        port: u16,
        tls: &TlsOptions,
    ) -> Result<Box<dyn DirectoryConnection>>;
}

#[async_trait]
pub trait DirectoryConnection: Send {
    /// Simple bind; an empty password is an anonymous bind
    async fn bind(&mut self, name: &str, password: &str) -> Result<()>;

    async fn search_page(
        &mut self,
        request: &SearchRequest,
        cookie: Option<Vec<u8>>,
    ) -> Result<SearchPage>;

    async fn modify(&mut self, dn: &str, modifications: Vec<Modification>) -> Result<()>;

    async fn unbind(&mut self) -> Result<()>;
}
