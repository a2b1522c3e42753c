//! Shared directory state and cached reads over one session

use crate::groups::GroupLookup;
use async_trait::async_trait;
use dirauth_core::config::{CacheConfig, DirectoryConfig};
use dirauth_core::types::{DirectoryEntry, SchemaMapping, SearchBase, SearchScope};
use dirauth_core::{DirauthConfig, Error, Result};
use dirauth_directory::filter::escape_value;
use dirauth_directory::{
    CacheKey, DirectoryClient, EntryCache, Modification, SearchRequest, Session, SessionManager,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything the services share: configuration, the resolved schema
/// mapping, the session manager and the entry cache
pub struct DirectoryContext {
    pub(crate) config: DirectoryConfig,
    pub(crate) mapping: SchemaMapping,
    pub(crate) sessions: SessionManager,
    pub(crate) cache: EntryCache<Vec<DirectoryEntry>>,
    pub(crate) cancel: CancellationToken,
}

impl DirectoryContext {
    pub fn new(
        config: DirectoryConfig,
        cache: &CacheConfig,
        client: Arc<dyn DirectoryClient>,
    ) -> Result<Self> {
        config.validate()?;
        cache.validate()?;
        let mapping = config.effective_mapping()?;

        Ok(Self {
            sessions: SessionManager::new(&config, client),
            cache: EntryCache::from_config(cache),
            cancel: CancellationToken::new(),
            mapping,
            config,
        })
    }

    pub fn from_config(config: &DirauthConfig, client: Arc<dyn DirectoryClient>) -> Result<Self> {
        Self::new(config.directory.clone(), &config.cache, client)
    }

    /// Replace the session manager, e.g. to install a certificate verifier
    pub fn with_sessions(mut self, sessions: SessionManager) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn mapping(&self) -> &SchemaMapping {
        &self.mapping
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn cache(&self) -> &EntryCache<Vec<DirectoryEntry>> {
        &self.cache
    }

    /// Shutdown token. Readers observe child tokens of it, so cancelling
    /// it stops every search made through this context.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Searches the configured bases over one bound session
pub struct DirectoryReader {
    ctx: Arc<DirectoryContext>,
    session: Mutex<Session>,
    cancel: CancellationToken,
}

impl DirectoryReader {
    /// Reader cancelled along with the context
    pub fn new(ctx: Arc<DirectoryContext>, session: Session) -> Self {
        let cancel = ctx.cancel.child_token();
        Self {
            ctx,
            session: Mutex::new(session),
            cancel,
        }
    }

    /// Observe `cancel` instead of a child of the context token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn server(&self) -> String {
        self.session.lock().await.server().to_string()
    }

    /// Matches under every base, in base order
    pub async fn search(&self, filter: &str, attributes: &[String]) -> Result<Vec<DirectoryEntry>> {
        let mut entries = Vec::new();
        for base in &self.ctx.config.search_bases {
            entries.extend(self.search_base(base, filter, attributes).await?);
        }
        Ok(entries)
    }

    /// First match of the first base that has one
    pub async fn find_one(
        &self,
        filter: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryEntry>> {
        for base in &self.ctx.config.search_bases {
            if let Some(entry) = self
                .search_base(base, filter, attributes)
                .await?
                .into_iter()
                .next()
            {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Like [`find_one`](Self::find_one), bypassing the cache
    pub async fn find_one_uncached(
        &self,
        filter: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryEntry>> {
        for base in &self.ctx.config.search_bases {
            if let Some(entry) = self
                .run(base, filter, attributes)
                .await?
                .into_iter()
                .next()
            {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    pub async fn find_by_dn(
        &self,
        dn: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryEntry>> {
        let base = SearchBase::new(dn, SearchScope::Base);
        Ok(self
            .search_base(&base, "(objectClass=*)", attributes)
            .await?
            .into_iter()
            .next())
    }

    /// One base, through the entry cache
    pub async fn search_base(
        &self,
        base: &SearchBase,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<DirectoryEntry>> {
        let key = CacheKey::new(filter, &self.ctx.config.schema, attributes)
            .within(&base.dn, base.scope);
        self.ctx
            .cache
            .get_or_add(key, || self.run(base, filter, attributes))
            .await
    }

    pub async fn modify(&self, dn: &str, modifications: Vec<Modification>) -> Result<()> {
        self.session.lock().await.modify(dn, modifications).await
    }

    pub async fn close(&self) -> Result<()> {
        self.session.lock().await.close().await
    }

    async fn run(
        &self,
        base: &SearchBase,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<DirectoryEntry>> {
        let request = SearchRequest::new(base.dn.clone(), base.scope, filter)
            .attributes(attributes.to_vec())
            .page_size(self.ctx.config.page_size);

        debug!("Searching {} under {} ({})", filter, base.dn, base.scope);

        let mut session = self.session.lock().await;
        session
            .search(
                &request,
                &self.cancel,
                self.ctx.config.polling_interval(),
                self.ctx.config.timeout(),
            )
            .await
    }
}

#[async_trait]
impl GroupLookup for DirectoryReader {
    async fn find_group(
        &self,
        attribute: &str,
        value: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryEntry>> {
        let filter = self
            .ctx
            .mapping
            .build_group_filter(attribute, &escape_value(value));
        self.find_one(&filter, attributes).await
    }
}

/// Close a reader, logging instead of failing
pub(crate) async fn close_quietly(reader: &DirectoryReader) {
    match reader.close().await {
        Ok(()) | Err(Error::Disposed) => {}
        Err(e) => warn!("Failed to close directory session: {}", e),
    }
}
