//! Directory lookups over the service account

use crate::claims::IdentityMapper;
use crate::context::{close_quietly, DirectoryContext, DirectoryReader};
use crate::groups::{GroupLookup, ResolvedGroup};
use crate::types::{LdapGroup, LdapUser};
use dirauth_core::types::{DirectoryEntry, SchemaMapping};
use dirauth_core::{Error, Result};
use dirauth_directory::filter::escape_value;
use dirauth_mapping::{DirectoryObject, Role};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Typed and raw searches bound as the configured service account.
///
/// The service session is opened on first use and reopened after a
/// connection-class failure.
pub struct SearchService<U = LdapUser, G = LdapGroup> {
    ctx: Arc<DirectoryContext>,
    identity: IdentityMapper<U, G>,
    reader: Mutex<Option<Arc<DirectoryReader>>>,
    closed: AtomicBool,
}

impl SearchService<LdapUser, LdapGroup> {
    pub fn new(ctx: Arc<DirectoryContext>) -> Result<Self> {
        let identity = IdentityMapper::for_schema(&ctx.config.schema, ctx.mapping.clone())?
            .with_primary_group_claim(ctx.config.primary_group_claim.clone());
        Ok(Self::with_mapper(ctx, identity))
    }
}

impl<U: DirectoryObject, G: DirectoryObject> SearchService<U, G> {
    pub fn with_mapper(ctx: Arc<DirectoryContext>, identity: IdentityMapper<U, G>) -> Self {
        Self {
            ctx,
            identity,
            reader: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn identity_mapper(&self) -> &IdentityMapper<U, G> {
        &self.identity
    }

    fn mapping(&self) -> &SchemaMapping {
        &self.ctx.mapping
    }

    /// Matching entries under every base, in base order
    pub async fn search(&self, filter: &str, attributes: &[String]) -> Result<Vec<DirectoryEntry>> {
        self.with_reader(|reader| async move { reader.search(filter, attributes).await })
            .await
    }

    /// First match, taken from the first base that has one
    pub async fn find_one(
        &self,
        filter: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryEntry>> {
        self.with_reader(|reader| async move { reader.find_one(filter, attributes).await })
            .await
    }

    pub async fn find_by_dn(
        &self,
        dn: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryEntry>> {
        self.with_reader(|reader| async move { reader.find_by_dn(dn, attributes).await })
            .await
    }

    /// User whose identity attribute equals `value` (a SID, a uidNumber, ...)
    pub async fn find_by_identity(&self, value: &str) -> Result<Option<U>> {
        let attribute = self
            .identity
            .users()
            .attribute_map()
            .with_role(Role::Identity)
            .and_then(|a| a.attribute.clone())
            .ok_or_else(|| {
                Error::Configuration("User map has no identity attribute".to_string())
            })?;

        let filter = format!("({}={})", attribute, escape_value(value));
        let entry = self.find_one(&filter, &self.identity.user_attributes()).await?;
        entry
            .map(|e| self.identity.users().to_object(&e))
            .transpose()
    }

    /// Raw entry of a user, located with the schema's user filter
    pub async fn find_user_entry(&self, username: &str) -> Result<Option<DirectoryEntry>> {
        let filter = self.mapping().build_user_filter(&escape_value(username));
        self.find_one(&filter, &self.identity.user_attributes()).await
    }

    pub async fn find_user(&self, username: &str) -> Result<Option<U>> {
        self.find_user_entry(username)
            .await?
            .map(|e| self.identity.users().to_object(&e))
            .transpose()
    }

    /// Users matching `filter`; entries that cannot be mapped are skipped
    pub async fn find_users(&self, filter: &str) -> Result<Vec<U>> {
        let entries = self.search(filter, &self.identity.user_attributes()).await?;
        Ok(map_all(entries, |e| self.identity.users().to_object(e)))
    }

    /// Groups matching `filter`; entries that cannot be mapped are skipped
    pub async fn find_groups(&self, filter: &str) -> Result<Vec<G>> {
        let entries = self.search(filter, &self.identity.group_attributes()).await?;
        Ok(map_all(entries, |e| self.identity.groups().to_object(e)))
    }

    /// Group at `dn`; fails with `GroupNotFound` when no entry exists there
    pub async fn group(&self, dn: &str) -> Result<G> {
        let entry = self
            .find_by_dn(dn, &self.identity.group_attributes())
            .await?
            .ok_or_else(|| Error::GroupNotFound(dn.to_string()))?;
        self.identity.groups().to_object(&entry)
    }

    /// Resolved groups of a user entry
    pub async fn resolve_groups(
        &self,
        user: &DirectoryEntry,
        recursive: bool,
    ) -> Result<Vec<ResolvedGroup>> {
        self.with_reader(|reader| async move {
            let lookup: Arc<dyn GroupLookup> = reader;
            self.identity
                .resolver(lookup)
                .resolve(user, recursive)
                .collect()
                .await
        })
        .await
    }

    pub async fn groups_of(&self, user: &DirectoryEntry, recursive: bool) -> Result<Vec<G>> {
        let resolved = self.resolve_groups(user, recursive).await?;
        Ok(self.identity.group_objects(&resolved))
    }

    /// Cancel the searches in flight. Later calls run on a new session.
    pub async fn cancel(&self) {
        let reader = self.reader.lock().await.take();
        if let Some(reader) = reader {
            reader.cancellation_token().cancel();
            close_quietly(&reader).await;
        }
    }

    /// Release the service session; later calls fail with `Disposed`
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let reader = self.reader.lock().await.take();
        if let Some(reader) = reader {
            close_quietly(&reader).await;
        }
    }

    async fn reader(&self) -> Result<Arc<DirectoryReader>> {
        let mut slot = self.reader.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        if let Some(reader) = slot.as_ref() {
            return Ok(Arc::clone(reader));
        }

        let session = self.ctx.sessions.connect_service().await?;
        debug!("Opened service session on {}", session.server());
        let reader = Arc::new(DirectoryReader::new(Arc::clone(&self.ctx), session));
        *slot = Some(Arc::clone(&reader));
        Ok(reader)
    }

    /// Run `op` on the service reader, dropping the reader when the
    /// connection broke underneath it or its token was cancelled
    async fn with_reader<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Arc<DirectoryReader>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let reader = self.reader().await?;
        let result = op(Arc::clone(&reader)).await;

        if let Err(e) = &result {
            if e.is_retryable() || reader.cancellation_token().is_cancelled() {
                warn!("Dropping service session after failure: {}", e);
                let mut slot = self.reader.lock().await;
                if slot.as_ref().map_or(false, |r| Arc::ptr_eq(r, &reader)) {
                    *slot = None;
                }
            }
        }
        result
    }
}

fn map_all<T>(entries: Vec<DirectoryEntry>, map: impl Fn(&DirectoryEntry) -> Result<T>) -> Vec<T> {
    entries
        .iter()
        .filter_map(|entry| match map(entry) {
            Ok(object) => Some(object),
            Err(e) => {
                warn!("Skipping {}: {}", entry.dn, e);
                None
            }
        })
        .collect()
}
