//! User authentication and password changes

use crate::claims::IdentityMapper;
use crate::context::{close_quietly, DirectoryContext, DirectoryReader};
use crate::groups::GroupLookup;
use crate::password::password_modifications;
use crate::types::{LdapGroup, LdapUser, LoginResult};
use dirauth_core::{Error, Result};
use dirauth_directory::filter::{escape_dn_value, escape_value};
use dirauth_directory::metrics::names;
use dirauth_directory::Session;
use dirauth_mapping::DirectoryObject;
use metrics::counter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Binds users with their own credentials and loads their identity.
///
/// Every login opens a fresh session as the user; group resolution runs
/// over that session so the user's own read rights apply.
pub struct AuthenticationService<U = LdapUser, G = LdapGroup> {
    ctx: Arc<DirectoryContext>,
    identity: IdentityMapper<U, G>,
}

impl AuthenticationService<LdapUser, LdapGroup> {
    pub fn new(ctx: Arc<DirectoryContext>) -> Result<Self> {
        let identity = IdentityMapper::for_schema(&ctx.config.schema, ctx.mapping.clone())?
            .with_primary_group_claim(ctx.config.primary_group_claim.clone());
        Ok(Self::with_mapper(ctx, identity))
    }
}

impl<U: DirectoryObject, G: DirectoryObject> AuthenticationService<U, G> {
    pub fn with_mapper(ctx: Arc<DirectoryContext>, identity: IdentityMapper<U, G>) -> Self {
        Self { ctx, identity }
    }

    pub fn identity_mapper(&self) -> &IdentityMapper<U, G> {
        &self.identity
    }

    /// Authenticate `username` and return the user, their groups and claims
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResult<U, G>> {
        self.login_with_cancellation(username, password, self.ctx.cancel.child_token())
            .await
    }

    /// Like [`login`](Self::login), stopped by `cancel`.
    ///
    /// Pass a child of [`DirectoryContext::cancellation_token`] to also stop
    /// on context shutdown. A cancelled login returns `Cancelled` and no
    /// partial groups or claims.
    pub async fn login_with_cancellation(
        &self,
        username: &str,
        password: &str,
        cancel: CancellationToken,
    ) -> Result<LoginResult<U, G>> {
        let result = self.try_login(username, password, cancel).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(Error::AuthenticationFailed(_)) => "rejected",
            Err(Error::UserNotFound(_)) => "unknown_user",
            Err(Error::Cancelled) => "cancelled",
            Err(_) => "error",
        };
        counter!(names::LOGINS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn try_login(
        &self,
        username: &str,
        password: &str,
        cancel: CancellationToken,
    ) -> Result<LoginResult<U, G>> {
        // an empty password is an anonymous bind on most servers
        if password.is_empty() {
            return Err(Error::AuthenticationFailed("empty password".to_string()));
        }

        let reader = Arc::new(
            self.open_as(username, password)
                .await?
                .with_cancellation(cancel),
        );
        let result = self.load(&reader, username).await;
        close_quietly(&reader).await;

        match &result {
            Ok(_) => info!("User {} logged in via {}", username, reader.server().await),
            Err(e) => warn!("Login of {} failed after bind: {}", username, e),
        }
        result
    }

    async fn load(&self, reader: &Arc<DirectoryReader>, username: &str) -> Result<LoginResult<U, G>> {
        let filter = self.ctx.mapping.build_user_filter(&escape_value(username));
        let entry = reader
            .find_one_uncached(&filter, &self.identity.user_attributes())
            .await?
            .ok_or_else(|| Error::UserNotFound(username.to_string()))?;

        debug!("Resolved {} to {}", username, entry.dn);
        let lookup: Arc<dyn GroupLookup> = reader.clone();
        self.identity
            .load(lookup, &entry, self.ctx.config.recursive_groups)
            .await
    }

    /// Change a user's own password
    pub async fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        if old_password.is_empty() {
            return Err(Error::AuthenticationFailed("empty password".to_string()));
        }
        if new_password.is_empty() {
            return Err(Error::Directory("new password is empty".to_string()));
        }

        let reader = self.open_as(username, old_password).await?;
        let result = self
            .change_password_on(&reader, username, old_password, new_password)
            .await;
        close_quietly(&reader).await;

        if result.is_ok() {
            info!("Password changed for {}", username);
        }
        result
    }

    async fn change_password_on(
        &self,
        reader: &DirectoryReader,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let filter = self.ctx.mapping.build_user_filter(&escape_value(username));
        let entry = reader
            .find_one_uncached(&filter, &[])
            .await?
            .ok_or_else(|| Error::UserNotFound(username.to_string()))?;

        let modifications = password_modifications(
            &self.ctx.config.schema,
            &self.ctx.mapping.password_attribute,
            old_password,
            new_password,
        );
        reader.modify(&entry.dn, modifications).await
    }

    async fn open_as(&self, username: &str, password: &str) -> Result<DirectoryReader> {
        let session: Session = self
            .ctx
            .sessions
            .connect(&self.bind_name(username), password)
            .await?;
        Ok(DirectoryReader::new(Arc::clone(&self.ctx), session))
    }

    fn bind_name(&self, username: &str) -> String {
        match &self.ctx.config.user_bind_template {
            Some(_) => self.ctx.config.user_bind_name(&escape_dn_value(username)),
            None => username.to_string(),
        }
    }
}
