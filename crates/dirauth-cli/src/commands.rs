//! Subcommand implementations

use anyhow::{Context, Result};
use dirauth_auth::{AuthenticationService, DirectoryContext, SearchService};
use dirauth_core::DirauthConfig;
use dirauth_directory::LdapDirectoryClient;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

fn context(config: &DirauthConfig) -> Result<Arc<DirectoryContext>> {
    let ctx = DirectoryContext::from_config(config, Arc::new(LdapDirectoryClient))
        .context("Invalid directory configuration")?;
    Ok(Arc::new(ctx))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn login(config: &DirauthConfig, username: &str, password: &str) -> Result<()> {
    let service = AuthenticationService::new(context(config)?)?;
    let result = service
        .login(username, password)
        .await
        .with_context(|| format!("Login failed for {}", username))?;
    print_json(&result)
}

pub async fn search(config: &DirauthConfig, filter: &str, attributes: &[String]) -> Result<()> {
    let service = SearchService::new(context(config)?)?;
    let result = service.search(filter, attributes).await;
    service.close().await;

    let entries = result?;
    debug!("{} entries matched {}", entries.len(), filter);
    print_json(&entries)
}

pub async fn groups(config: &DirauthConfig, username: &str, recursive: bool) -> Result<()> {
    let service = SearchService::new(context(config)?)?;
    let result: dirauth_core::Result<Vec<_>> = async {
        let user = service
            .find_user_entry(username)
            .await?
            .ok_or_else(|| dirauth_core::Error::UserNotFound(username.to_string()))?;
        service.groups_of(&user, recursive).await
    }
    .await;
    service.close().await;

    print_json(&result?)
}

pub async fn group(config: &DirauthConfig, dn: &str) -> Result<()> {
    let service = SearchService::new(context(config)?)?;
    let result = service.group(dn).await;
    service.close().await;

    print_json(&result?)
}

pub async fn change_password(
    config: &DirauthConfig,
    username: &str,
    old_password: &str,
    new_password: &str,
) -> Result<()> {
    let service = AuthenticationService::new(context(config)?)?;
    service
        .change_password(username, old_password, new_password)
        .await
        .with_context(|| format!("Password change failed for {}", username))?;
    println!("Password changed for {}", username);
    Ok(())
}

pub fn check_config(config: &DirauthConfig) -> Result<()> {
    config.validate()?;
    let mapping = config.directory.effective_mapping()?;

    #[derive(Serialize)]
    struct Report<'a> {
        servers: &'a [String],
        schema: String,
        mapping: dirauth_core::types::SchemaMapping,
        cache: &'a dirauth_core::config::CacheConfig,
    }

    print_json(&Report {
        servers: &config.directory.servers,
        schema: config.directory.schema.to_string(),
        mapping,
        cache: &config.cache,
    })
}
