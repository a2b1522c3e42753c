//! Dirauth Directory - sessions, server selection and caching
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    SessionManager                        │
//! │   servers ─▶ selection policy ─▶ blacklist (lazy expiry) │
//! └───────────────┬──────────────────────────────────────────┘
//!                 │ connect + bind
//!                 ▼
//!        ┌─────────────────┐          ┌──────────────────┐
//!        │ DirectoryClient │◀─────────│ LdapDirectoryClient (ldap3)
//!        │   (trait)       │◀─────────│ MemoryDirectory  │
//!        └────────┬────────┘          └──────────────────┘
//!                 ▼
//!             Session ──▶ paged search ──▶ EntryCache
//! ```
//!
//! # Features
//!
//! - **Failover / round-robin** server selection
//! - **Time-bounded blacklisting** of unreachable servers
//! - **Paged searches** with cancellation and timeouts
//! - **Entry cache** with fixed or sliding expiration

mod cache;
mod client;
pub mod filter;
mod ldap;
mod memory;
pub mod metrics;
mod session;

pub use cache::{CacheKey, EntryCache};
pub use client::{
    CertificateVerifier, DirectoryClient, DirectoryConnection, Modification, PeerCertificate,
    SearchPage, SearchRequest, TlsOptions,
};
pub use ldap::LdapDirectoryClient;
pub use memory::MemoryDirectory;
pub use session::{ServerState, Session, SessionManager};

// Re-export types from core
pub use dirauth_core::config::{CachePolicy, SelectionPolicy};
pub use dirauth_core::types::{DirectoryEntry, SearchBase, SearchScope};
