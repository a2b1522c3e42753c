//! Dirauth Auth - directory logins, group resolution and claims
//!
//! Ties the session manager, the entry cache and the mapping engine
//! together:
//!
//! ```text
//!  login(user, pw) ──▶ SessionManager::connect ──▶ DirectoryReader
//!                                                      │
//!                     ┌────────────────────────────────┤
//!                     ▼                                ▼
//!              EntryMapper<U>                 GroupResolver ──▶ EntryCache
//!                     │                                │
//!                     └──────────▶ IdentityMapper ◀────┘
//!                                       │
//!                                       ▼
//!                            LoginResult { user, groups, claims }
//! ```

mod claims;
mod context;
mod groups;
mod password;
mod search;
mod service;
mod types;

pub use claims::IdentityMapper;
pub use context::{DirectoryContext, DirectoryReader};
pub use groups::{GroupLookup, GroupResolver, GroupTraversal, ResolvedGroup};
pub use password::{encode_ad_password, password_modifications};
pub use search::SearchService;
pub use service::AuthenticationService;
pub use types::{LdapGroup, LdapUser, LoginResult};
