//! Dirauth Core Library
//!
//! Core types, configuration and errors shared by the dirauth directory
//! identity crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::DirauthConfig;
pub use error::{ConversionError, Error, Result};

/// Dirauth version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default LDAP port
pub const DEFAULT_LDAP_PORT: u16 = 389;

/// Default LDAPS port
pub const DEFAULT_LDAPS_PORT: u16 = 636;

/// Default paged search size
pub const DEFAULT_PAGE_SIZE: i32 = 500;
