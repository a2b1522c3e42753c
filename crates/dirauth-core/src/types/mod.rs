//! Core types for Dirauth

mod claim;
mod entry;
mod schema;

pub use claim::*;
pub use entry::*;
pub use schema::*;
