//! Local contact storage
//!
//! One vCard file per contact under `<root>/people`, named by identifier.
//! A configured [`crate::ContactProvider`] receives every write and delete.

mod file;

pub use file::ContactStore;

/// Store errors callers may want to match on
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Contact not found: {0}")]
    NotFound(String),
}
