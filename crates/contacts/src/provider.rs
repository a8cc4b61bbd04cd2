//! Remote contact provider abstraction

use anyhow::Result;

use crate::models::Contact;

/// A remote contact backend (e.g. Google People API)
///
/// The store pushes writes and deletes through this trait and the sync
/// engine pulls from it. When no provider is configured those pushes are
/// skipped.
pub trait ContactProvider: Send + Sync {
    /// Fetch every remote contact, already translated to records
    fn fetch_contacts(&self) -> Result<Vec<Contact>>;

    /// Create (local id) or update (provider id) a remote contact
    fn write_contact(&self, contact: &Contact) -> Result<()>;

    /// Delete a remote contact by provider id
    fn delete_contact(&self, id: &str) -> Result<()>;
}
