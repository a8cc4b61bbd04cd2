//! Contact sync implementation

use anyhow::{Context, Result};
use std::time::Instant;

use crate::provider::ContactProvider;
use crate::storage::ContactStore;

/// Statistics from a sync operation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Number of contacts fetched from the provider
    pub contacts_fetched: usize,
    /// Number of local files written
    pub contacts_written: usize,
    /// Duration of the sync operation
    pub duration_ms: u64,
}

/// Fetch every provider contact and overwrite its local file.
///
/// Written files are stamped with the sync time and are not pushed back to
/// the provider. The first write failure aborts the sync.
pub fn sync_contacts(provider: &dyn ContactProvider, store: &ContactStore) -> Result<SyncStats> {
    let start = Instant::now();
    let mut stats = SyncStats::default();

    let remote = provider
        .fetch_contacts()
        .context("Failed to fetch remote contacts")?;
    stats.contacts_fetched = remote.len();

    for contact in remote {
        let name = contact.full_name().to_string();
        store
            .write_synced(contact)
            .with_context(|| format!("Failed to write local contact {:?}", name))?;
        stats.contacts_written += 1;
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    log::info!(
        "Synced {} contacts in {}ms",
        stats.contacts_written,
        stats.duration_ms
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Contact, ContactId};
    use crate::vcard;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct FixedProvider {
        contacts: Vec<Contact>,
        pushes: Mutex<usize>,
    }

    impl FixedProvider {
        fn new(contacts: Vec<Contact>) -> Self {
            Self {
                contacts,
                pushes: Mutex::new(0),
            }
        }
    }

    impl ContactProvider for FixedProvider {
        fn fetch_contacts(&self) -> Result<Vec<Contact>> {
            Ok(self.contacts.clone())
        }

        fn write_contact(&self, _contact: &Contact) -> Result<()> {
            *self.pushes.lock().unwrap() += 1;
            Ok(())
        }

        fn delete_contact(&self, _id: &str) -> Result<()> {
            Ok(())
        }
    }

    struct FailingProvider;

    impl ContactProvider for FailingProvider {
        fn fetch_contacts(&self) -> Result<Vec<Contact>> {
            anyhow::bail!("network down")
        }

        fn write_contact(&self, _contact: &Contact) -> Result<()> {
            Ok(())
        }

        fn delete_contact(&self, _id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn remote(id: &str, name: &str) -> Contact {
        Contact {
            id: Some(ContactId::provider(id)),
            formatted_name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_sync_twice_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = ContactStore::new(dir.path(), None).unwrap();
        let provider = FixedProvider::new(vec![remote("c1", "One"), remote("c2", "Two")]);

        let first = sync_contacts(&provider, &store).unwrap();
        assert_eq!(first.contacts_fetched, 2);

        // Age the stamp so the next sync must replace it
        let stale = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let mut before = store.get("c1").unwrap().unwrap();
        before.last_synced = Some(stale);
        fs::write(store.dir().join("c1.vcf"), vcard::encode(&before)).unwrap();

        let second = sync_contacts(&provider, &store).unwrap();
        assert_eq!(second.contacts_written, 2);

        let contacts = store.list().unwrap();
        assert_eq!(contacts.len(), 2);
        assert!(contacts.iter().all(|c| c.last_synced.is_some()));
        assert_eq!(*provider.pushes.lock().unwrap(), 0);

        let mut after = store.get("c1").unwrap().unwrap();
        assert!(after.last_synced.unwrap() > stale);
        after.last_synced = None;
        before.last_synced = None;
        assert_eq!(after, before);
    }

    #[test]
    fn test_sync_overwrites_local_edits_and_keeps_local_only() {
        let dir = tempdir().unwrap();
        let store = ContactStore::new(dir.path(), None).unwrap();
        let local = store.write(Contact::new("Local Only")).unwrap();

        let mut edited = remote("c1", "Edited Locally");
        edited.note = Some("local note".to_string());
        store.write(edited).unwrap();

        let provider = FixedProvider::new(vec![remote("c1", "Remote Name")]);
        sync_contacts(&provider, &store).unwrap();

        let synced = store.get("c1").unwrap().unwrap();
        assert_eq!(synced.formatted_name, "Remote Name");
        assert!(synced.note.is_none());
        assert!(store.get(local.uid().unwrap().as_str()).unwrap().is_some());
    }

    #[test]
    fn test_fetch_failure_is_reported() {
        let dir = tempdir().unwrap();
        let store = ContactStore::new(dir.path(), None).unwrap();

        let err = sync_contacts(&FailingProvider, &store).unwrap_err();
        assert!(format!("{:#}", err).contains("network down"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_write_failure_aborts() {
        let dir = tempdir().unwrap();
        let store = ContactStore::new(dir.path(), None).unwrap();
        let provider = FixedProvider::new(vec![
            remote("c1", "Good"),
            remote("../bad", "Bad"),
            remote("c3", "Never"),
        ]);

        let err = sync_contacts(&provider, &store).unwrap_err();
        assert!(format!("{:#}", err).contains("Bad"));
        assert!(store.get("c1").unwrap().is_some());
        assert!(store.get("c3").unwrap().is_none());
    }
}
