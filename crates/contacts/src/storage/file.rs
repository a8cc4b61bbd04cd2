//! File-backed contact store

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DurationRound, TimeDelta, Utc};

use super::StoreError;
use crate::models::{Contact, ContactId};
use crate::provider::ContactProvider;
use crate::vcard;

const PEOPLE_DIR: &str = "people";
const EXTENSION: &str = "vcf";

/// Contact storage with optional provider push
///
/// Directory structure:
/// ```text
/// <root>/
///   people/
///     c8372615930416.vcf                        # provider contact
///     0f5c2d9e-8a41-4a7b-9d7e-3b1f6c2a9e10.vcf  # local contact
/// ```
pub struct ContactStore {
    dir: PathBuf,
    provider: Option<Arc<dyn ContactProvider>>,
}

impl ContactStore {
    /// Open (creating if needed) the store under `root`
    pub fn new(root: impl AsRef<Path>, provider: Option<Arc<dyn ContactProvider>>) -> Result<Self> {
        let dir = root.as_ref().join(PEOPLE_DIR);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create contacts directory: {}", dir.display()))?;
        Ok(Self { dir, provider })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn provider(&self) -> Option<&Arc<dyn ContactProvider>> {
        self.provider.as_ref()
    }

    /// File path for an identifier, or `None` if it cannot be a plain file name
    fn path_for(&self, id: &str) -> Option<PathBuf> {
        if id.is_empty() || id.starts_with('.') || id.contains(['/', '\\']) {
            return None;
        }
        Some(self.dir.join(format!("{}.{}", id, EXTENSION)))
    }

    /// Load a contact by identifier; a missing file is `Ok(None)`
    pub fn get(&self, id: &str) -> Result<Option<Contact>> {
        let Some(path) = self.path_for(id) else {
            return Ok(None);
        };
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read contact file: {}", path.display()));
            }
        };
        let contact = vcard::decode(&data)
            .with_context(|| format!("Failed to parse contact file: {}", path.display()))?;
        Ok(Some(with_file_id(contact, id)))
    }

    /// Load every stored contact, in directory order
    pub fn list(&self) -> Result<Vec<Contact>> {
        let entries = fs::read_dir(&self.dir).with_context(|| {
            format!("Failed to read contacts directory: {}", self.dir.display())
        })?;

        let mut contacts = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(EXTENSION)
            {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let data = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read contact file: {}", path.display()))?;
            let contact = vcard::decode(&data)
                .with_context(|| format!("Failed to parse contact file: {}", path.display()))?;
            contacts.push(with_file_id(contact, stem));
        }
        Ok(contacts)
    }

    /// First contact whose display name matches, ignoring case
    pub fn find_by_name(&self, name: &str) -> Result<Option<Contact>> {
        let name = name.to_lowercase();
        Ok(self
            .list()?
            .into_iter()
            .find(|c| c.full_name().to_lowercase() == name))
    }

    /// Display names starting with `prefix`, ignoring case, sorted
    pub fn names_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_lowercase();
        let mut names: Vec<String> = self
            .list()?
            .into_iter()
            .map(|c| c.formatted_name)
            .filter(|name| !name.is_empty() && name.to_lowercase().starts_with(&prefix))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Look up by identifier, falling back to a display-name match
    pub fn resolve(&self, query: &str) -> Result<Option<Contact>> {
        if let Some(contact) = self.get(query)? {
            return Ok(Some(contact));
        }
        self.find_by_name(query)
    }

    /// Persist a contact and push it to the provider, if one is configured.
    ///
    /// The local file is written first; a provider failure fails the call
    /// but leaves the file in place.
    pub fn write(&self, mut contact: Contact) -> Result<Contact> {
        let id = assign_identity(&mut contact);
        contact.revision = Some(now());

        self.persist(&id, &contact)?;

        if let Some(provider) = &self.provider {
            provider
                .write_contact(&contact)
                .context("Failed to write contact to provider")?;
        }
        Ok(contact)
    }

    /// Write several contacts, stopping at the first failure
    pub fn write_all(&self, contacts: impl IntoIterator<Item = Contact>) -> Result<Vec<Contact>> {
        contacts.into_iter().map(|c| self.write(c)).collect()
    }

    /// Overwrite the local file with a synced copy, without pushing it back
    pub fn write_synced(&self, mut contact: Contact) -> Result<Contact> {
        let id = assign_identity(&mut contact);
        contact.last_synced = Some(now());

        self.persist(&id, &contact)?;
        Ok(contact)
    }

    /// Delete a contact, removing it from the provider first when it came from there
    pub fn delete(&self, id: &ContactId) -> Result<()> {
        let path = self
            .path_for(id.as_str())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if id.is_provider()
            && let Some(provider) = &self.provider
        {
            provider
                .delete_contact(id.as_str())
                .context("Failed to delete contact from provider")?;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("Deleted {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()).into())
            }
            Err(e) => Err(e)
                .with_context(|| format!("Failed to delete contact file: {}", path.display())),
        }
    }

    fn persist(&self, id: &ContactId, contact: &Contact) -> Result<()> {
        let path = self
            .path_for(id.as_str())
            .with_context(|| format!("Invalid contact identifier: {:?}", id.as_str()))?;

        fs::write(&path, vcard::encode(contact))
            .with_context(|| format!("Failed to write contact file: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o644))
                .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
        }
        Ok(())
    }
}

/// Give a record without a usable id a fresh local one, and an empty
/// display name the id
fn assign_identity(contact: &mut Contact) -> ContactId {
    let id = match contact.id.take() {
        Some(id) if !id.as_str().is_empty() => id,
        _ => ContactId::generate_local(),
    };
    if contact.formatted_name.trim().is_empty() {
        contact.formatted_name = id.as_str().to_string();
    }
    contact.id = Some(id.clone());
    id
}

/// Records without a UID take their identifier from the file name
fn with_file_id(mut contact: Contact, file_id: &str) -> Contact {
    if contact.id.is_none() {
        contact.id = Some(ContactId::from_legacy(file_id));
    }
    contact
}

fn now() -> chrono::DateTime<Utc> {
    let now = Utc::now();
    now.duration_trunc(TimeDelta::seconds(1)).unwrap_or(now)
}
