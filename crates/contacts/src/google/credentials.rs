//! On-disk persistence of OAuth credentials and the sync cursor

use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::GoogleCredentials;

const CREDENTIALS_FILE: &str = "google_creds.json";
const SYNC_TOKEN_FILE: &str = "google_sync_token.txt";

/// Owns `google_creds.json` and `google_sync_token.txt` under the config root
#[derive(Debug, Clone)]
pub struct CredentialStore {
    credentials_path: PathBuf,
    sync_token_path: PathBuf,
}

impl CredentialStore {
    /// Create a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        config::ensure_dir(dir)?;
        Ok(Self {
            credentials_path: dir.join(CREDENTIALS_FILE),
            sync_token_path: dir.join(SYNC_TOKEN_FILE),
        })
    }

    pub fn credentials_path(&self) -> &Path {
        &self.credentials_path
    }

    pub fn exists(&self) -> bool {
        self.credentials_path.exists()
    }

    pub fn load(&self) -> Result<GoogleCredentials> {
        if !self.credentials_path.exists() {
            anyhow::bail!(
                "Credentials file not found at {}: please run init first",
                self.credentials_path.display()
            );
        }
        config::load_json_file(&self.credentials_path)
    }

    pub fn save(&self, creds: &GoogleCredentials) -> Result<()> {
        config::save_json_private(&self.credentials_path, creds)
            .context("Failed to write credentials file")
    }

    /// Merge new tokens into the stored credentials, keeping client id/secret.
    ///
    /// A missing refresh token in `refresh_token` keeps the stored one.
    pub fn update_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<GoogleCredentials> {
        let mut creds = self.load()?;
        creds.access_token = Some(access_token.to_string());
        if let Some(refresh) = refresh_token {
            creds.refresh_token = Some(refresh.to_string());
        }
        self.save(&creds)?;
        Ok(creds)
    }

    /// Drop stored tokens and account email, keeping the OAuth client
    pub fn clear_tokens(&self) -> Result<()> {
        if !self.exists() {
            return Ok(());
        }
        let mut creds = self.load()?;
        creds.refresh_token = None;
        creds.access_token = None;
        creds.email = None;
        self.save(&creds)
    }

    /// Read the persisted sync cursor, if any
    pub fn load_sync_token(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.sync_token_path) {
            Ok(token) if token.is_empty() => Ok(None),
            Ok(token) => Ok(Some(token)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to read sync token: {}", self.sync_token_path.display())
            }),
        }
    }

    pub fn save_sync_token(&self, token: &str) -> Result<()> {
        config::write_private(&self.sync_token_path, token.as_bytes())
    }
}
