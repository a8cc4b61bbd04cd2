//! OAuth credential configuration
//!
//! Client credentials can be seeded from (in order of priority):
//! 1. Explicit values (CLI flags)
//! 2. A Google Cloud Console client-secrets JSON file
//! 3. Runtime environment variables (`GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`)
//!
//! Once authorized, the full credential set is persisted by
//! [`crate::google::CredentialStore`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Persisted credentials for the Google provider
///
/// Written to `google_creds.json` with owner-only permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleCredentials {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl GoogleCredentials {
    /// Credentials holding only the OAuth client, not yet authorized
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            ..Default::default()
        }
    }

    pub fn from_secrets(secrets: ClientSecrets) -> Self {
        Self::new(secrets.client_id, secrets.client_secret)
    }

    /// Whether a refresh token has been obtained
    pub fn is_authorized(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// OAuth client id and secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format (installed app)
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl ClientSecrets {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        let client_id = client_id.into().trim().to_string();
        let client_secret = client_secret.into().trim().to_string();
        anyhow::ensure!(!client_id.is_empty(), "Client ID is required");
        anyhow::ensure!(!client_secret.is_empty(), "Client secret is required");
        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// Load secrets from a Google Cloud Console JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    /// Parse secrets from a Google Cloud Console JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Self::new(installed.client_id, installed.client_secret)
    }

    /// Load secrets from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GOOGLE_CLIENT_ID")
            .context("GOOGLE_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GOOGLE_CLIENT_SECRET")
            .context("GOOGLE_CLIENT_SECRET environment variable not set")?;
        Self::new(client_id, client_secret)
    }
}
