//! Contacts crate - Business logic for the personal address book
//!
//! This crate provides:
//! - Domain models (Contact, ContactId, Address, dates)
//! - vCard 4.0 encoding and decoding of records
//! - Google People API client, field translation and OAuth2 (PKCE) flow
//! - File-backed contact storage with optional provider push
//! - One-way sync from the provider into local storage
//! - Human-readable formatting for terminal output

pub mod config;
pub mod format;
pub mod google;
pub mod models;
pub mod provider;
pub mod storage;
pub mod sync;
pub mod vcard;

pub use self::config::{ClientSecrets, GoogleCredentials};
pub use format::{format_address, format_contact, format_display_date};
pub use google::{
    AuthError, CancelHandle, CredentialStore, GoogleAuth, GoogleContactsProvider,
    GoogleTokenEndpoint, OAuthConfig, PendingAuthorization, ProviderError, TokenEndpoint,
    TokenResponse, contact_to_person, extension_key, person_to_contact,
};
pub use models::{Address, Contact, ContactId, Extension, PartialDate, StructuredName, TypedValue};
pub use provider::ContactProvider;
pub use storage::{ContactStore, StoreError};
pub use sync::{SyncStats, sync_contacts};
