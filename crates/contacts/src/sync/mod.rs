//! Sync engine for pulling provider contacts into local storage
//!
//! Sync is a full, one-way replace: every remote contact overwrites its
//! local file. Local-only records are left alone.

mod contacts;

pub use contacts::{SyncStats, sync_contacts};
