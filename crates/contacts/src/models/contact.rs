//! Contact model - the canonical vCard-shaped record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a contact, tagged with where it came from
///
/// Provider ids are the trailing segment of the provider's resource name
/// (`people/c123` -> `c123`). Local ids are hyphenated UUIDs generated
/// for records created on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "origin", content = "id", rename_all = "lowercase")]
pub enum ContactId {
    Provider(String),
    Local(String),
}

impl ContactId {
    pub fn provider(id: impl Into<String>) -> Self {
        Self::Provider(id.into())
    }

    pub fn local(id: impl Into<String>) -> Self {
        Self::Local(id.into())
    }

    /// Generate a fresh local identifier
    pub fn generate_local() -> Self {
        Self::Local(Uuid::new_v4().to_string())
    }

    /// Classify an id stored without explicit provenance.
    ///
    /// Files written before provenance was recorded only carry the raw id.
    /// Generated ids are hyphenated UUIDs, provider ids never contained `-`
    /// at the time those files were written.
    pub fn from_legacy(id: impl Into<String>) -> Self {
        let id = id.into();
        if id.contains('-') {
            Self::Local(id)
        } else {
            Self::Provider(id)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Provider(id) | Self::Local(id) => id,
        }
    }

    pub fn is_provider(&self) -> bool {
        matches!(self, Self::Provider(_))
    }

    /// Name used for the `X-CONTACTS-ORIGIN` property
    pub fn origin(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider",
            Self::Local(_) => "local",
        }
    }

    /// Rebuild an id from its raw value and a persisted origin tag
    pub fn with_origin(id: impl Into<String>, origin: &str) -> Option<Self> {
        match origin.to_ascii_lowercase().as_str() {
            "provider" => Some(Self::Provider(id.into())),
            "local" => Some(Self::Local(id.into())),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value with an optional free-form type label ("mobile", "work", ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedValue {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl TypedValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: None,
        }
    }

    pub fn with_kind(value: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: Some(kind.into()),
        }
    }

    /// Build from a provider value and a possibly empty type label
    pub(crate) fn labeled(value: impl Into<String>, kind: &str) -> Self {
        Self {
            value: value.into(),
            kind: (!kind.is_empty()).then(|| kind.to_string()),
        }
    }
}

/// Structured name (vCard N): family;given;middle;prefix;suffix
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredName {
    pub family: String,
    pub given: String,
    pub middle: String,
    pub prefix: String,
    pub suffix: String,
}

impl StructuredName {
    /// Pack into the 5-component N value, keeping empty components
    pub fn to_value(&self) -> String {
        [
            self.family.as_str(),
            &self.given,
            &self.middle,
            &self.prefix,
            &self.suffix,
        ]
        .join(";")
    }

    /// Parse an N value; missing trailing components are empty
    pub fn from_value(value: &str) -> Self {
        let mut parts = value.splitn(5, ';').map(str::to_string);
        Self {
            family: parts.next().unwrap_or_default(),
            given: parts.next().unwrap_or_default(),
            middle: parts.next().unwrap_or_default(),
            prefix: parts.next().unwrap_or_default(),
            suffix: parts.next().unwrap_or_default(),
        }
    }
}

/// Postal address (vCard ADR)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub po_box: String,
    pub extended: String,
    pub street: String,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Address {
    /// Pack into the 7-component ADR value:
    /// PO box;extended;street;city;region;postal code;country
    pub fn to_value(&self) -> String {
        [
            self.po_box.as_str(),
            &self.extended,
            &self.street,
            &self.city,
            &self.region,
            &self.postal_code,
            &self.country,
        ]
        .join(";")
    }

    /// Parse an ADR value; missing trailing components are empty
    pub fn from_value(value: &str, kind: Option<String>) -> Self {
        let mut parts = value.splitn(7, ';').map(str::to_string);
        Self {
            po_box: parts.next().unwrap_or_default(),
            extended: parts.next().unwrap_or_default(),
            street: parts.next().unwrap_or_default(),
            city: parts.next().unwrap_or_default(),
            region: parts.next().unwrap_or_default(),
            postal_code: parts.next().unwrap_or_default(),
            country: parts.next().unwrap_or_default(),
            kind,
        }
    }
}

/// Vendor extension property (X-...) with no standard vCard equivalent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Extension {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind: None,
        }
    }

    pub fn with_kind(key: impl Into<String>, value: impl Into<String>, kind: &str) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind: (!kind.is_empty()).then(|| kind.to_string()),
        }
    }
}

/// A contact record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// Identifier, `None` until first written to the store
    pub id: Option<ContactId>,
    /// Formatted display name (vCard FN)
    pub formatted_name: String,
    pub name: Option<StructuredName>,
    pub nicknames: Vec<String>,
    pub phones: Vec<TypedValue>,
    pub emails: Vec<TypedValue>,
    pub addresses: Vec<Address>,
    pub urls: Vec<TypedValue>,
    /// Instant messaging URIs (`xmpp:user`, `sip:user@host`)
    pub impps: Vec<TypedValue>,
    pub related: Vec<TypedValue>,
    pub calendar_urls: Vec<TypedValue>,
    /// Organization name, `;department` appended when present
    pub organization: Option<String>,
    pub title: Option<String>,
    /// `YYYYMMDD` or `--MMDD`
    pub birthday: Option<String>,
    pub anniversary: Option<String>,
    pub gender: Option<String>,
    pub note: Option<String>,
    pub photo: Option<String>,
    pub languages: Vec<String>,
    /// Provider concurrency tag
    pub etag: Option<String>,
    /// Last local write (vCard REV)
    pub revision: Option<DateTime<Utc>>,
    /// Last time this record was overwritten by a sync
    pub last_synced: Option<DateTime<Utc>>,
    pub extensions: Vec<Extension>,
}

impl Contact {
    /// Create a new local contact with a generated id
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            id: Some(ContactId::generate_local()),
            formatted_name: full_name.into(),
            ..Default::default()
        }
    }

    pub fn uid(&self) -> Option<&ContactId> {
        self.id.as_ref()
    }

    pub fn full_name(&self) -> &str {
        &self.formatted_name
    }

    /// First mobile/cell phone, or the first phone if none is marked mobile
    pub fn primary_phone(&self) -> Option<&str> {
        self.phones
            .iter()
            .find(|p| {
                p.kind.as_deref().is_some_and(|k| {
                    k.eq_ignore_ascii_case("mobile") || k.eq_ignore_ascii_case("cell")
                })
            })
            .or_else(|| self.phones.first())
            .map(|p| p.value.as_str())
    }

    /// First email address
    pub fn primary_email(&self) -> Option<&str> {
        self.emails.first().map(|e| e.value.as_str())
    }

    /// All extension entries under a key, in order
    pub fn extension_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Extension> + 'a {
        self.extensions
            .iter()
            .filter(move |e| e.key.eq_ignore_ascii_case(key))
    }

    /// First extension value under a key
    pub fn extension(&self, key: &str) -> Option<&str> {
        self.extensions
            .iter()
            .find(|e| e.key.eq_ignore_ascii_case(key))
            .map(|e| e.value.as_str())
    }
}
