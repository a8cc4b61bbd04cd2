//! Google People API integration
//!
//! This module provides:
//! - OAuth2 authorization code flow with PKCE and token refresh
//! - People API client implementing [`crate::ContactProvider`]
//! - Translation between People API persons and contact records

mod auth;
mod client;
mod credentials;
mod pkce;
mod translate;

pub use auth::{
    AuthError, CancelHandle, GoogleAuth, GoogleTokenEndpoint, OAuthConfig, PendingAuthorization,
    TokenEndpoint, TokenResponse,
};
pub use client::GoogleContactsProvider;
pub use credentials::CredentialStore;
pub use pkce::{Pkce, random_state};
pub use translate::{UPDATE_PERSON_FIELDS, contact_to_person, extension_key, person_to_contact};
pub(crate) use translate::{INTEREST_KEY, LOCATION_KEY, OCCUPATION_KEY, SKILL_KEY};

/// Non-success response from a Google endpoint
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },
}

/// Read a ureq response, turning non-2xx statuses into [`ProviderError`]
pub(crate) fn check_status(
    operation: &str,
    mut response: ureq::http::Response<ureq::Body>,
) -> anyhow::Result<ureq::http::Response<ureq::Body>> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.body_mut().read_to_string().unwrap_or_default();
    Err(ProviderError::Status {
        operation: operation.to_string(),
        status: status.as_u16(),
        body,
    }
    .into())
}

/// HTTP agent that reports non-2xx responses instead of erroring on them
pub(crate) fn http_agent() -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build();
    ureq::Agent::new_with_config(config)
}

/// People API request and response types
///
/// The same `Person` shape is used for reads and for create/update
/// payloads; empty fields are omitted when serializing.
pub mod api {
    use serde::{Deserialize, Serialize};

    fn is_zero(v: &i32) -> bool {
        *v == 0
    }

    /// Response from `people/me/connections`
    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListConnectionsResponse {
        #[serde(default)]
        pub connections: Vec<Person>,
        pub next_page_token: Option<String>,
        pub next_sync_token: Option<String>,
        pub total_people: Option<u32>,
    }

    /// A contact in the People API schema
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Person {
        #[serde(skip_serializing_if = "String::is_empty")]
        pub resource_name: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub etag: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub names: Vec<Name>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub nicknames: Vec<ValueEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub phone_numbers: Vec<TypedEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub email_addresses: Vec<TypedEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub addresses: Vec<PostalAddress>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub organizations: Vec<Organization>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub birthdays: Vec<DatedEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub photos: Vec<UrlEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub biographies: Vec<ValueEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub urls: Vec<TypedEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub events: Vec<DatedEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub genders: Vec<ValueEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub im_clients: Vec<ImClient>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub relations: Vec<Relation>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub calendar_urls: Vec<CalendarUrl>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub sip_addresses: Vec<TypedEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub locales: Vec<ValueEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub interests: Vec<ValueEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub skills: Vec<ValueEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub occupations: Vec<ValueEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub locations: Vec<TypedEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub memberships: Vec<Membership>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub user_defined: Vec<KeyValue>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub client_data: Vec<KeyValue>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub external_ids: Vec<TypedEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub misc_keywords: Vec<TypedEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub cover_photos: Vec<UrlEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub age_ranges: Vec<AgeRange>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub metadata: Option<PersonMetadata>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Name {
        #[serde(skip_serializing_if = "String::is_empty")]
        pub display_name: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub family_name: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub given_name: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub middle_name: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub honorific_prefix: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub honorific_suffix: String,
    }

    /// Entry holding a single value (nickname, biography, skill, ...)
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct ValueEntry {
        pub value: String,
    }

    /// Entry holding a value and a type label (phone, email, url, ...)
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct TypedEntry {
        pub value: String,
        #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
        pub kind: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct UrlEntry {
        pub url: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct PostalAddress {
        #[serde(skip_serializing_if = "String::is_empty")]
        pub po_box: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub extended_address: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub street_address: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub city: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub region: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub postal_code: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub country: String,
        #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
        pub kind: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Organization {
        #[serde(skip_serializing_if = "String::is_empty")]
        pub name: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub title: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub department: String,
    }

    /// Calendar date; zero means the component is unset
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Date {
        #[serde(skip_serializing_if = "is_zero")]
        pub year: i32,
        pub month: i32,
        pub day: i32,
    }

    /// Birthday or event
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct DatedEntry {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub date: Option<Date>,
        #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
        pub kind: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct ImClient {
        pub username: String,
        pub protocol: String,
        #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
        pub kind: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Relation {
        pub person: String,
        #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
        pub kind: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CalendarUrl {
        pub url: String,
        #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
        pub kind: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Membership {
        pub contact_group_membership: Option<ContactGroupMembership>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct ContactGroupMembership {
        pub contact_group_resource_name: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct KeyValue {
        pub key: String,
        pub value: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct AgeRange {
        pub age_range: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct PersonMetadata {
        pub sources: Vec<Source>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Source {
        #[serde(rename = "type")]
        pub kind: String,
        pub id: String,
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_deserialize_sparse_person() {
            let json = r#"{
                "resourceName": "people/c1",
                "etag": "%EgUBAi43PRoEAQIFByIMR0xCZ",
                "names": [{"displayName": "Ada", "givenName": "Ada", "metadata": {"primary": true}}],
                "phoneNumbers": [{"value": "555", "type": "mobile", "formattedType": "Mobile"}],
                "birthdays": [{"date": {"month": 12, "day": 10}}]
            }"#;
            let person: Person = serde_json::from_str(json).unwrap();
            assert_eq!(person.resource_name, "people/c1");
            assert_eq!(person.names[0].given_name, "Ada");
            assert_eq!(person.phone_numbers[0].kind, "mobile");
            assert_eq!(
                person.birthdays[0].date,
                Some(Date {
                    year: 0,
                    month: 12,
                    day: 10
                })
            );
            assert!(person.metadata.is_none());
        }

        #[test]
        fn test_serialize_omits_empty_groups() {
            let person = Person {
                names: vec![Name {
                    given_name: "Ada".to_string(),
                    ..Default::default()
                }],
                birthdays: vec![DatedEntry {
                    date: Some(Date {
                        year: 0,
                        month: 3,
                        day: 10,
                    }),
                    kind: String::new(),
                }],
                ..Default::default()
            };
            let json = serde_json::to_value(&person).unwrap();
            assert_eq!(
                json,
                serde_json::json!({
                    "names": [{"givenName": "Ada"}],
                    "birthdays": [{"date": {"month": 3, "day": 10}}]
                })
            );
        }

        #[test]
        fn test_list_response_without_connections() {
            let list: ListConnectionsResponse =
                serde_json::from_str(r#"{"nextSyncToken": "tok", "totalPeople": 0}"#).unwrap();
            assert!(list.connections.is_empty());
            assert_eq!(list.next_sync_token.as_deref(), Some("tok"));
            assert!(list.next_page_token.is_none());
        }
    }
}
