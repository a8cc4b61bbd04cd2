//! People API HTTP client
//!
//! Fetches, creates, updates and deletes contacts through the People API.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};

use super::api::{ListConnectionsResponse, Person};
use super::translate::{UPDATE_PERSON_FIELDS, contact_to_person, person_to_contact};
use super::{GoogleAuth, check_status, http_agent};
use crate::models::{Contact, ContactId};
use crate::provider::ContactProvider;

/// Every group the translator understands
const PERSON_FIELDS: &str = "addresses,ageRanges,biographies,birthdays,calendarUrls,clientData,\
coverPhotos,emailAddresses,events,externalIds,genders,imClients,interests,locales,locations,\
memberships,metadata,miscKeywords,names,nicknames,occupations,organizations,phoneNumbers,photos,\
relations,sipAddresses,skills,urls,userDefined";

const PAGE_SIZE: u32 = 1000;

/// Google People API contact provider
pub struct GoogleContactsProvider {
    auth: GoogleAuth,
    agent: ureq::Agent,
    base_url: String,
    sync_token: Option<String>,
}

impl GoogleContactsProvider {
    /// People API base URL
    const BASE_URL: &'static str = "https://people.googleapis.com/v1";

    /// Create a provider, reading the stored sync cursor once
    pub fn new(auth: GoogleAuth) -> Result<Self> {
        Self::with_base_url(auth, Self::BASE_URL)
    }

    pub fn with_base_url(auth: GoogleAuth, base_url: impl Into<String>) -> Result<Self> {
        let sync_token = auth.store().load_sync_token()?;
        Ok(Self {
            auth,
            agent: http_agent(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            sync_token,
        })
    }

    pub fn auth(&self) -> &GoogleAuth {
        &self.auth
    }

    /// Sync cursor as of construction. Stored after each full fetch, but
    /// fetches are always complete.
    pub fn sync_token(&self) -> Option<&str> {
        self.sync_token.as_deref()
    }

    /// Fetch one page of connections
    pub fn list_connections(&self, page_token: Option<&str>) -> Result<ListConnectionsResponse> {
        let access_token = self.auth.access_token()?;

        let mut url = format!(
            "{}/people/me/connections?personFields={}&pageSize={}&sources=READ_SOURCE_TYPE_CONTACT&requestSyncToken=true",
            self.base_url, PERSON_FIELDS, PAGE_SIZE
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let response = self
            .agent
            .get(&url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .context("Failed to send list connections request")?;

        check_status("list connections", response)?
            .body_mut()
            .read_json()
            .context("Failed to parse list connections response")
    }

    /// Fetch every connection, following page tokens
    pub fn list_all_people(&self) -> Result<(Vec<Person>, Option<String>)> {
        let mut people = Vec::new();
        let mut page_token: Option<String> = None;
        let mut sync_token = None;

        loop {
            let page = self.list_connections(page_token.as_deref())?;
            log::debug!(
                "Fetched {} connections (total {:?})",
                page.connections.len(),
                page.total_people
            );
            people.extend(page.connections);
            if page.next_sync_token.is_some() {
                sync_token = page.next_sync_token;
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok((people, sync_token))
    }

    fn create_person(&self, person: &Person) -> Result<()> {
        let access_token = self.auth.access_token()?;
        let url = format!("{}/people:createContact", self.base_url);

        let response = self
            .agent
            .post(&url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .send_json(person)
            .context("Failed to send create contact request")?;
        check_status("create contact", response)?;
        Ok(())
    }

    fn update_person(&self, id: &str, person: &Person) -> Result<()> {
        let access_token = self.auth.access_token()?;
        let url = format!(
            "{}/people/{}:updateContact?updatePersonFields={}",
            self.base_url,
            urlencoding::encode(id),
            UPDATE_PERSON_FIELDS
        );

        let response = self
            .agent
            .patch(&url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .send_json(person)
            .context("Failed to send update contact request")?;
        check_status("update contact", response)?;
        Ok(())
    }
}

impl ContactProvider for GoogleContactsProvider {
    fn fetch_contacts(&self) -> Result<Vec<Contact>> {
        let (people, sync_token) = self.list_all_people()?;

        if let Some(token) = sync_token {
            self.auth.store().save_sync_token(&token)?;
        }

        log::info!("Fetched {} contacts from Google", people.len());
        Ok(people.into_iter().map(person_to_contact).collect())
    }

    fn write_contact(&self, contact: &Contact) -> Result<()> {
        let person = contact_to_person(contact);
        match contact.uid() {
            Some(ContactId::Provider(id)) => {
                log::info!("Updating Google contact {}", id);
                self.update_person(id, &person)
            }
            _ => {
                log::info!("Creating Google contact {}", contact.full_name());
                self.create_person(&person)
            }
        }
    }

    fn delete_contact(&self, id: &str) -> Result<()> {
        let access_token = self.auth.access_token()?;
        let url = format!(
            "{}/people/{}:deleteContact",
            self.base_url,
            urlencoding::encode(id)
        );

        log::info!("Deleting Google contact {}", id);
        let response = self
            .agent
            .delete(&url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .context("Failed to send delete contact request")?;
        check_status("delete contact", response)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GoogleCredentials;
    use crate::google::{CredentialStore, OAuthConfig, ProviderError, TokenEndpoint, TokenResponse};
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use tempfile::{TempDir, tempdir};

    struct StaticToken;

    impl TokenEndpoint for StaticToken {
        fn exchange_code(
            &self,
            _client: &GoogleCredentials,
            _code: &str,
            _redirect_uri: &str,
            _code_verifier: &str,
        ) -> Result<TokenResponse> {
            anyhow::bail!("not used")
        }

        fn refresh(&self, _client: &GoogleCredentials, _refresh: &str) -> Result<TokenResponse> {
            Ok(TokenResponse {
                access_token: "test-token".to_string(),
                expires_in: Some(3600),
                ..Default::default()
            })
        }

        fn user_email(&self, _access_token: &str) -> Result<String> {
            anyhow::bail!("not used")
        }
    }

    #[derive(Debug)]
    struct Recorded {
        method: String,
        target: String,
        authorization: Option<String>,
        body: String,
    }

    /// Serve canned responses in order, one connection per request
    fn serve(responses: Vec<(u16, String)>) -> (String, JoinHandle<Vec<Recorded>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let mut recorded = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());

                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let mut parts = line.split_whitespace();
                let method = parts.next().unwrap_or_default().to_string();
                let target = parts.next().unwrap_or_default().to_string();

                let mut content_length = 0;
                let mut authorization = None;
                loop {
                    let mut header = String::new();
                    reader.read_line(&mut header).unwrap();
                    let header = header.trim_end();
                    if header.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = header.split_once(':') {
                        let value = value.trim();
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.parse().unwrap();
                        } else if name.eq_ignore_ascii_case("authorization") {
                            authorization = Some(value.to_string());
                        }
                    }
                }
                let mut body_bytes = vec![0; content_length];
                reader.read_exact(&mut body_bytes).unwrap();

                write!(
                    stream,
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                )
                .unwrap();
                stream.flush().unwrap();

                recorded.push(Recorded {
                    method,
                    target,
                    authorization,
                    body: String::from_utf8(body_bytes).unwrap(),
                });
            }
            recorded
        });

        (base_url, handle)
    }

    fn provider(base_url: &str) -> (TempDir, GoogleContactsProvider) {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path()).unwrap();
        let mut creds = GoogleCredentials::new("id", "secret");
        creds.refresh_token = Some("refresh".to_string());
        store.save(&creds).unwrap();

        let auth = GoogleAuth::with_endpoint(store, Arc::new(StaticToken), OAuthConfig::default());
        let provider = GoogleContactsProvider::with_base_url(auth, base_url).unwrap();
        (dir, provider)
    }

    #[test]
    fn test_fetch_follows_pages_and_stores_cursor() {
        let (base_url, server) = serve(vec![
            (
                200,
                r#"{"connections": [{"resourceName": "people/c1", "names": [{"displayName": "One"}]}],
                    "nextPageToken": "page 2"}"#
                    .to_string(),
            ),
            (
                200,
                r#"{"connections": [{"resourceName": "people/c2"}], "nextSyncToken": "cursor-9"}"#
                    .to_string(),
            ),
        ]);
        let (_dir, provider) = provider(&base_url);
        assert!(provider.sync_token().is_none());

        let contacts = provider.fetch_contacts().unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].full_name(), "One");
        assert_eq!(contacts[1].uid(), Some(&ContactId::provider("c2")));

        let requests = server.join().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, "GET");
        assert!(requests[0].target.starts_with("/people/me/connections?personFields="));
        assert!(requests[0].target.contains("pageSize=1000"));
        assert!(requests[0].target.contains("sources=READ_SOURCE_TYPE_CONTACT"));
        assert!(requests[0].target.contains("requestSyncToken=true"));
        assert!(!requests[0].target.contains("pageToken"));
        assert!(requests[1].target.ends_with("&pageToken=page%202"));
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer test-token"));

        assert_eq!(
            provider.auth().store().load_sync_token().unwrap().as_deref(),
            Some("cursor-9")
        );
        // Cursor is only read at construction
        assert!(provider.sync_token().is_none());
    }

    #[test]
    fn test_fetch_reports_status_and_body() {
        let (base_url, server) = serve(vec![(403, r#"{"error": "forbidden"}"#.to_string())]);
        let (_dir, provider) = provider(&base_url);

        let err = provider.fetch_contacts().unwrap_err();
        match err.downcast_ref::<ProviderError>() {
            Some(ProviderError::Status { status, body, .. }) => {
                assert_eq!(*status, 403);
                assert!(body.contains("forbidden"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        server.join().unwrap();
    }

    #[test]
    fn test_write_provider_contact_updates_with_etag() {
        let (base_url, server) = serve(vec![(200, "{}".to_string())]);
        let (_dir, provider) = provider(&base_url);

        let contact = Contact {
            id: Some(ContactId::provider("c7")),
            formatted_name: "Seven".to_string(),
            etag: Some("etag-7".to_string()),
            ..Default::default()
        };
        provider.write_contact(&contact).unwrap();

        let requests = server.join().unwrap();
        assert_eq!(requests[0].method, "PATCH");
        assert_eq!(
            requests[0].target,
            format!("/people/c7:updateContact?updatePersonFields={}", UPDATE_PERSON_FIELDS)
        );
        let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(body["etag"], "etag-7");
        assert_eq!(body["names"][0]["displayName"], "Seven");
    }

    #[test]
    fn test_write_local_contact_creates() {
        let (base_url, server) = serve(vec![(200, r#"{"resourceName": "people/c8"}"#.to_string())]);
        let (_dir, provider) = provider(&base_url);

        provider.write_contact(&Contact::new("Eight")).unwrap();

        let requests = server.join().unwrap();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].target, "/people:createContact");
    }

    #[test]
    fn test_delete_contact() {
        let (base_url, server) = serve(vec![(204, String::new())]);
        let (_dir, provider) = provider(&base_url);

        provider.delete_contact("c9").unwrap();

        let requests = server.join().unwrap();
        assert_eq!(requests[0].method, "DELETE");
        assert_eq!(requests[0].target, "/people/c9:deleteContact");
    }

    #[test]
    fn test_unauthenticated_provider_makes_no_request() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path()).unwrap();
        store.save(&GoogleCredentials::new("id", "secret")).unwrap();
        let auth = GoogleAuth::with_endpoint(store, Arc::new(StaticToken), OAuthConfig::default());
        let provider = GoogleContactsProvider::with_base_url(auth, "http://127.0.0.1:9").unwrap();

        let err = provider.fetch_contacts().unwrap_err();
        assert!(err.downcast_ref::<crate::google::AuthError>().is_some());
    }
}
