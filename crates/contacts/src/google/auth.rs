//! Google OAuth2 authentication
//!
//! Implements the OAuth2 authorization code flow with PKCE. A short-lived
//! loopback listener receives the redirect, validates the anti-forgery
//! state and exchanges the code for tokens. Uses synchronous HTTP (ureq)
//! to be executor-agnostic.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use url::Url;

use super::credentials::CredentialStore;
use super::pkce::{Pkce, random_state};
use super::{check_status, http_agent};
use crate::config::GoogleCredentials;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

const CONTACTS_SCOPE: &str = "https://www.googleapis.com/auth/contacts";
const EMAIL_SCOPE: &str = "https://www.googleapis.com/auth/userinfo.email";

/// Refresh this long before the provider-reported expiry
const EXPIRY_MARGIN_SECS: i64 = 300;
/// Assumed lifetime when the token response carries no `expires_in`
const DEFAULT_EXPIRES_IN: u64 = 3600;
/// How often the listener checks for cancellation while idle
const POLL_INTERVAL: Duration = Duration::from_millis(50);

const SUCCESS_PAGE: &str = "<html><body><h1>Authorization successful</h1>\
<p>You can close this window and return to the terminal.</p></body></html>";

/// Errors from the authorization flow that callers may want to match on
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization denied: {error}{}", describe(.description))]
    Denied { error: String, description: String },
    #[error("OAuth state mismatch in callback, refusing to exchange the code")]
    StateMismatch,
    #[error("No authorization code in callback")]
    MissingCode,
    #[error("Authorization cancelled")]
    Cancelled,
    #[error("Not authenticated: please run auth first")]
    NotAuthenticated,
    #[error("OAuth callback listener failed")]
    ListenerFailed(#[source] std::io::Error),
}

fn describe(description: &str) -> String {
    if description.is_empty() {
        String::new()
    } else {
        format!(" ({})", description)
    }
}

/// Authorization endpoint and loopback redirect settings
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub auth_url: String,
    /// Port for the loopback listener; 0 picks a free port
    pub redirect_port: u16,
    pub callback_path: String,
    pub scopes: Vec<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            auth_url: AUTH_URL.to_string(),
            redirect_port: 8080,
            callback_path: "/callback".to_string(),
            scopes: vec![CONTACTS_SCOPE.to_string(), EMAIL_SCOPE.to_string()],
        }
    }
}

/// Token response from the token endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// The token-issuing side of the provider
pub trait TokenEndpoint: Send + Sync {
    /// Exchange an authorization code (plus PKCE verifier) for tokens
    fn exchange_code(
        &self,
        client: &GoogleCredentials,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse>;

    /// Obtain a fresh access token from a refresh token
    fn refresh(&self, client: &GoogleCredentials, refresh_token: &str) -> Result<TokenResponse>;

    /// Look up the email address of the authorized account
    fn user_email(&self, access_token: &str) -> Result<String>;
}

/// [`TokenEndpoint`] backed by Google's OAuth2 HTTP endpoints
pub struct GoogleTokenEndpoint {
    agent: ureq::Agent,
    token_url: String,
    userinfo_url: String,
}

#[derive(Deserialize)]
struct UserInfo {
    #[serde(default)]
    email: String,
}

impl GoogleTokenEndpoint {
    pub fn new() -> Self {
        Self {
            agent: http_agent(),
            token_url: TOKEN_URL.to_string(),
            userinfo_url: USERINFO_URL.to_string(),
        }
    }
}

impl Default for GoogleTokenEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEndpoint for GoogleTokenEndpoint {
    fn exchange_code(
        &self,
        client: &GoogleCredentials,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse> {
        let response = self
            .agent
            .post(&self.token_url)
            .send_form([
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
                ("code", code),
                ("code_verifier", code_verifier),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
            ])
            .context("Failed to reach token endpoint")?;

        check_status("token exchange", response)?
            .body_mut()
            .read_json()
            .context("Failed to parse token response")
    }

    fn refresh(&self, client: &GoogleCredentials, refresh_token: &str) -> Result<TokenResponse> {
        let response = self
            .agent
            .post(&self.token_url)
            .send_form([
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to reach token endpoint")?;

        check_status("token refresh", response)?
            .body_mut()
            .read_json()
            .context("Failed to parse refresh token response")
    }

    fn user_email(&self, access_token: &str) -> Result<String> {
        let response = self
            .agent
            .get(&self.userinfo_url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .context("Failed to reach userinfo endpoint")?;

        let info: UserInfo = check_status("userinfo lookup", response)?
            .body_mut()
            .read_json()
            .context("Failed to parse userinfo response")?;
        anyhow::ensure!(!info.email.is_empty(), "userinfo response has no email");
        Ok(info.email)
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

impl CachedToken {
    fn from_response(token: &TokenResponse) -> Self {
        let lifetime = token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        Self {
            access_token: token.access_token.clone(),
            expires_at: chrono::Utc::now().timestamp() + lifetime as i64,
        }
    }

    fn is_fresh(&self) -> bool {
        self.expires_at > chrono::Utc::now().timestamp() + EXPIRY_MARGIN_SECS
    }
}

type TokenCache = Arc<Mutex<Option<CachedToken>>>;

/// OAuth2 client for the Google People API
pub struct GoogleAuth {
    store: CredentialStore,
    endpoint: Arc<dyn TokenEndpoint>,
    config: OAuthConfig,
    cached: TokenCache,
}

impl GoogleAuth {
    /// Auth against Google's endpoints with the default loopback settings
    pub fn new(store: CredentialStore) -> Self {
        Self::with_endpoint(
            store,
            Arc::new(GoogleTokenEndpoint::new()),
            OAuthConfig::default(),
        )
    }

    pub fn with_endpoint(
        store: CredentialStore,
        endpoint: Arc<dyn TokenEndpoint>,
        config: OAuthConfig,
    ) -> Self {
        Self {
            store,
            endpoint,
            config,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Start the authorization code flow.
    ///
    /// Binds the loopback listener before returning, so a busy port is
    /// reported here rather than after the browser has been sent away.
    pub fn authorize(&self) -> Result<PendingAuthorization> {
        let client = self.store.load()?;

        let listener = TcpListener::bind(("127.0.0.1", self.config.redirect_port))
            .map_err(AuthError::ListenerFailed)?;
        let port = listener
            .local_addr()
            .map_err(AuthError::ListenerFailed)?
            .port();
        let redirect_uri = format!("http://localhost:{}{}", port, self.config.callback_path);

        let pkce = Pkce::generate();
        let state = random_state();
        let scope = self.config.scopes.join(" ");

        let auth_url = Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("client_id", client.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", Pkce::METHOD),
            ],
        )
        .context("Invalid authorization endpoint URL")?
        .to_string();

        let cancel = CancelHandle::default();
        let (tx, rx) = mpsc::sync_channel(1);
        let callback = CallbackHandler {
            callback_path: self.config.callback_path.clone(),
            redirect_uri: redirect_uri.clone(),
            state,
            verifier: pkce.verifier,
            client,
            store: self.store.clone(),
            endpoint: Arc::clone(&self.endpoint),
            cached: Arc::clone(&self.cached),
        };
        let flag = cancel.clone();

        let handle = thread::Builder::new()
            .name("oauth-callback".to_string())
            .spawn(move || callback.run(listener, flag, tx))
            .context("Failed to spawn OAuth callback listener")?;

        log::info!("Waiting for OAuth callback on {}", redirect_uri);

        Ok(PendingAuthorization {
            auth_url,
            redirect_uri,
            cancel,
            rx,
            handle: Some(handle),
        })
    }

    /// Get a valid access token, refreshing it when needed
    pub fn access_token(&self) -> Result<String> {
        if let Some(token) = self.lock_cache().as_ref()
            && token.is_fresh()
        {
            return Ok(token.access_token.clone());
        }

        if !self.store.exists() {
            return Err(AuthError::NotAuthenticated.into());
        }
        let creds = self.store.load()?;
        let refresh_token = creds
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::NotAuthenticated)?;

        log::debug!("Refreshing access token");
        let token = self
            .endpoint
            .refresh(&creds, refresh_token)
            .context("Failed to refresh access token")?;

        self.store
            .update_tokens(&token.access_token, token.refresh_token.as_deref())?;
        *self.lock_cache() = Some(CachedToken::from_response(&token));

        Ok(token.access_token)
    }

    /// Check whether a refresh token is stored
    pub fn is_authenticated(&self) -> bool {
        self.store
            .load()
            .map(|creds| creds.is_authorized())
            .unwrap_or(false)
    }

    /// Email of the authorized account, if known
    pub fn email(&self) -> Option<String> {
        self.store.load().ok().and_then(|creds| creds.email)
    }

    /// Clear stored tokens (logout), keeping the OAuth client
    pub fn logout(&self) -> Result<()> {
        *self.lock_cache() = None;
        self.store.clear_tokens()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Option<CachedToken>> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cancels a pending authorization from any thread
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An authorization in progress, waiting for the browser redirect
pub struct PendingAuthorization {
    auth_url: String,
    redirect_uri: String,
    cancel: CancelHandle,
    rx: Receiver<Result<GoogleCredentials>>,
    handle: Option<JoinHandle<()>>,
}

impl PendingAuthorization {
    /// URL the user must open to grant access
    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Block until the callback completes or the flow is cancelled
    pub fn wait(mut self) -> Result<GoogleCredentials> {
        let outcome = self.rx.recv();
        self.join();
        outcome.unwrap_or_else(|_| Err(AuthError::Cancelled.into()))
    }

    /// Like [`wait`](Self::wait), but cancel once `timeout` has elapsed
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<GoogleCredentials> {
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => {
                self.join();
                outcome
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Timed out waiting for OAuth callback");
                self.cancel.cancel();
                self.join();
                // The listener may have finished between the timeout and the cancel
                self.rx
                    .try_recv()
                    .unwrap_or_else(|_| Err(AuthError::Cancelled.into()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.join();
                Err(AuthError::Cancelled.into())
            }
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("OAuth callback listener panicked");
        }
    }
}

impl Drop for PendingAuthorization {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.join();
    }
}

/// State owned by the listener thread
struct CallbackHandler {
    callback_path: String,
    redirect_uri: String,
    state: String,
    verifier: String,
    client: GoogleCredentials,
    store: CredentialStore,
    endpoint: Arc<dyn TokenEndpoint>,
    cached: TokenCache,
}

impl CallbackHandler {
    fn run(
        self,
        listener: TcpListener,
        cancel: CancelHandle,
        tx: SyncSender<Result<GoogleCredentials>>,
    ) {
        let outcome = self.serve(&listener, &cancel);
        drop(listener);
        // The receiver may already be gone after a timeout
        let _ = tx.try_send(outcome);
    }

    fn serve(&self, listener: &TcpListener, cancel: &CancelHandle) -> Result<GoogleCredentials> {
        listener
            .set_nonblocking(true)
            .map_err(AuthError::ListenerFailed)?;

        loop {
            if cancel.is_cancelled() {
                return Err(AuthError::Cancelled.into());
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    if let Some(outcome) = self.handle_connection(stream) {
                        return outcome;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(AuthError::ListenerFailed(e).into()),
            }
        }
    }

    /// Handle one request. `None` means keep waiting for the real callback.
    fn handle_connection(&self, mut stream: TcpStream) -> Option<Result<GoogleCredentials>> {
        if let Err(e) = stream.set_nonblocking(false) {
            log::debug!("Dropping callback connection: {}", e);
            return None;
        }
        let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

        let target = match read_request_target(&stream) {
            Ok(target) => target,
            Err(e) => {
                log::debug!("Ignoring unreadable request: {}", e);
                return None;
            }
        };

        let url = match Url::parse(&format!("http://localhost{}", target)) {
            Ok(url) if url.path() == self.callback_path => url,
            _ => {
                log::debug!("Ignoring request for {}", target);
                respond(&mut stream, "404 Not Found", "<html><body>Not found</body></html>");
                return None;
            }
        };

        let outcome = self.complete(&url);
        match &outcome {
            Ok(_) => respond(&mut stream, "200 OK", SUCCESS_PAGE),
            Err(e) => {
                let status = match e.downcast_ref::<AuthError>() {
                    Some(_) => "400 Bad Request",
                    None => "500 Internal Server Error",
                };
                let page = format!(
                    "<html><body><h1>Authorization failed</h1><p>{}</p></body></html>",
                    html_escape(&e.to_string())
                );
                respond(&mut stream, status, &page);
            }
        }
        Some(outcome)
    }

    fn complete(&self, url: &Url) -> Result<GoogleCredentials> {
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        if let Some(error) = params.get("error") {
            return Err(AuthError::Denied {
                error: error.clone(),
                description: params.get("error_description").cloned().unwrap_or_default(),
            }
            .into());
        }
        if params.get("state") != Some(&self.state) {
            log::warn!("Rejecting OAuth callback with mismatched state");
            return Err(AuthError::StateMismatch.into());
        }
        let code = params
            .get("code")
            .filter(|code| !code.is_empty())
            .ok_or(AuthError::MissingCode)?;

        log::info!("Exchanging authorization code for tokens");
        let token = self
            .endpoint
            .exchange_code(&self.client, code, &self.redirect_uri, &self.verifier)
            .context("Failed to exchange authorization code")?;

        let mut creds = self.client.clone();
        creds.access_token = Some(token.access_token.clone());
        if let Some(refresh) = &token.refresh_token {
            creds.refresh_token = Some(refresh.clone());
        }
        match self.endpoint.user_email(&token.access_token) {
            Ok(email) => creds.email = Some(email),
            Err(e) => log::warn!("Could not look up account email: {:#}", e),
        }

        self.store.save(&creds)?;
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(CachedToken::from_response(&token));

        log::info!("Authorization complete");
        Ok(creds)
    }
}

/// Read the request line and drain headers, returning the request target
fn read_request_target(stream: &TcpStream) -> std::io::Result<String> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    // Format: GET /callback?code=AUTH_CODE&state=... HTTP/1.1
    let target = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidData, "malformed request line"))?
        .to_string();

    let mut header = String::new();
    loop {
        header.clear();
        if reader.read_line(&mut header)? == 0 || header.trim().is_empty() {
            break;
        }
    }
    Ok(target)
}

fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    if let Err(e) = stream
        .write_all(response.as_bytes())
        .and_then(|_| stream.flush())
    {
        log::debug!("Failed to write callback response: {}", e);
    }
    let _ = stream.shutdown(Shutdown::Write);
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::atomic::AtomicUsize;
    use tempfile::{TempDir, tempdir};

    #[derive(Default)]
    struct FakeEndpoint {
        exchanges: Mutex<Vec<(String, String, String)>>,
        refreshes: AtomicUsize,
        fail_exchange: bool,
        fail_email: bool,
        refresh_returns_new_refresh_token: bool,
    }

    impl TokenEndpoint for FakeEndpoint {
        fn exchange_code(
            &self,
            _client: &GoogleCredentials,
            code: &str,
            redirect_uri: &str,
            code_verifier: &str,
        ) -> Result<TokenResponse> {
            self.exchanges.lock().unwrap().push((
                code.to_string(),
                redirect_uri.to_string(),
                code_verifier.to_string(),
            ));
            if self.fail_exchange {
                anyhow::bail!("invalid_grant");
            }
            Ok(TokenResponse {
                access_token: "access-1".to_string(),
                refresh_token: Some("refresh-1".to_string()),
                expires_in: Some(3600),
                token_type: Some("Bearer".to_string()),
            })
        }

        fn refresh(&self, _client: &GoogleCredentials, _refresh: &str) -> Result<TokenResponse> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TokenResponse {
                access_token: format!("refreshed-{}", n),
                refresh_token: self
                    .refresh_returns_new_refresh_token
                    .then(|| format!("rotated-{}", n)),
                expires_in: Some(3600),
                token_type: None,
            })
        }

        fn user_email(&self, _access_token: &str) -> Result<String> {
            if self.fail_email {
                anyhow::bail!("userinfo unavailable");
            }
            Ok("me@example.com".to_string())
        }
    }

    fn setup(endpoint: FakeEndpoint) -> (TempDir, Arc<FakeEndpoint>, GoogleAuth) {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path()).unwrap();
        store.save(&GoogleCredentials::new("client-id", "client-secret")).unwrap();
        let endpoint = Arc::new(endpoint);
        let config = OAuthConfig {
            redirect_port: 0,
            ..Default::default()
        };
        let auth = GoogleAuth::with_endpoint(store, endpoint.clone(), config);
        (dir, endpoint, auth)
    }

    fn query_param(url: &str, key: &str) -> Option<String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Send a GET to the loopback listener and return the status line
    fn get(pending: &PendingAuthorization, path_and_query: &str) -> String {
        let port = Url::parse(pending.redirect_uri()).unwrap().port().unwrap();
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(
            stream,
            "GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n",
            path_and_query
        )
        .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response.lines().next().unwrap_or_default().to_string()
    }

    #[test]
    fn test_auth_url_parameters() {
        let (_dir, _endpoint, auth) = setup(FakeEndpoint::default());
        let pending = auth.authorize().unwrap();
        let url = pending.auth_url().to_string();

        assert!(url.starts_with(AUTH_URL));
        assert_eq!(query_param(&url, "client_id").as_deref(), Some("client-id"));
        assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
        assert_eq!(query_param(&url, "access_type").as_deref(), Some("offline"));
        assert_eq!(query_param(&url, "prompt").as_deref(), Some("consent"));
        assert_eq!(query_param(&url, "code_challenge_method").as_deref(), Some("S256"));
        assert_eq!(
            query_param(&url, "redirect_uri").as_deref(),
            Some(pending.redirect_uri())
        );
        assert_eq!(
            query_param(&url, "scope").as_deref(),
            Some(
                "https://www.googleapis.com/auth/contacts https://www.googleapis.com/auth/userinfo.email"
            )
        );
        assert!(query_param(&url, "state").is_some_and(|s| !s.is_empty()));
        assert!(query_param(&url, "code_challenge").is_some_and(|s| s.len() == 43));
        assert!(pending.redirect_uri().ends_with("/callback"));

        pending.cancel_handle().cancel();
        let err = pending.wait().unwrap_err();
        assert!(matches!(err.downcast_ref::<AuthError>(), Some(AuthError::Cancelled)));
    }

    #[test]
    fn test_successful_callback_persists_credentials() {
        let (_dir, endpoint, auth) = setup(FakeEndpoint::default());
        let pending = auth.authorize().unwrap();
        let state = query_param(pending.auth_url(), "state").unwrap();

        let status = get(&pending, &format!("/callback?code=abc&state={}", state));
        assert_eq!(status, "HTTP/1.1 200 OK");

        let creds = pending.wait().unwrap();
        assert_eq!(creds.client_id, "client-id");
        assert_eq!(creds.client_secret, "client-secret");
        assert_eq!(creds.access_token.as_deref(), Some("access-1"));
        assert_eq!(creds.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(creds.email.as_deref(), Some("me@example.com"));
        assert_eq!(auth.store().load().unwrap(), creds);
        assert!(auth.is_authenticated());

        let exchanges = endpoint.exchanges.lock().unwrap();
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].0, "abc");
        assert!(exchanges[0].1.ends_with("/callback"));
        assert!(!exchanges[0].2.is_empty());
        drop(exchanges);

        // Token from the exchange is served from cache
        assert_eq!(auth.access_token().unwrap(), "access-1");
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_state_mismatch_never_exchanges() {
        let (_dir, endpoint, auth) = setup(FakeEndpoint::default());
        let pending = auth.authorize().unwrap();

        let status = get(&pending, "/callback?code=abc&state=forged");
        assert_eq!(status, "HTTP/1.1 400 Bad Request");

        let err = pending.wait().unwrap_err();
        assert!(matches!(err.downcast_ref::<AuthError>(), Some(AuthError::StateMismatch)));
        assert!(endpoint.exchanges.lock().unwrap().is_empty());
        assert!(!auth.is_authenticated());
    }

    #[test]
    fn test_provider_error_is_reported() {
        let (_dir, endpoint, auth) = setup(FakeEndpoint::default());
        let pending = auth.authorize().unwrap();
        let state = query_param(pending.auth_url(), "state").unwrap();

        get(
            &pending,
            &format!("/callback?error=access_denied&error_description=User+said+no&state={}", state),
        );

        let err = pending.wait().unwrap_err();
        match err.downcast_ref::<AuthError>() {
            Some(AuthError::Denied { error, description }) => {
                assert_eq!(error, "access_denied");
                assert_eq!(description, "User said no");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(endpoint.exchanges.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_code() {
        let (_dir, _endpoint, auth) = setup(FakeEndpoint::default());
        let pending = auth.authorize().unwrap();
        let state = query_param(pending.auth_url(), "state").unwrap();

        get(&pending, &format!("/callback?state={}", state));

        let err = pending.wait().unwrap_err();
        assert!(matches!(err.downcast_ref::<AuthError>(), Some(AuthError::MissingCode)));
    }

    #[test]
    fn test_exchange_failure_returns_server_error() {
        let (_dir, _endpoint, auth) = setup(FakeEndpoint {
            fail_exchange: true,
            ..Default::default()
        });
        let pending = auth.authorize().unwrap();
        let state = query_param(pending.auth_url(), "state").unwrap();

        let status = get(&pending, &format!("/callback?code=abc&state={}", state));
        assert_eq!(status, "HTTP/1.1 500 Internal Server Error");

        let err = pending.wait().unwrap_err();
        assert!(format!("{:#}", err).contains("invalid_grant"));
        assert!(!auth.is_authenticated());
    }

    #[test]
    fn test_other_paths_get_not_found_and_listener_keeps_waiting() {
        let (_dir, _endpoint, auth) = setup(FakeEndpoint::default());
        let pending = auth.authorize().unwrap();
        let state = query_param(pending.auth_url(), "state").unwrap();

        assert_eq!(get(&pending, "/favicon.ico"), "HTTP/1.1 404 Not Found");

        let status = get(&pending, &format!("/callback?code=abc&state={}", state));
        assert_eq!(status, "HTTP/1.1 200 OK");
        assert!(pending.wait().is_ok());
    }

    #[test]
    fn test_email_lookup_failure_is_not_fatal() {
        let (_dir, _endpoint, auth) = setup(FakeEndpoint {
            fail_email: true,
            ..Default::default()
        });
        let pending = auth.authorize().unwrap();
        let state = query_param(pending.auth_url(), "state").unwrap();

        get(&pending, &format!("/callback?code=abc&state={}", state));

        let creds = pending.wait().unwrap();
        assert!(creds.email.is_none());
        assert_eq!(creds.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[test]
    fn test_wait_timeout_cancels_and_releases_port() {
        let (_dir, _endpoint, auth) = setup(FakeEndpoint::default());
        let pending = auth.authorize().unwrap();
        let port = Url::parse(pending.redirect_uri()).unwrap().port().unwrap();

        let err = pending.wait_timeout(Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err.downcast_ref::<AuthError>(), Some(AuthError::Cancelled)));

        // Listener is gone, so the port can be bound again
        TcpListener::bind(("127.0.0.1", port)).unwrap();
    }

    #[test]
    fn test_bind_failure_is_reported_immediately() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::new(dir.path()).unwrap();
        store.save(&GoogleCredentials::new("id", "secret")).unwrap();

        let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = OAuthConfig {
            redirect_port: occupied.local_addr().unwrap().port(),
            ..Default::default()
        };
        let auth = GoogleAuth::with_endpoint(store, Arc::new(FakeEndpoint::default()), config);

        let err = auth.authorize().err().unwrap();
        assert!(matches!(
            err.downcast_ref::<AuthError>(),
            Some(AuthError::ListenerFailed(_))
        ));
    }

    #[test]
    fn test_access_token_requires_refresh_token() {
        let (_dir, endpoint, auth) = setup(FakeEndpoint::default());
        let err = auth.access_token().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthError>(),
            Some(AuthError::NotAuthenticated)
        ));
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_refresh_persists_and_keeps_refresh_token() {
        let (_dir, endpoint, auth) = setup(FakeEndpoint::default());
        auth.store().update_tokens("stale", Some("refresh-0")).unwrap();

        assert_eq!(auth.access_token().unwrap(), "refreshed-1");
        // Cached until close to expiry
        assert_eq!(auth.access_token().unwrap(), "refreshed-1");
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);

        let creds = auth.store().load().unwrap();
        assert_eq!(creds.access_token.as_deref(), Some("refreshed-1"));
        assert_eq!(creds.refresh_token.as_deref(), Some("refresh-0"));
    }

    #[test]
    fn test_refresh_stores_rotated_refresh_token() {
        let (_dir, _endpoint, auth) = setup(FakeEndpoint {
            refresh_returns_new_refresh_token: true,
            ..Default::default()
        });
        auth.store().update_tokens("stale", Some("refresh-0")).unwrap();

        auth.access_token().unwrap();
        let creds = auth.store().load().unwrap();
        assert_eq!(creds.refresh_token.as_deref(), Some("rotated-1"));
    }

    #[test]
    fn test_logout_clears_tokens() {
        let (_dir, endpoint, auth) = setup(FakeEndpoint::default());
        auth.store().update_tokens("stale", Some("refresh-0")).unwrap();
        auth.access_token().unwrap();
        assert!(auth.is_authenticated());

        auth.logout().unwrap();
        assert!(!auth.is_authenticated());
        assert!(auth.access_token().is_err());
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);

        let creds = auth.store().load().unwrap();
        assert_eq!(creds.client_id, "client-id");
    }

    #[test]
    fn test_denied_error_display() {
        let err = AuthError::Denied {
            error: "access_denied".to_string(),
            description: String::new(),
        };
        assert_eq!(err.to_string(), "Authorization denied: access_denied");
        let err = AuthError::Denied {
            error: "access_denied".to_string(),
            description: "nope".to_string(),
        };
        assert_eq!(err.to_string(), "Authorization denied: access_denied (nope)");
    }
}
