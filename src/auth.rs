//! Credential storage and the interactive Lightspeed login flow.
//!
//! Auth file: `~/.lightspeed/auth.json`, one credential per provider id.
//! The interactive flow is a PKCE authorization-code exchange against the
//! Lightspeed service's OAuth endpoints: print the authorization URL, let the
//! operator complete the login in a browser, and paste the callback URL (or
//! bare code) back into the terminal.

use crate::error::{Error, Result};
use crate::session::{AuthGateway, LIGHTSPEED_AUTH_ID, LIGHTSPEED_AUTH_REQUEST, Session};
use async_trait::async_trait;
use base64::Engine as _;
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, IsTerminal, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const OAUTH_CLIENT_ID: &str = "lightspeed-cli";
const OAUTH_AUTHORIZE_PATH: &str = "/o/authorize/";
const OAUTH_TOKEN_PATH: &str = "/o/token/";
const OAUTH_SCOPES: &str = "read write";
const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// A credential stored in auth.json.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix ms after which `access_token` is no longer usable.
    pub expires: i64,
    /// Display name reported by the service at login time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

impl StoredCredential {
    #[must_use]
    pub const fn is_expired(&self, now_ms: i64) -> bool {
        self.expires <= now_ms
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthFile {
    #[serde(flatten)]
    pub entries: HashMap<String, StoredCredential>,
}

/// Auth storage wrapper with file locking.
#[derive(Debug, Clone)]
pub struct AuthStorage {
    path: PathBuf,
    entries: HashMap<String, StoredCredential>,
}

impl AuthStorage {
    /// Load auth.json (creates empty if missing).
    pub fn load(path: PathBuf) -> Result<Self> {
        let entries = if path.exists() {
            let file = File::open(&path).map_err(|e| Error::auth(format!("auth.json: {e}")))?;
            let mut locked = lock_file(file, LOCK_TIMEOUT)?;
            // Read from the locked file handle, not a new handle
            let mut content = String::new();
            locked.as_file_mut().read_to_string(&mut content)?;
            let parsed: AuthFile = serde_json::from_str(&content).unwrap_or_default();
            parsed.entries
        } else {
            HashMap::new()
        };

        Ok(Self { path, entries })
    }

    /// Persist auth.json (locked truncate write + permissions).
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        let mut locked = lock_file(file, LOCK_TIMEOUT)?;

        let data = serde_json::to_string_pretty(&AuthFile {
            entries: self.entries.clone(),
        })?;

        // Write to the locked file handle, not a new handle
        let f = locked.as_file_mut();
        f.seek(SeekFrom::Start(0))?;
        f.set_len(0)?;
        f.write_all(data.as_bytes())?;
        f.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }

    /// Default location of the auth file.
    pub fn default_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".lightspeed").join("auth.json"))
            .ok_or_else(|| Error::config("Could not determine home directory"))
    }

    /// Get raw credential.
    #[must_use]
    pub fn get(&self, provider: &str) -> Option<&StoredCredential> {
        self.entries.get(provider)
    }

    /// Insert or replace a credential for a provider.
    pub fn set(&mut self, provider: impl Into<String>, credential: StoredCredential) {
        self.entries.insert(provider.into(), credential);
    }

    /// Remove a credential for a provider.
    pub fn remove(&mut self, provider: &str) -> bool {
        self.entries.remove(provider).is_some()
    }

    /// Usable bearer token for a provider, or `None` when missing or expired.
    #[must_use]
    pub fn access_token(&self, provider: &str) -> Option<String> {
        let credential = self.entries.get(provider)?;
        if credential.is_expired(chrono::Utc::now().timestamp_millis()) {
            None
        } else {
            Some(credential.access_token.clone())
        }
    }

    /// Refresh expired credentials that carry a refresh token.
    ///
    /// Best-effort: a failed refresh leaves the expired entry in place (a
    /// later silent lookup will miss it and the interactive flow can
    /// recover), so tokens revoked server-side don't wedge every command.
    pub async fn refresh_expired(&mut self, http: &reqwest::Client, base_url: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut refreshes = Vec::new();

        for (provider, credential) in &self.entries {
            // Only Lightspeed's own tokens are ours to refresh; the Red Hat
            // account provider is managed by its companion extension.
            if provider != LIGHTSPEED_AUTH_ID {
                continue;
            }
            if credential.is_expired(now) {
                if let Some(refresh_token) = &credential.refresh_token {
                    refreshes.push((provider.clone(), refresh_token.clone()));
                }
            }
        }

        for (provider, refresh_token) in refreshes {
            match refresh_login(http, base_url, &refresh_token).await {
                Ok(refreshed) => {
                    debug!(%provider, "refreshed expired credential");
                    self.entries.insert(provider, refreshed);
                    self.save()?;
                }
                Err(err) => {
                    warn!(%provider, %err, "could not refresh expired credential");
                }
            }
        }

        Ok(())
    }
}

fn lock_file(file: File, timeout: Duration) -> Result<LockedFile> {
    let start = Instant::now();
    loop {
        if matches!(FileExt::try_lock_exclusive(&file), Ok(true)) {
            return Ok(LockedFile { file });
        }

        if start.elapsed() >= timeout {
            return Err(Error::auth("Timed out waiting for auth lock".to_string()));
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}

/// A file handle with an exclusive lock. Unlocks on drop.
struct LockedFile {
    file: File,
}

impl LockedFile {
    const fn as_file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn percent_encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.as_bytes() {
        match *b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(*b as char);
            }
            b' ' => out.push_str("%20"),
            other => {
                let _ = write!(out, "%{other:02X}");
            }
        }
    }
    out
}

fn percent_decode_component(value: &str) -> Option<String> {
    if !value.as_bytes().contains(&b'%') && !value.as_bytes().contains(&b'+') {
        return Some(value.to_string());
    }

    let mut out = Vec::with_capacity(value.len());
    let mut bytes = value.as_bytes().iter().copied();
    while let Some(b) = bytes.next() {
        match b {
            b'+' => out.push(b' '),
            b'%' => {
                let hi = bytes.next()?;
                let lo = bytes.next()?;
                let hex = [hi, lo];
                let hex = std::str::from_utf8(&hex).ok()?;
                let decoded = u8::from_str_radix(hex, 16).ok()?;
                out.push(decoded);
            }
            other => out.push(other),
        }
    }

    String::from_utf8(out).ok()
}

fn parse_query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|part| !part.trim().is_empty())
        .filter_map(|part| {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            let key = percent_decode_component(k.trim())?;
            let value = percent_decode_component(v.trim())?;
            Some((key, value))
        })
        .collect()
}

fn build_url_with_query(base: &str, params: &[(&str, &str)]) -> String {
    let mut url = String::with_capacity(base.len() + 128);
    url.push_str(base);
    url.push('?');

    for (idx, (k, v)) in params.iter().enumerate() {
        if idx > 0 {
            url.push('&');
        }
        url.push_str(&percent_encode_component(k));
        url.push('=');
        url.push_str(&percent_encode_component(v));
    }

    url
}

fn generate_pkce() -> (String, String) {
    let uuid1 = uuid::Uuid::new_v4();
    let uuid2 = uuid::Uuid::new_v4();
    let mut random = [0u8; 32];
    random[..16].copy_from_slice(uuid1.as_bytes());
    random[16..].copy_from_slice(uuid2.as_bytes());

    let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random);
    let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .encode(sha2::Sha256::digest(verifier.as_bytes()));
    (verifier, challenge)
}

/// Split a pasted authorization reply into `(code, state)`.
///
/// Accepts a full callback URL (`...?code=X&state=Y`), a `code#state` pair,
/// or a bare code.
fn parse_authorization_reply(input: &str) -> (Option<String>, Option<String>) {
    let value = input.trim();
    if value.is_empty() {
        return (None, None);
    }

    if let Some((_, query)) = value.split_once('?') {
        let query = query.split('#').next().unwrap_or(query);
        let pairs = parse_query_pairs(query);
        let code = pairs
            .iter()
            .find_map(|(k, v)| (k == "code").then(|| v.clone()));
        let state = pairs
            .iter()
            .find_map(|(k, v)| (k == "state").then(|| v.clone()));
        return (code, state);
    }

    if let Some((code, state)) = value.split_once('#') {
        let code = code.trim();
        let state = state.trim();
        return (
            (!code.is_empty()).then(|| code.to_string()),
            (!state.is_empty()).then(|| state.to_string()),
        );
    }

    (Some(value.to_string()), None)
}

/// Access-token expiry, with a five-minute safety margin.
fn expires_at_ms(expires_in_seconds: i64) -> i64 {
    chrono::Utc::now().timestamp_millis() + expires_in_seconds.saturating_mul(1000) - 5 * 60 * 1000
}

/// Everything a caller needs to run the pasted-callback login flow.
#[derive(Debug, Clone)]
pub struct LoginStart {
    pub url: String,
    pub verifier: String,
}

/// Build the authorization URL and PKCE verifier for the Lightspeed service.
#[must_use]
pub fn start_login(base_url: &str) -> LoginStart {
    let (verifier, challenge) = generate_pkce();
    let authorize_url = format!("{}{OAUTH_AUTHORIZE_PATH}", base_url.trim_end_matches('/'));

    let url = build_url_with_query(
        &authorize_url,
        &[
            ("client_id", OAUTH_CLIENT_ID),
            ("response_type", "code"),
            ("scope", OAUTH_SCOPES),
            ("code_challenge", &challenge),
            ("code_challenge_method", "S256"),
            ("state", &verifier),
        ],
    );

    LoginStart { url, verifier }
}

/// Exchange a pasted authorization reply for tokens.
pub async fn complete_login(
    http: &reqwest::Client,
    base_url: &str,
    reply: &str,
    verifier: &str,
) -> Result<StoredCredential> {
    let (code, state) = parse_authorization_reply(reply);

    let Some(code) = code else {
        return Err(Error::auth("Missing authorization code"));
    };

    let state = state.unwrap_or_else(|| verifier.to_string());
    let token_url = format!("{}{OAUTH_TOKEN_PATH}", base_url.trim_end_matches('/'));

    let response = http
        .post(&token_url)
        .json(&serde_json::json!({
            "grant_type": "authorization_code",
            "client_id": OAUTH_CLIENT_ID,
            "code": code,
            "state": state,
            "code_verifier": verifier,
        }))
        .send()
        .await
        .map_err(|e| Error::auth(format!("Token exchange failed: {e}")))?;

    credential_from_response(response, "Token exchange").await
}

/// Refresh an expired Lightspeed token.
async fn refresh_login(
    http: &reqwest::Client,
    base_url: &str,
    refresh_token: &str,
) -> Result<StoredCredential> {
    let token_url = format!("{}{OAUTH_TOKEN_PATH}", base_url.trim_end_matches('/'));

    let response = http
        .post(&token_url)
        .json(&serde_json::json!({
            "grant_type": "refresh_token",
            "client_id": OAUTH_CLIENT_ID,
            "refresh_token": refresh_token,
        }))
        .send()
        .await
        .map_err(|e| Error::auth(format!("Token refresh failed: {e}")))?;

    credential_from_response(response, "Token refresh").await
}

async fn credential_from_response(
    response: reqwest::Response,
    context: &str,
) -> Result<StoredCredential> {
    let status = response.status();
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read body>".to_string());

    if !status.is_success() {
        return Err(Error::auth(format!("{context} failed: {text}")));
    }

    let token: TokenResponse =
        serde_json::from_str(&text).map_err(|e| Error::auth(format!("Invalid token response: {e}")))?;

    Ok(StoredCredential {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires: expires_at_ms(token.expires_in),
        account: None,
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

fn prompt_line(prompt: &str) -> Result<String> {
    let mut stderr = io::stderr();
    stderr.write_all(prompt.as_bytes())?;
    stderr.flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Production [`AuthGateway`] backed by [`AuthStorage`].
///
/// Silent lookups reload the auth file on every call, so state primed by the
/// interactive flow (possibly from another process) is always visible to the
/// next sweep.
#[derive(Debug, Clone)]
pub struct StoredSessionGateway {
    path: PathBuf,
    http: reqwest::Client,
    base_url: String,
}

impl StoredSessionGateway {
    #[must_use]
    pub fn new(path: PathBuf, http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            path,
            http,
            base_url: base_url.into(),
        }
    }

    /// Interactive PKCE login; persists the credential under
    /// [`LIGHTSPEED_AUTH_ID`].
    async fn interactive_login(&self) -> Result<()> {
        if !io::stdin().is_terminal() {
            return Err(Error::auth(
                "Interactive login requires a terminal; run `lightspeed login` from one",
            ));
        }

        let start = start_login(&self.base_url);
        eprintln!("Open the URL below, complete the login, then paste the callback URL or authorization code:");
        eprintln!("\n  {}\n", start.url);

        let reply = prompt_line("Authorization code: ")?;
        let credential = complete_login(&self.http, &self.base_url, &reply, &start.verifier).await?;

        let mut storage = AuthStorage::load(self.path.clone())?;
        storage.set(LIGHTSPEED_AUTH_ID, credential);
        storage.save()?;
        info!("stored Lightspeed credential");
        Ok(())
    }
}

#[async_trait]
impl AuthGateway for StoredSessionGateway {
    async fn silent_session(&self, provider: &str, _scopes: &[&str]) -> Result<Option<Session>> {
        let storage = AuthStorage::load(self.path.clone())?;
        let Some(credential) = storage.get(provider) else {
            return Ok(None);
        };
        if credential.is_expired(chrono::Utc::now().timestamp_millis()) {
            debug!(provider, "stored credential is expired");
            return Ok(None);
        }
        Ok(Some(Session {
            provider: provider.to_string(),
            access_token: credential.access_token.clone(),
            account: credential.account.clone(),
        }))
    }

    async fn request_interactive(&self, request_id: &str) -> Result<()> {
        match request_id {
            LIGHTSPEED_AUTH_REQUEST => self.interactive_login().await,
            other => Err(Error::auth(format!(
                "Unknown authentication request: {other}"
            ))),
        }
    }
}
