//! Lightspeed service API client.
//!
//! The whoami flow is three sequential, bearer-authenticated calls:
//! identity (`/api/v0/me`), WCA token exchange (`/api/v1/me/token/`), then
//! the spaces listing on the inference endpoint the exchange returned
//! (`{inference_url}/v2/spaces`).

use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// User identity from `/api/v0/me`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    pub given_name: String,
    pub family_name: String,
}

/// WCA token exchange payload from `/api/v1/me/token/`.
#[derive(Debug, Clone, Deserialize)]
pub struct WcaTokenInfo {
    /// Base URL of the WCA inference service for this account.
    pub inference_url: String,
    pub bearer_token: WcaBearerToken,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WcaBearerToken {
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
struct SpacesPage {
    resources: Vec<SpaceResource>,
}

#[derive(Debug, Deserialize)]
struct SpaceResource {
    entity: SpaceEntity,
}

#[derive(Debug, Deserialize)]
struct SpaceEntity {
    name: String,
}

/// Shared HTTP client with the timeout the CLI uses everywhere.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("lightspeed-cli/", env!("CARGO_PKG_VERSION")))
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(Error::from)
}

/// Client for the Lightspeed service and the WCA endpoint it hands out.
#[derive(Debug, Clone)]
pub struct LightspeedClient {
    http: reqwest::Client,
    base_url: String,
}

impl LightspeedClient {
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /api/v0/me`: identity of the signed-in user.
    pub async fn me(&self, access_token: &str) -> Result<UserInfo> {
        let url = format!("{}/api/v0/me", self.base_url);
        self.get_json(&url, access_token, "/api/v0/me").await
    }

    /// `GET /api/v1/me/token/`: short-lived WCA token plus the inference
    /// endpoint it is valid for.
    pub async fn wca_token(&self, access_token: &str) -> Result<WcaTokenInfo> {
        let url = format!("{}/api/v1/me/token/", self.base_url);
        self.get_json(&url, access_token, "/api/v1/me/token/").await
    }

    /// `GET {inference_url}/v2/spaces`: names of the WCA spaces visible to
    /// the user.
    pub async fn wca_spaces(&self, inference_url: &str, wca_token: &str) -> Result<Vec<String>> {
        let url = format!("{}/v2/spaces", inference_url.trim_end_matches('/'));
        let page: SpacesPage = self.get_json(&url, wca_token, "/v2/spaces").await?;
        Ok(page.resources.into_iter().map(|r| r.entity.name).collect())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        bearer: &str,
        context: &str,
    ) -> Result<T> {
        debug!(url, "GET");
        let response = self.http.get(url).bearer_auth(bearer).send().await?;

        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());

        if !status.is_success() {
            return Err(Error::api(format!(
                "GET {context} failed ({status}): {text}"
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| Error::api(format!("Invalid response from {context}: {e}")))
    }
}

/// Render the whoami message.
#[must_use]
pub fn format_whoami(user: &UserInfo, spaces: &[String]) -> String {
    format!(
        "Welcome {}\nYou have access to the following WCA spaces:\n {}",
        user.given_name,
        spaces.join(", ")
    )
}
