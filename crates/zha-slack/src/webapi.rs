//! # Slack Web API Client
//!
//! The two calls the adapter needs: `rtm.start`, which reserves a
//! WebSocket URL, and `chat.postMessage`.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Base URL of the Web API.
pub const API_ENDPOINT: &str = "https://slack.com/api/";

/// Errors that can occur when calling the Web API.
#[derive(Debug, Error)]
pub enum WebApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("response status error. status: {0}")]
    Status(u16),
    #[error("API error: {0}")]
    Api(String),
    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// Fields common to every API response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Details on the authenticated user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelfInfo {
    pub id: String,
    pub name: String,
}

/// The team the token belongs to.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub domain: String,
}

/// `rtm.start` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RtmStart {
    #[serde(flatten)]
    pub response: ApiResponse,
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "self")]
    pub self_info: Option<SelfInfo>,
    #[serde(default)]
    pub team: Option<Team>,
}

impl RtmStart {
    /// WebSocket URL to connect to.
    ///
    /// # Errors
    ///
    /// - `WebApiError::Api` - the call was refused
    /// - `WebApiError::Parse` - no URL in a successful response
    pub fn into_url(self) -> Result<String, WebApiError> {
        if !self.response.ok {
            return Err(api_error(self.response));
        }
        if self.url.is_empty() {
            return Err(WebApiError::Parse("rtm.start returned no url".to_string()));
        }
        Ok(self.url)
    }
}

/// `chat.postMessage` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostMessage {
    pub channel: String,
    pub text: String,
    pub parse: String,
    pub link_names: bool,
    pub unfurl_links: bool,
    pub unfurl_media: bool,
    pub as_user: bool,
    pub username: Option<String>,
    pub icon_url: Option<String>,
    pub icon_emoji: Option<String>,
}

impl PostMessage {
    /// Message with Slack's usual formatting options enabled.
    pub fn new(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
            parse: "full".to_string(),
            link_names: true,
            unfurl_links: true,
            unfurl_media: true,
            as_user: false,
            username: None,
            icon_url: None,
            icon_emoji: None,
        }
    }

    /// Form fields for the request body.
    #[must_use]
    pub fn to_form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("channel", self.channel.clone()),
            ("text", self.text.clone()),
            ("parse", self.parse.clone()),
            ("link_names", u8::from(self.link_names).to_string()),
            ("unfurl_links", self.unfurl_links.to_string()),
            ("unfurl_media", self.unfurl_media.to_string()),
            ("as_user", self.as_user.to_string()),
        ];
        if let Some(username) = &self.username {
            form.push(("username", username.clone()));
        }
        if let Some(icon_url) = &self.icon_url {
            form.push(("icon_url", icon_url.clone()));
        }
        if let Some(icon_emoji) = &self.icon_emoji {
            form.push(("icon_emoji", icon_emoji.clone()));
        }
        form
    }
}

/// Web API client bound to one token.
#[derive(Debug, Clone)]
pub struct WebApiClient {
    client: Client,
    base_url: String,
    token: String,
}

impl WebApiClient {
    /// Create a client against the public endpoint.
    ///
    /// # Errors
    ///
    /// - `WebApiError::Http` - the HTTP client could not be built
    pub fn new(token: impl Into<String>) -> Result<Self, WebApiError> {
        Self::with_base_url(token, API_ENDPOINT)
    }

    /// Create a client against another endpoint.
    ///
    /// # Errors
    ///
    /// - `WebApiError::Http` - the HTTP client could not be built
    pub fn with_base_url(
        token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, WebApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}{method}", self.base_url)
    }

    async fn get<R: DeserializeOwned>(&self, method: &str) -> Result<R, WebApiError> {
        let url = self.endpoint(method);
        debug!(method, "Web API GET");

        let response = self
            .client
            .get(&url)
            .query(&[("token", self.token.as_str())])
            .send()
            .await?;

        parse_response(response).await
    }

    async fn post_form<R: DeserializeOwned>(
        &self,
        method: &str,
        mut form: Vec<(&'static str, String)>,
    ) -> Result<R, WebApiError> {
        let url = self.endpoint(method);
        debug!(method, "Web API POST");

        form.push(("token", self.token.clone()));
        let response = self.client.post(&url).form(&form).send().await?;

        parse_response(response).await
    }

    /// Begin an RTM session.
    ///
    /// # Errors
    ///
    /// Transport, status and decoding errors. `ok: false` is reported by
    /// [`RtmStart::into_url`].
    pub async fn rtm_start(&self) -> Result<RtmStart, WebApiError> {
        self.get("rtm.start").await
    }

    /// Post a message through the Web API.
    ///
    /// # Errors
    ///
    /// - `WebApiError::Api` - the message was refused
    /// - transport, status and decoding errors
    pub async fn post_message(&self, message: &PostMessage) -> Result<ApiResponse, WebApiError> {
        let response: ApiResponse = self.post_form("chat.postMessage", message.to_form()).await?;
        if !response.ok {
            return Err(api_error(response));
        }
        Ok(response)
    }
}

async fn parse_response<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, WebApiError> {
    let status = response.status();
    if !status.is_success() {
        return Err(WebApiError::Status(status.as_u16()));
    }

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| WebApiError::Parse(e.to_string()))
}

fn api_error(response: ApiResponse) -> WebApiError {
    WebApiError::Api(response.error.unwrap_or_else(|| "unknown_error".to_string()))
}
