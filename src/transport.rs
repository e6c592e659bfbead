use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::json;
use tracing::{debug, warn};

use crate::errors::{Error, Result};
use crate::token::RefreshResponse;

pub const REFRESH_PATH: &str = "/api/v1/auth/refresh";
pub(crate) const USER_AGENT: &str = concat!("gatepass-session/", env!("CARGO_PKG_VERSION"));

/// Exchanges a refresh token for a new grant.
#[async_trait]
pub trait RefreshTransport: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse>;
}

/// Calls the backend refresh endpoint over HTTP.
#[derive(Clone, Debug)]
pub struct HttpRefreshClient {
    http: Client,
    endpoint: Url,
}

impl HttpRefreshClient {
    pub fn new(api_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), api_url)
    }

    pub fn with_client(http: Client, api_url: &str) -> Result<Self> {
        let raw = format!("{}{}", api_url.trim_end_matches('/'), REFRESH_PATH);
        let endpoint = Url::parse(&raw)
            .map_err(|e| Error::Config(format!("Invalid API URL '{api_url}': {e}")))?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl RefreshTransport for HttpRefreshClient {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .header("User-Agent", USER_AGENT)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = error_message(&body);
            warn!(status = %status, message = %message, "refresh endpoint rejected request");
            return Err(Error::RefreshRejected(status, message));
        }

        let body = resp.text().await?;
        let parsed: RefreshResponse = serde_json::from_str(&body)
            .map_err(|e| Error::MalformedGrant(format!("unreadable body: {e}")))?;
        debug!(
            token_type = parsed.token_type.as_deref().unwrap_or("unknown"),
            expires_in = ?parsed.expires_in,
            "refresh endpoint ok"
        );
        Ok(parsed)
    }
}

/// Pulls a human-readable message out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    ["message", "detail", "error"]
        .iter()
        .find_map(|field| value.get(*field).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}
