//! Authenticated calls to the gate-pass backend.

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{Error, Result};
use crate::token::TokenManager;
use crate::transport::USER_AGENT;

/// Attaches the current bearer token to requests and, on a 401, refreshes the
/// session once before retrying.
#[derive(Clone)]
pub struct AuthorizedClient {
    http: Client,
    base_url: String,
    manager: TokenManager,
}

impl AuthorizedClient {
    pub fn new(http: Client, base_url: impl Into<String>, manager: TokenManager) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            manager,
        }
    }

    pub fn manager(&self) -> &TokenManager {
        &self.manager
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.request(Method::GET, path, |req| req).await
    }

    pub async fn post_json<T>(&self, path: &str, body: &T) -> Result<Response>
    where
        T: Serialize + Sync,
    {
        self.request(Method::POST, path, |req| req.json(body)).await
    }

    /// Sends `method path`, letting `customize` add a body or headers.
    ///
    /// `customize` runs again for the retry, so it must be repeatable.
    pub async fn request<F>(&self, method: Method, path: &str, customize: F) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(path);
        let resp = self.send_once(&method, &url, &customize).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        warn!(method = %method, url = %url, "request unauthorized (401); refreshing session");
        self.manager.refresh_token().await?;

        let resp = self.send_once(&method, &url, &customize).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            let body = resp.text().await.unwrap_or_default();
            warn!(method = %method, url = %url, "request still unauthorized (401) after refresh");
            return Err(Error::Unauthorized(format!("401 after refresh: {body}")));
        }
        info!(method = %method, url = %url, "request succeeded after refresh");
        Ok(resp)
    }

    async fn send_once<F>(&self, method: &Method, url: &str, customize: &F) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let token = self
            .manager
            .access_token()
            .await
            .ok_or(Error::NotAuthenticated)?;
        let req = self
            .http
            .request(method.clone(), url)
            .bearer_auth(token)
            .header("User-Agent", USER_AGENT);
        Ok(customize(req).send().await?)
    }
}
