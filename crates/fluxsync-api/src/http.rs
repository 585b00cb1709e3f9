// Async HTTP client for the bulk retrieve endpoint.
//
// Endpoint: POST {base}/api/v1/{resource}/retrieve
// Request:  { "keys": [...] }
// Response: { "items": [...] }
//
// The server may return items in any order and may omit unknown keys.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::Error;

const USER_AGENT: &str = concat!("fluxsync/", env!("CARGO_PKG_VERSION"));

// ── Wire shapes ──────────────────────────────────────────────────────

#[derive(Serialize)]
struct RetrieveRequest<'a, K> {
    keys: &'a [K],
}

#[derive(Deserialize)]
struct RetrieveResponse<V> {
    items: Vec<V>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────

/// Bulk retrieval client. One request per batch of keys.
#[derive(Debug, Clone)]
pub struct HttpRetrieveClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Option<Duration>,
}

impl HttpRetrieveClient {
    /// Build a client with its own connection pool and request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            base_url: Self::normalize_base_url(base_url)?,
            timeout: Some(timeout),
        })
    }

    /// Wrap an existing `reqwest::Client` (caller manages headers and timeouts).
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: Self::normalize_base_url(base_url)?,
            timeout: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Ensure the base path ends with `/` so relative joins append.
    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        let path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{path}/"));
        Ok(url)
    }

    fn retrieve_url(&self, resource: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(&format!("api/v1/{resource}/retrieve"))?)
    }

    /// Fetch the items for `keys` in one request.
    pub async fn retrieve<K, V>(&self, resource: &str, keys: &[K]) -> Result<Vec<V>, Error>
    where
        K: Serialize + Sync,
        V: DeserializeOwned,
    {
        let url = self.retrieve_url(resource)?;
        debug!(%url, keys = keys.len(), "POST retrieve");

        let resp = self
            .http
            .post(url)
            .json(&RetrieveRequest { keys })
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let page: RetrieveResponse<V> = self.handle_response(resp).await?;
        Ok(page.items)
    }

    fn map_send_error(&self, e: reqwest::Error) -> Error {
        match self.timeout {
            Some(timeout) if e.is_timeout() => Error::Timeout {
                timeout_secs: timeout.as_secs(),
            },
            _ => Error::Transport(e),
        }
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();
        if !status.is_success() {
            return Err(Self::parse_error(status, resp).await);
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        })
    }

    async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
        let raw = resp.text().await.unwrap_or_default();

        let body = match serde_json::from_str::<ErrorResponse>(&raw) {
            Ok(ErrorResponse {
                message: Some(message),
            }) => message,
            _ if raw.is_empty() => status.to_string(),
            _ => raw,
        };

        Error::Status {
            status: status.as_u16(),
            body,
        }
    }
}
