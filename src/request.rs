// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote site access.
//!
//! The sync engine never talks HTTP directly. It goes through a [`Requester`]
//! that handles transport and turns non-success responses into errors. The
//! default requester is [`HttpRequester`], which is backed by `reqwest`.

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, StatusCode,
};
use std::{
    collections::BTreeMap,
    fmt::{Debug, Formatter, Result as FmtResult},
    time::Duration,
};
use tracing::{debug, instrument};

pub use reqwest::Method;

/// Request headers by name.
pub type Headers = BTreeMap<String, String>;

pub const AUTHORIZATION: &str = "Authorization";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const PUBLIC_KEY_ENDPOINT: &str = "x-skuid-public-key-endpoint";
pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_ZIP: &str = "application/zip";

/// Default timeout of a single request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Authentication context of a site.
///
/// Tokens are obtained by the caller. Nothing in here ever refreshes them.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Site URL, e.g., `https://example.skuidsite.com`.
    pub host: String,

    /// Short lived token for the metadata service.
    pub access_token: String,

    /// Long lived token for the data service.
    pub bearer_token: String,
}

impl AuthContext {
    pub fn new(
        host: impl Into<String>,
        access_token: impl Into<String>,
        bearer_token: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            access_token: access_token.into(),
            bearer_token: bearer_token.into(),
        }
    }
}

impl Debug for AuthContext {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("AuthContext")
            .field("host", &self.host)
            .field("access_token", &"<redacted>")
            .field("bearer_token", &"<redacted>")
            .finish()
    }
}

/// Capability to send requests to a remote site.
#[async_trait]
pub trait Requester: Send + Sync {
    /// Send request and return response body.
    ///
    /// # Errors
    ///
    /// - Return [`RequestError`] if transport fails or response status is not
    ///   a success.
    async fn request(
        &self,
        url: &str,
        method: Method,
        body: Vec<u8>,
        headers: &Headers,
    ) -> Result<Vec<u8>>;
}

/// Requester backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpRequester {
    client: Client,
}

impl HttpRequester {
    /// Construct new requester with per-request timeout.
    ///
    /// # Errors
    ///
    /// - Return [`RequestError::Client`] if HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RequestError::Client)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Requester for HttpRequester {
    #[instrument(skip(self, body, headers), level = "debug")]
    async fn request(
        &self,
        url: &str,
        method: Method,
        body: Vec<u8>,
        headers: &Headers,
    ) -> Result<Vec<u8>> {
        let mut header_map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| RequestError::InvalidHeader { name: name.clone() })?;
            let value = HeaderValue::from_str(value).map_err(|_| RequestError::InvalidHeader {
                name: name.as_str().to_string(),
            })?;
            header_map.insert(name, value);
        }

        debug!("send {} bytes", body.len());
        let response = self
            .client
            .request(method, url)
            .headers(header_map)
            .body(body)
            .send()
            .await
            .map_err(|source| RequestError::Transport {
                source,
                url: url.to_string(),
            })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|source| RequestError::Transport {
                source,
                url: url.to_string(),
            })?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(RequestError::Unauthorized {
                url: url.to_string(),
            });
        }

        if !status.is_success() {
            return Err(RequestError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        debug!("received {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }
}

/// Remote request error types.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// HTTP client cannot be constructed.
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    /// Header name or value is not valid.
    #[error("invalid request header {name:?}")]
    InvalidHeader { name: String },

    /// Request could not be sent, or response could not be read.
    #[error("request to {url} failed")]
    Transport {
        #[source]
        source: reqwest::Error,
        url: String,
    },

    /// Remote site rejected credentials.
    #[error("request to {url} is unauthorized")]
    Unauthorized { url: String },

    /// Remote site answered with a non-success status.
    #[error("request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
}

/// Friendly result alias :3
type Result<T, E = RequestError> = std::result::Result<T, E>;
