//! Request Executor for the SecurityCenter REST API.
//!
//! Every call is described by an [`ApiRequest`] that states up front whether it carries
//! credentials. [`SecurityCenterClient`] turns that description into a reqwest call, attaching
//! the session cookie and the token header as the [`Session`] allows.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE, HeaderMap, SET_COOKIE};
use serde_json::{Map, Value};
use std::fmt;
use url::Url;

use crate::session::Session;
use crate::tabular::value_to_string;
use crate::{SecurityCenterConfig, SecurityCenterError};

/// Name of the cookie that identifies a SecurityCenter session.
pub const SESSION_COOKIE: &str = "TNS_SESSIONID";

/// Header carrying the token issued at login.
pub const TOKEN_HEADER: &str = "X-SecurityCenter";

/// Unauthenticated request used to obtain an anonymous session cookie.
pub const SYSTEM_PATH: &str = "system";

/// Credential exchange endpoint.
pub const TOKEN_PATH: &str = "token";

/// HTTP verbs used against the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single API call, built per request and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Endpoint path below the API prefix, e.g. `asset` or `scan/12`
    pub path: String,
    /// Query parameters for GET, JSON body for POST/PATCH
    pub fields: Map<String, Value>,
    /// Whether credentials from the session are attached
    pub auth_required: bool,
}

impl ApiRequest {
    fn new(method: HttpMethod, path: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            method,
            path: path.into(),
            fields,
            auth_required: true,
        }
    }

    /// Authenticated GET with no query parameters.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path, Map::new())
    }

    /// Authenticated POST with `body` as JSON.
    pub fn post(path: impl Into<String>, body: Map<String, Value>) -> Self {
        Self::new(HttpMethod::Post, path, body)
    }

    /// Authenticated PATCH with `body` as JSON.
    pub fn patch(path: impl Into<String>, body: Map<String, Value>) -> Self {
        Self::new(HttpMethod::Patch, path, body)
    }

    /// Add a query parameter or body field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Send this request without any credentials.
    #[must_use]
    pub fn unauthenticated(mut self) -> Self {
        self.auth_required = false;
        self
    }

    fn normalized_path(&self) -> &str {
        self.path.trim_matches('/')
    }
}

/// Parsed API response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Resolved URL, kept for diagnostics
    pub url: String,
    pub headers: HeaderMap,
    pub body: Value,
}

impl ApiResponse {
    /// The `response` member of the envelope, `Null` when absent.
    #[must_use]
    pub fn response(&self) -> &Value {
        &self.body["response"]
    }

    /// Records of a list response.
    ///
    /// Plain listings return an array under `response`; filtered listings return an object
    /// keyed by filter name (`manageable`, `usable`).
    #[must_use]
    pub fn collection(&self, filter: Option<&str>) -> Option<&[Value]> {
        match self.response() {
            Value::Array(items) => Some(items.as_slice()),
            response @ Value::Object(_) => filter
                .and_then(|filter| response.get(filter))
                .and_then(Value::as_array)
                .map(Vec::as_slice),
            _ => None,
        }
    }

    /// Application-level error code; an absent code counts as success.
    #[must_use]
    pub fn error_code(&self) -> i64 {
        match self.body.get("error_code") {
            None | Some(Value::Null) => 0,
            Some(Value::Number(code)) => code.as_i64().unwrap_or(-1),
            Some(Value::String(code)) => code.trim().parse().unwrap_or(-1),
            Some(_) => -1,
        }
    }

    #[must_use]
    pub fn error_msg(&self) -> Option<&str> {
        self.body
            .get("error_msg")
            .and_then(Value::as_str)
            .filter(|msg| !msg.is_empty())
    }

    /// HTTP 200 and `error_code == 0`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == 200 && self.error_code() == 0
    }

    /// All `Set-Cookie` header values that are valid UTF-8.
    pub fn set_cookies(&self) -> impl Iterator<Item = &str> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
    }
}

/// Unparsed API response, used for file downloads.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub url: String,
    pub headers: HeaderMap,
    pub bytes: Vec<u8>,
}

impl RawResponse {
    /// File name announced in `Content-Disposition`, reduced to its last path component.
    #[must_use]
    pub fn attachment_filename(&self) -> Option<String> {
        let header = self.headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
        header
            .split(';')
            .map(str::trim)
            .find_map(|part| part.strip_prefix("filename="))
            .map(|name| name.trim_matches('"'))
            .and_then(|name| name.rsplit(['/', '\\']).next())
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .map(str::to_string)
    }
}

/// Seam between the components that talk to SecurityCenter and the HTTP transport.
#[async_trait]
pub trait ApiExecutor: Send + Sync {
    /// Issue `request` and parse the body as JSON.
    async fn execute(
        &self,
        request: &ApiRequest,
        session: Option<&Session>,
    ) -> Result<ApiResponse, SecurityCenterError>;

    /// Issue `request` and return the body untouched.
    async fn execute_raw(
        &self,
        request: &ApiRequest,
        session: Option<&Session>,
    ) -> Result<RawResponse, SecurityCenterError>;
}

/// reqwest-backed [`ApiExecutor`].
#[derive(Clone)]
pub struct SecurityCenterClient {
    config: SecurityCenterConfig,
    client: Client,
}

impl SecurityCenterClient {
    /// Create a client for the configured host.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a missing or malformed host and `Http` when the
    /// underlying HTTP client cannot be built.
    pub fn new(config: SecurityCenterConfig) -> Result<Self, SecurityCenterError> {
        config.validate()?;

        let mut client_builder = Client::builder();

        if !config.validate_certificates {
            client_builder = client_builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }

        client_builder = client_builder.timeout(config.timeout());

        let client = client_builder.build().map_err(SecurityCenterError::Http)?;
        Ok(Self { config, client })
    }

    #[must_use]
    pub fn config(&self) -> &SecurityCenterConfig {
        &self.config
    }

    /// Join host, API prefix and endpoint path.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when the host is not a valid URL.
    pub fn endpoint_url(&self, path: &str) -> Result<Url, SecurityCenterError> {
        let mut url = Url::parse(&self.config.host).map_err(|e| {
            SecurityCenterError::InvalidConfig(format!("Invalid host URL '{}': {e}", self.config.host))
        })?;

        let joined = [url.path(), self.config.api_prefix.as_str(), path]
            .iter()
            .map(|segment| segment.trim_matches('/'))
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        url.set_path(&joined);

        Ok(url)
    }

    /// Build the reqwest request for `request` without sending it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a bad host and `Serialization` when the body cannot be encoded.
    pub fn build_request(
        &self,
        request: &ApiRequest,
        session: Option<&Session>,
    ) -> Result<reqwest::RequestBuilder, SecurityCenterError> {
        let mut url = self.endpoint_url(request.normalized_path())?;

        let mut builder = match request.method {
            HttpMethod::Get => {
                if !request.fields.is_empty() {
                    let mut pairs = url.query_pairs_mut();
                    for (key, value) in &request.fields {
                        pairs.append_pair(key, &value_to_string(value));
                    }
                }
                self.client.get(url)
            }
            HttpMethod::Post | HttpMethod::Patch => {
                let body = serde_json::to_vec(&request.fields)?;
                let builder = if request.method == HttpMethod::Post {
                    self.client.post(url)
                } else {
                    self.client.patch(url)
                };
                builder.header(CONTENT_TYPE, "application/json").body(body)
            }
        };

        if request.auth_required
            && let Some(session) = session
        {
            if !session.session_id.is_empty() {
                builder = builder.header(COOKIE, format!("{SESSION_COOKIE}={}", session.session_id));
            }
            if session.has_token() && request.normalized_path() != TOKEN_PATH {
                builder = builder.header(TOKEN_HEADER, session.token.as_str());
            }
        }

        Ok(builder)
    }

    async fn send(
        &self,
        request: &ApiRequest,
        session: Option<&Session>,
    ) -> Result<reqwest::Response, SecurityCenterError> {
        let builder = self.build_request(request, session)?;

        if request.method != HttpMethod::Get && request.normalized_path() != TOKEN_PATH {
            debug!(
                "{} {} body: {}",
                request.method,
                request.path,
                Value::Object(request.fields.clone())
            );
        } else {
            debug!("{} {}", request.method, request.path);
        }

        let response = builder.send().await?;
        debug!("{} {} -> {}", request.method, response.url(), response.status());
        Ok(response)
    }
}

#[async_trait]
impl ApiExecutor for SecurityCenterClient {
    async fn execute(
        &self,
        request: &ApiRequest,
        session: Option<&Session>,
    ) -> Result<ApiResponse, SecurityCenterError> {
        let response = self.send(request, session).await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response.headers().clone();
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice(&bytes)?;

        Ok(ApiResponse {
            status,
            url,
            headers,
            body,
        })
    }

    async fn execute_raw(
        &self,
        request: &ApiRequest,
        session: Option<&Session>,
    ) -> Result<RawResponse, SecurityCenterError> {
        let response = self.send(request, session).await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response.headers().clone();
        let bytes = response.bytes().await?.to_vec();

        Ok(RawResponse {
            status,
            url,
            headers,
            bytes,
        })
    }
}
