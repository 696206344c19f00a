use async_trait::async_trait;
use crux_http::protocol::{HttpRequest, HttpResponse};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::event::{Coordinate, Event};
use crate::model::{Cloud, FetchSeq, ProviderOption};

pub const CLOUDS_PATH: &str = "clouds/";
pub const PARAM_PROVIDERS: &str = "providers_req";
pub const PARAM_SORTED: &str = "sorted_by_geolocation";
pub const PARAM_LATITUDE: &str = "user_latitude";
pub const PARAM_LONGITUDE: &str = "user_longitude";

const MAX_ERROR_MESSAGE_LENGTH: usize = 512;
const GATEWAY_TIMEOUT: u16 = 504;
const BAD_GATEWAY: u16 = 502;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {code}: {message}")]
    Status { code: u16, message: String },

    #[error("failed to decode catalog response: {0}")]
    Decode(String),
}

impl HttpError {
    /// Maps a non-success response, keeping the server's `detail` when it sent one.
    #[must_use]
    pub fn from_status(code: u16, body: &str) -> Self {
        let message = serde_json::from_str::<ApiErrorResponse>(body)
            .ok()
            .and_then(|e| match e.detail {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
            .unwrap_or_else(|| format!("HTTP error: {code}"));

        Self::Status {
            code,
            message: truncate(&message, MAX_ERROR_MESSAGE_LENGTH),
        }
    }

    /// The response a shell hands back when its transport failed before any
    /// server answered. Timeouts become 504, everything else 502.
    #[must_use]
    pub fn gateway_response(&self) -> HttpResponse {
        let code = match self {
            Self::Timeout => GATEWAY_TIMEOUT,
            _ => BAD_GATEWAY,
        };
        let body = serde_json::json!({ "detail": self.to_string() }).to_string();
        HttpResponse::status(code).body(body.into_bytes()).build()
    }

    #[must_use]
    pub const fn is_gateway_timeout(code: u16) -> bool {
        code == GATEWAY_TIMEOUT
    }

    #[must_use]
    pub const fn is_bad_gateway(code: u16) -> bool {
        code == BAD_GATEWAY
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    detail: serde_json::Value,
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Parameters of one `GET /clouds/` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogRequest {
    /// Provider keys; empty requests every provider.
    pub providers: Vec<String>,
    pub sort_by_distance: bool,
    /// Only meaningful with `sort_by_distance`. Absent coordinates are sent
    /// as empty values; the server decides what that means.
    pub coordinate: Option<Coordinate>,
}

impl CatalogRequest {
    #[must_use]
    pub fn is_filtered(&self) -> bool {
        !self.providers.is_empty()
    }

    #[must_use]
    pub fn providers_req(&self) -> Option<String> {
        if self.providers.is_empty() {
            None
        } else {
            Some(self.providers.join(","))
        }
    }

    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(4);

        if let Some(providers) = self.providers_req() {
            pairs.push((PARAM_PROVIDERS, providers));
        }

        if self.sort_by_distance {
            pairs.push((PARAM_SORTED, "true".to_string()));
            let (lat, lon) = match self.coordinate {
                Some(c) => (c.lat().to_string(), c.lon().to_string()),
                None => (String::new(), String::new()),
            };
            pairs.push((PARAM_LATITUDE, lat));
            pairs.push((PARAM_LONGITUDE, lon));
        }

        pairs
    }

    /// The full request URL below `base`, which may carry a path prefix.
    #[must_use]
    pub fn url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        let prefix = base.path().trim_end_matches('/');
        url.set_path(&format!("{prefix}/{CLOUDS_PATH}"));
        url.set_query(None);
        url.set_fragment(None);

        let pairs = self.query_pairs();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        url
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CatalogResponse {
    pub clouds: Vec<Cloud>,
    pub providers: Vec<ProviderOption>,
}

impl CatalogResponse {
    pub fn from_json(body: &str) -> Result<Self, HttpError> {
        serde_json::from_str(body).map_err(|e| HttpError::Decode(e.to_string()))
    }
}

pub type CatalogResult = Result<CatalogResponse, HttpError>;

/// Decodes a raw `GET /clouds/` answer.
pub fn decode_catalog(status: u16, body: &[u8]) -> CatalogResult {
    let body = String::from_utf8_lossy(body);
    if !(200..300).contains(&status) {
        return Err(HttpError::from_status(status, &body));
    }
    CatalogResponse::from_json(&body)
}

/// Converts what `crux_http` hands to the callback into a catalog outcome.
pub fn catalog_result(result: crux_http::Result<crux_http::Response<Vec<u8>>>) -> CatalogResult {
    match result {
        Ok(mut response) => {
            let status: u16 = response.status().into();
            let body = response.take_body().unwrap_or_default();
            decode_catalog(status, &body)
        }
        Err(crux_http::Error::Http(err)) => {
            Err(HttpError::from_status(err.code.into(), &err.message))
        }
        Err(crux_http::Error::Json(reason)) => Err(HttpError::Decode(reason)),
        Err(other) => Err(HttpError::Network(other.to_string())),
    }
}

/// A catalog request tagged with the sequence number it was dispatched under.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogFetch {
    pub seq: FetchSeq,
    pub request: CatalogRequest,
}

impl CatalogFetch {
    /// The completion event to feed back into the core.
    #[must_use]
    pub fn into_event(self, result: CatalogResult) -> Event {
        Event::CatalogFetched {
            seq: self.seq,
            adopt_providers: !self.request.is_filtered(),
            result: Box::new(result),
        }
    }
}

/// Executes the core's HTTP requests on behalf of the headless shell.
///
/// `Err` means no server answered; the shell turns it into a gateway
/// response via [`HttpError::gateway_response`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError>;
}

#[cfg(feature = "http")]
mod client {
    use super::{HttpError, HttpRequest, HttpResponse, HttpTransport};
    use crate::config::{CatalogConfig, ConfigError};
    use async_trait::async_trait;
    use reqwest::{Client, Method};

    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: Client,
    }

    impl ReqwestTransport {
        pub fn new(config: &CatalogConfig) -> Result<Self, ConfigError> {
            let client = Client::builder()
                .timeout(config.request_timeout)
                .build()
                .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
            Ok(Self { client })
        }
    }

    fn transport_error(error: &reqwest::Error) -> HttpError {
        if error.is_timeout() {
            HttpError::Timeout
        } else {
            HttpError::Network(error.to_string())
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
            let invalid = |reason: String| HttpError::InvalidUrl {
                url: request.url.clone(),
                reason,
            };
            let method =
                Method::from_bytes(request.method.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let url = url::Url::parse(&request.url).map_err(|e| invalid(e.to_string()))?;
            tracing::debug!(%method, %url, "executing request");

            let mut builder = self.client.request(method, url);
            for header in &request.headers {
                builder = builder.header(header.name.as_str(), header.value.as_str());
            }
            if !request.body.is_empty() {
                builder = builder.body(request.body.clone());
            }

            let response = builder.send().await.map_err(|e| transport_error(&e))?;
            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(|e| transport_error(&e))?;

            Ok(HttpResponse::status(status).body(body.to_vec()).build())
        }
    }
}

#[cfg(feature = "http")]
pub use client::ReqwestTransport;
