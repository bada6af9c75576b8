use crate::SuggestConfig;
use crate::model::{Query, ResultSet, SearchResponse};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use std::fmt;
use std::future::Future;
use tracing::debug;

pub const REQUESTED_WITH_HEADER: &str = "X-Requested-With";
pub const REQUESTED_WITH_VALUE: &str = "XMLHttpRequest";

// Same unreserved set as `encodeURIComponent`.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug)]
pub enum SuggestError {
    InvalidEndpoint(String),
    Http(reqwest::Error),
    Status(StatusCode),
    Decode(serde_json::Error),
}

impl fmt::Display for SuggestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuggestError::InvalidEndpoint(endpoint) => {
                write!(f, "invalid search endpoint {endpoint:?}")
            }
            SuggestError::Http(err) => write!(f, "search request failed: {err}"),
            SuggestError::Status(status) => write!(f, "search endpoint returned {status}"),
            SuggestError::Decode(err) => write!(f, "malformed search response: {err}"),
        }
    }
}

impl std::error::Error for SuggestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SuggestError::Http(err) => Some(err),
            SuggestError::Decode(err) => Some(err),
            SuggestError::InvalidEndpoint(_) | SuggestError::Status(_) => None,
        }
    }
}

impl From<reqwest::Error> for SuggestError {
    fn from(value: reqwest::Error) -> Self {
        SuggestError::Http(value)
    }
}

impl From<serde_json::Error> for SuggestError {
    fn from(value: serde_json::Error) -> Self {
        SuggestError::Decode(value)
    }
}

/// Anything that can answer a suggestion query with a categorized result set.
pub trait SearchBackend: Send + Sync + 'static {
    fn search(
        &self,
        query: &Query,
    ) -> impl Future<Output = Result<ResultSet, SuggestError>> + Send;
}

/// Talks to `GET {endpoint}{search_path}?q=...` the way the page script does.
#[derive(Debug, Clone)]
pub struct HttpSearchClient {
    http: reqwest::Client,
    search_url: String,
}

impl HttpSearchClient {
    pub fn new(config: &SuggestConfig) -> Result<Self, SuggestError> {
        let endpoint = config.endpoint.trim().trim_end_matches('/');
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(SuggestError::InvalidEndpoint(config.endpoint.clone()));
        }
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        let path = config.search_path.trim();
        let search_url = if path.starts_with('/') {
            format!("{endpoint}{path}")
        } else {
            format!("{endpoint}/{path}")
        };
        Ok(Self { http, search_url })
    }

    pub fn search_url(&self) -> &str {
        &self.search_url
    }

    pub fn request_url(&self, query: &Query) -> String {
        format!("{}?q={}", self.search_url, encode_component(query.as_str()))
    }
}

impl SearchBackend for HttpSearchClient {
    async fn search(&self, query: &Query) -> Result<ResultSet, SuggestError> {
        let url = self.request_url(query);
        debug!(%url, "issuing search request");
        let response = self
            .http
            .get(&url)
            .header(REQUESTED_WITH_HEADER, REQUESTED_WITH_VALUE)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SuggestError::Status(status));
        }
        let body = response.bytes().await?;
        let payload: SearchResponse = serde_json::from_slice(&body)?;
        debug!(
            categories = payload.results.category_count(),
            items = payload.results.total_items(),
            "search response decoded"
        );
        Ok(payload.results)
    }
}

pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, QUERY_COMPONENT).to_string()
}
