mod client;
mod controller;
mod model;
pub mod render;

use std::time::Duration;

pub use client::{
    HttpSearchClient, REQUESTED_WITH_HEADER, REQUESTED_WITH_VALUE, SearchBackend, SuggestError,
    encode_component,
};
pub use controller::{ClickTarget, Dropdown, KeyUp, ResultsView, SuggestBox};
pub use model::{Category, Item, Query, ResultSet, SearchResponse};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Settings shared by the HTTP client and the controller.
#[derive(Debug, Clone)]
pub struct SuggestConfig {
    /// Scheme and authority of the site serving the search endpoint.
    pub endpoint: String,
    pub search_path: String,
    /// Quiet period a keystroke must be followed by before a request goes out.
    pub debounce: Duration,
    /// `None` waits for the server indefinitely.
    pub request_timeout: Option<Duration>,
    /// Drop responses that belong to an older keystroke than the latest one.
    pub discard_stale: bool,
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000".to_string(),
            search_path: "/search/".to_string(),
            debounce: DEFAULT_DEBOUNCE,
            request_timeout: None,
            discard_stale: true,
        }
    }
}
