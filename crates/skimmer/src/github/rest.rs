//! Blocking GitHub REST client.
//!
//! Everything here runs synchronously against a [`BlockingTransport`]; the
//! client never performs I/O of its own, so a bridge can trap its requests
//! and fetch them elsewhere. Responses are validated and decoded exactly
//! once, in this module, regardless of how the request was carried out.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::form_urlencoded;

use crate::bridge::{BlockingTransport, DispatchError, TrapError};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Default GitHub API host.
pub const GITHUB_HOST: &str = "https://api.github.com";

/// Default number of repositories requested per page.
const PER_PAGE: usize = 30;

/// Error type for [`GithubRest`] calls.
#[derive(Debug, Error)]
pub enum RestError {
    /// Non-success response from the API.
    #[error("GitHub API error: HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed GitHub response: {0}")]
    Decode(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl TrapError for RestError {
    fn trapped_request(&self) -> Option<&HttpRequest> {
        match self {
            RestError::Dispatch(err) => err.trapped_request(),
            _ => None,
        }
    }

    fn is_desync(&self) -> bool {
        matches!(self, RestError::Dispatch(err) if err.is_desync())
    }
}

/// One page of a repository list, with the `Link` successor when present.
#[derive(Debug)]
pub struct RepoPage {
    pub repos: Vec<Value>,
    pub next_url: Option<String>,
}

/// One page of a repository search, with the total across all pages.
#[derive(Debug)]
pub struct SearchPage {
    pub repos: Vec<Value>,
    pub total_count: usize,
}

#[derive(Deserialize)]
struct SearchPayload {
    total_count: usize,
    items: Vec<Value>,
}

/// Synchronous client for the GitHub REST API.
#[derive(Clone)]
pub struct GithubRest {
    transport: Arc<dyn BlockingTransport>,
    host: String,
    token: String,
    per_page: usize,
}

impl GithubRest {
    pub fn new(token: impl Into<String>, transport: Arc<dyn BlockingTransport>) -> Self {
        Self {
            transport,
            host: GITHUB_HOST.to_string(),
            token: token.into(),
            per_page: PER_PAGE,
        }
    }

    /// Point the client at a different API host (for GitHub Enterprise).
    #[must_use]
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_per_page(mut self, per_page: usize) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    /// Copy this client's configuration onto a different transport.
    #[must_use]
    pub fn clone_with_transport(&self, transport: Arc<dyn BlockingTransport>) -> Self {
        Self {
            transport,
            host: self.host.clone(),
            token: self.token.clone(),
            per_page: self.per_page,
        }
    }

    /// Get the API host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// First-page URL for a list endpoint under the configured host.
    pub fn list_url(&self, path: &str) -> String {
        let sep = if path.contains('?') { '&' } else { '?' };
        format!("{}{}{}per_page={}", self.host, path, sep, self.per_page)
    }

    /// The authenticated user's profile.
    pub fn viewer(&self) -> Result<Value, RestError> {
        self.get_json(&format!("{}/user", self.host))
    }

    /// A single repository by `owner/name`.
    pub fn repo(&self, full_name: &str) -> Result<Value, RestError> {
        self.get_json(&format!("{}/repos/{}", self.host, full_name))
    }

    /// One page of a repository list, addressed by full URL so `Link`
    /// successors can be requested verbatim.
    pub fn repos_page(&self, url: &str) -> Result<RepoPage, RestError> {
        let response = self.send(url)?;
        let next_url = response.header("link").and_then(next_link);
        let repos = decode(&response)?;
        Ok(RepoPage { repos, next_url })
    }

    /// One page of the repository search, 1-based.
    pub fn search_page(&self, query: &str, page: usize) -> Result<SearchPage, RestError> {
        let mut params = form_urlencoded::Serializer::new(String::new());
        params.append_pair("q", query);
        params.append_pair("per_page", &self.per_page.to_string());
        params.append_pair("page", &page.to_string());
        let url = format!("{}/search/repositories?{}", self.host, params.finish());

        let response = self.send(&url)?;
        let payload: SearchPayload = decode(&response)?;
        Ok(SearchPage {
            repos: payload.items,
            total_count: payload.total_count,
        })
    }

    fn send(&self, url: &str) -> Result<HttpResponse, RestError> {
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: vec![
                (
                    "Accept".to_string(),
                    "application/vnd.github+json".to_string(),
                ),
                ("User-Agent".to_string(), "skimmer".to_string()),
                ("Authorization".to_string(), format!("token {}", self.token)),
            ],
            body: Vec::new(),
        };

        let response = self.transport.dispatch(request)?;
        if !(200..300).contains(&response.status) {
            return Err(RestError::Api {
                status: response.status,
                message: response.body_text(),
            });
        }
        Ok(response)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, RestError> {
        let response = self.send(url)?;
        decode(&response)
    }
}

fn decode<T: serde::de::DeserializeOwned>(response: &HttpResponse) -> Result<T, RestError> {
    serde_json::from_slice(&response.body).map_err(|e| RestError::Decode(e.to_string()))
}

/// Extract the `rel="next"` URL from a `Link` header.
///
/// GitHub Link headers look like:
/// `<https://api.github.com/user/repos?per_page=30&page=2>; rel="next", <...&page=5>; rel="last"`
fn next_link(link_header: &str) -> Option<String> {
    for part in link_header.split(',') {
        let part = part.trim();

        let mut url = None;
        let mut rel = None;
        for segment in part.split(';') {
            let segment = segment.trim();
            if segment.starts_with('<') && segment.ends_with('>') {
                url = Some(&segment[1..segment.len() - 1]);
            } else if let Some(rel_value) = segment.strip_prefix("rel=") {
                rel = Some(rel_value.trim_matches('"'));
            }
        }

        if rel == Some("next")
            && let Some(url) = url
        {
            return Some(url.to_string());
        }
    }
    None
}
