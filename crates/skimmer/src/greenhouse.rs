//! Greenhouse Job Board connector.
//!
//! Lists and fetches job posts for one board. The Job Board API returns the
//! whole listing in a single response, so walks over [`Jobs`] observe exactly
//! one terminal page.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde_json::Value;

use crate::http::reqwest_transport::ReqwestTransport;
use crate::http::{HttpMethod, HttpRequest, HttpTransport};
use crate::repo::{Item, Page, RepoError, Repository, item_id};

/// Default Greenhouse Job Board API host.
pub const GREENHOUSE_HOST: &str = "https://api.greenhouse.io";

/// Job posts for one board on the Greenhouse Job Board API.
///
/// Items are the raw job documents; the item id is the numeric job id
/// rendered as a string.
pub struct Jobs {
    transport: Arc<dyn HttpTransport>,
    host: String,
    board: String,
    content: bool,
    questions: bool,
}

impl Jobs {
    /// Create a connector for `board` with a default HTTP client.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let jobs = Jobs::new("acme")?;
    /// let page = jobs.list_page().await?;
    /// ```
    pub fn new(board: impl Into<String>) -> Result<Self, RepoError> {
        let transport = ReqwestTransport::with_timeout(StdDuration::from_secs(30))
            .map_err(|e| RepoError::init(e.to_string()))?;
        Ok(Self::new_with_transport(board, Arc::new(transport)))
    }

    pub fn new_with_transport(board: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            host: GREENHOUSE_HOST.to_string(),
            board: board.into(),
            content: true,
            questions: false,
        }
    }

    /// Point the connector at a different Greenhouse host.
    #[must_use]
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.trim_end_matches('/').to_string();
        self
    }

    /// Toggle the `content` flag on listing calls.
    ///
    /// When enabled (the default), each job post includes its full
    /// description, department, and office.
    #[must_use]
    pub fn with_content(mut self, content: bool) -> Self {
        self.content = content;
        self
    }

    /// Toggle the `questions` flag on single-job fetches.
    ///
    /// When enabled, fetched jobs include their application questions.
    /// Disabled by default.
    #[must_use]
    pub fn with_questions(mut self, questions: bool) -> Self {
        self.questions = questions;
        self
    }

    fn list_url(&self) -> String {
        let mut url = format!("{}/v1/boards/{}/jobs", self.host, self.board);
        if self.content {
            url.push_str("?content=true");
        }
        url
    }

    fn job_url(&self, job_id: &str) -> String {
        let mut url = format!("{}/v1/boards/{}/jobs/{}", self.host, self.board, job_id);
        if self.questions {
            url.push_str("?questions=true");
        }
        url
    }

    fn request(&self, url: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: url.to_string(),
            headers: vec![
                ("Accept".to_string(), "application/json".to_string()),
                ("User-Agent".to_string(), "skimmer".to_string()),
            ],
            body: Vec::new(),
        }
    }
}

#[async_trait]
impl Repository for Jobs {
    /// List jobs on the board.
    ///
    /// See <https://developers.greenhouse.io/job-board.html#list-jobs>.
    async fn list_page(&self) -> Result<Page, RepoError> {
        let response = self.transport.send(self.request(&self.list_url())).await?;
        if !(200..300).contains(&response.status) {
            return Err(RepoError::upstream(response.status, response.body_text()));
        }

        let payload: Value = serde_json::from_slice(&response.body)
            .map_err(|e| RepoError::api(format!("malformed Greenhouse response: {e}")))?;
        page_from_payload(&payload)
    }

    /// Get a job by id.
    ///
    /// See <https://developers.greenhouse.io/job-board.html#retrieve-a-job>.
    async fn get(&self, id: &str) -> Result<Item, RepoError> {
        let response = self.transport.send(self.request(&self.job_url(id))).await?;
        match response.status {
            404 => Err(RepoError::not_found(id)),
            s if !(200..300).contains(&s) => Err(RepoError::upstream(s, response.body_text())),
            _ => {
                let doc: Value = serde_json::from_slice(&response.body)
                    .map_err(|e| RepoError::api(format!("malformed Greenhouse response: {e}")))?;
                item_from_document(doc)
            }
        }
    }
}

fn page_from_payload(payload: &Value) -> Result<Page, RepoError> {
    let jobs = payload
        .get("jobs")
        .and_then(Value::as_array)
        .ok_or_else(|| RepoError::api("Greenhouse payload has no \"jobs\" array"))?;

    let items = jobs
        .iter()
        .map(|doc| item_from_document(doc.clone()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page::new(items))
}

fn item_from_document(doc: Value) -> Result<Item, RepoError> {
    let id = item_id(&doc).ok_or_else(|| RepoError::api("Greenhouse job has no id"))?;
    Ok(Item::new(id, doc))
}
