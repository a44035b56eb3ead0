//! Jira issue connector.
//!
//! Issues are listed and searched through JQL with offset pagination; each
//! page's continuation captures the offset of the next slice. The
//! authenticated session is built once, on first use, and shared by every
//! fetch.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use url::Url;
use url::form_urlencoded;

use crate::http::reqwest_transport::ReqwestTransport;
use crate::http::{HttpMethod, HttpRequest, HttpTransport, basic_auth};
use crate::lazy::LazySlot;
use crate::repo::{Item, Page, RepoError, Repository, item_id};
use crate::retry::RetryPolicy;

/// Default number of issues requested per search page.
const PAGE_SIZE: usize = 100;

/// JQL for the plain listing, newest first.
const LIST_JQL: &str = "order by created DESC";

/// Issues on a Jira instance, via the REST search API.
#[derive(Clone)]
pub struct Issues {
    inner: Arc<IssuesInner>,
}

struct IssuesInner {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    username: String,
    password: String,
    page_size: usize,
    retry: RetryPolicy,
    session: LazySlot<ApiSession>,
}

/// Validated connection state, built lazily on first use.
struct ApiSession {
    root: String,
    auth_header: String,
}

impl Issues {
    /// Create a connector with a default HTTP client.
    ///
    /// `base_url` is the instance root, e.g. `https://company.atlassian.net`.
    /// It is validated on first fetch, not here.
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self, RepoError> {
        let transport = ReqwestTransport::with_timeout(StdDuration::from_secs(30))
            .map_err(|e| RepoError::init(e.to_string()))?;
        Ok(Self::new_with_transport(
            base_url,
            username,
            password,
            Arc::new(transport),
        ))
    }

    pub fn new_with_transport(
        base_url: &str,
        username: &str,
        password: &str,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(IssuesInner {
                transport,
                base_url: base_url.to_string(),
                username: username.to_string(),
                password: password.to_string(),
                page_size: PAGE_SIZE,
                retry: RetryPolicy::default(),
                session: LazySlot::new(),
            }),
        }
    }

    /// Use a different page size for search requests.
    #[must_use]
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.rebuild(|inner| inner.page_size = page_size.max(1))
    }

    /// Use a different retry policy for fetches.
    #[must_use]
    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        self.rebuild(|inner| inner.retry = retry)
    }

    fn rebuild(self, mutate: impl FnOnce(&mut IssuesInner)) -> Self {
        let mut inner = IssuesInner {
            transport: Arc::clone(&self.inner.transport),
            base_url: self.inner.base_url.clone(),
            username: self.inner.username.clone(),
            password: self.inner.password.clone(),
            page_size: self.inner.page_size,
            retry: self.inner.retry.clone(),
            session: LazySlot::new(),
        };
        mutate(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }
}

#[async_trait]
impl Repository for Issues {
    async fn list_page(&self) -> Result<Page, RepoError> {
        search_jql(Arc::clone(&self.inner), LIST_JQL.to_string(), 0).await
    }

    async fn get(&self, id: &str) -> Result<Item, RepoError> {
        let inner = &self.inner;
        let session = ensure_session(inner).await?;
        let url = format!("{}/rest/api/latest/issue/{}", session.root, id);

        let doc = inner
            .retry
            .run(|| fetch_issue(inner, &session, &url, id))
            .await?;
        item_from_document(doc)
    }

    /// Search issues whose text matches `query`, newest first.
    async fn search_page(&self, query: &str) -> Result<Page, RepoError> {
        let escaped = query.replace('"', "\\\"");
        let jql = format!("text ~ \"{escaped}\" {LIST_JQL}");
        search_jql(Arc::clone(&self.inner), jql, 0).await
    }
}

async fn ensure_session(inner: &IssuesInner) -> Result<Arc<ApiSession>, RepoError> {
    inner
        .session
        .get_or_init(|| async {
            let root = Url::parse(&inner.base_url)
                .map_err(|e| RepoError::init(format!("invalid Jira base URL: {e}")))?;
            Ok::<_, RepoError>(ApiSession {
                root: root.as_str().trim_end_matches('/').to_string(),
                auth_header: basic_auth(&inner.username, &inner.password),
            })
        })
        .await
}

/// One slice of a JQL search, with a continuation when the reported total
/// says more issues remain past this slice.
fn search_jql(
    inner: Arc<IssuesInner>,
    jql: String,
    start_at: usize,
) -> BoxFuture<'static, Result<Page, RepoError>> {
    Box::pin(async move {
        let session = ensure_session(&inner).await?;
        let url = search_url(&session.root, &jql, start_at, inner.page_size);

        let payload = inner
            .retry
            .run(|| get_json(&inner, &session, &url))
            .await?;

        let issues = payload
            .get("issues")
            .and_then(Value::as_array)
            .ok_or_else(|| RepoError::api("Jira search payload has no \"issues\" array"))?;
        let items = issues
            .iter()
            .map(|doc| item_from_document(doc.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let total = payload
            .get("total")
            .and_then(Value::as_u64)
            .ok_or_else(|| RepoError::api("Jira search payload has no \"total\" count"))?
            as usize;

        let seen = start_at + items.len();
        if total > seen {
            let inner = Arc::clone(&inner);
            Ok(Page::from_fn(items, move || {
                search_jql(Arc::clone(&inner), jql.clone(), seen)
            }))
        } else {
            Ok(Page::new(items))
        }
    })
}

fn search_url(root: &str, jql: &str, start_at: usize, max_results: usize) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("jql", jql);
    query.append_pair("startAt", &start_at.to_string());
    query.append_pair("maxResults", &max_results.to_string());
    query.append_pair("validateQuery", "none");
    format!("{root}/rest/api/latest/search?{}", query.finish())
}

fn api_request(session: &ApiSession, url: &str) -> HttpRequest {
    HttpRequest {
        method: HttpMethod::Get,
        url: url.to_string(),
        headers: vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("User-Agent".to_string(), "skimmer".to_string()),
            ("Authorization".to_string(), session.auth_header.clone()),
        ],
        body: Vec::new(),
    }
}

async fn get_json(
    inner: &IssuesInner,
    session: &ApiSession,
    url: &str,
) -> Result<Value, RepoError> {
    let response = inner.transport.send(api_request(session, url)).await?;
    if !(200..300).contains(&response.status) {
        return Err(RepoError::upstream(response.status, response.body_text()));
    }
    serde_json::from_slice(&response.body)
        .map_err(|e| RepoError::api(format!("malformed Jira response: {e}")))
}

/// Like [`get_json`] but for single-issue fetches, where 404 means the id
/// does not exist rather than an upstream fault.
async fn fetch_issue(
    inner: &IssuesInner,
    session: &ApiSession,
    url: &str,
    id: &str,
) -> Result<Value, RepoError> {
    let response = inner.transport.send(api_request(session, url)).await?;
    match response.status {
        404 => Err(RepoError::not_found(id)),
        s if !(200..300).contains(&s) => Err(RepoError::upstream(s, response.body_text())),
        _ => serde_json::from_slice(&response.body)
            .map_err(|e| RepoError::api(format!("malformed Jira response: {e}"))),
    }
}

fn item_from_document(doc: Value) -> Result<Item, RepoError> {
    let id = item_id(&doc).ok_or_else(|| RepoError::api("Jira issue has no id"))?;
    Ok(Item::new(id, doc))
}
