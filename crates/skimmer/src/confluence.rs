//! Confluence page connector.
//!
//! Pages are listed and searched through CQL. Confluence paginates with a
//! cursor embedded in the response's `_links.next` value, so each page's
//! continuation follows that link instead of computing an offset. The
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

/// Default site path Confluence Cloud serves the wiki under.
pub const DEFAULT_BASE_PATH: &str = "/wiki";

/// Default number of results requested per search page.
const PAGE_SIZE: usize = 100;

/// Expansions requested for every search result.
const EXPAND: &str = "space,body.view,body.storage,body.export_view";

const LIST_CQL: &str = "order by created DESC";

/// Wiki pages on a Confluence site, via the CQL content search API.
///
/// Every query is constrained to `type=page`, and optionally to one space.
#[derive(Clone)]
pub struct Pages {
    inner: Arc<PagesInner>,
}

struct PagesInner {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    base_path: String,
    username: String,
    password: String,
    space: Option<String>,
    page_size: usize,
    retry: RetryPolicy,
    session: LazySlot<ApiSession>,
}

/// Validated connection state, built lazily on first use.
struct ApiSession {
    root: String,
    auth_header: String,
}

impl Pages {
    /// Create a connector with a default HTTP client.
    ///
    /// `base_url` is the site root, e.g. `https://company.atlassian.net`;
    /// the wiki is assumed to live under [`DEFAULT_BASE_PATH`].
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
            inner: Arc::new(PagesInner {
                transport,
                base_url: base_url.to_string(),
                base_path: DEFAULT_BASE_PATH.to_string(),
                username: username.to_string(),
                password: password.to_string(),
                space: None,
                page_size: PAGE_SIZE,
                retry: RetryPolicy::default(),
                session: LazySlot::new(),
            }),
        }
    }

    /// Serve the API from a different site path (for self-hosted instances
    /// that mount Confluence at the root, pass `""`).
    #[must_use]
    pub fn with_base_path(self, base_path: &str) -> Self {
        let normalized = normalize_base_path(base_path);
        self.rebuild(|inner| inner.base_path = normalized)
    }

    /// Restrict every listing and search to one space key.
    #[must_use]
    pub fn with_space(self, space: impl Into<String>) -> Self {
        let space = space.into();
        self.rebuild(|inner| inner.space = Some(space))
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

    fn rebuild(self, mutate: impl FnOnce(&mut PagesInner)) -> Self {
        let mut inner = PagesInner {
            transport: Arc::clone(&self.inner.transport),
            base_url: self.inner.base_url.clone(),
            base_path: self.inner.base_path.clone(),
            username: self.inner.username.clone(),
            password: self.inner.password.clone(),
            space: self.inner.space.clone(),
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
impl Repository for Pages {
    async fn list_page(&self) -> Result<Page, RepoError> {
        let cql = prefix_cql(&self.inner, LIST_CQL);
        search_cql(&self.inner, &cql).await
    }

    async fn get(&self, id: &str) -> Result<Item, RepoError> {
        let inner = &self.inner;
        let session = ensure_session(inner).await?;
        let url = format!("{}{}/rest/api/content/{}", session.root, inner.base_path, id);

        let doc = inner
            .retry
            .run(|| fetch_content(inner, &session, &url, id))
            .await?;
        item_from_document(doc)
    }

    /// Search pages whose text matches `query`, newest first.
    async fn search_page(&self, query: &str) -> Result<Page, RepoError> {
        let escaped = query.replace('"', "\\\"");
        let cql = prefix_cql(&self.inner, &format!("text ~ \"{escaped}\" {LIST_CQL}"));
        search_cql(&self.inner, &cql).await
    }
}

fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Prepend the fixed `type=page` clause (and the space clause, when
/// configured). A bare `order by` expression takes the prefix without a
/// joining `AND`.
fn prefix_cql(inner: &PagesInner, cql: &str) -> String {
    let mut clauses = vec!["type=page".to_string()];
    if let Some(space) = &inner.space {
        let escaped = space.replace('"', "\\\"");
        clauses.push(format!("space={escaped}"));
    }
    let prefix = clauses.join(" AND ");

    if cql.starts_with("order by") {
        format!("{prefix} {cql}")
    } else {
        format!("{prefix} AND {cql}")
    }
}

async fn ensure_session(inner: &PagesInner) -> Result<Arc<ApiSession>, RepoError> {
    inner
        .session
        .get_or_init(|| async {
            let root = Url::parse(&inner.base_url)
                .map_err(|e| RepoError::init(format!("invalid Confluence base URL: {e}")))?;
            Ok::<_, RepoError>(ApiSession {
                root: root.as_str().trim_end_matches('/').to_string(),
                auth_header: basic_auth(&inner.username, &inner.password),
            })
        })
        .await
}

async fn search_cql(inner: &Arc<PagesInner>, cql: &str) -> Result<Page, RepoError> {
    let session = ensure_session(inner).await?;
    let url = search_url(&session.root, &inner.base_path, cql, inner.page_size);
    fetch_search_page(Arc::clone(inner), url).await
}

/// Fetch one slice of a search. When the response carries a `_links.next`
/// cursor, the page's continuation follows it.
fn fetch_search_page(
    inner: Arc<PagesInner>,
    url: String,
) -> BoxFuture<'static, Result<Page, RepoError>> {
    Box::pin(async move {
        let session = ensure_session(&inner).await?;
        let payload = inner
            .retry
            .run(|| get_json(&inner, &session, &url))
            .await?;

        let results = payload
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| RepoError::api("Confluence search payload has no \"results\" array"))?;
        let items = results
            .iter()
            .map(|doc| item_from_document(doc.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let next_link = payload
            .get("_links")
            .and_then(|links| links.get("next"))
            .and_then(Value::as_str);
        match next_link {
            Some(link) => {
                let next_url = follow_url(&session.root, &inner.base_path, link);
                let inner = Arc::clone(&inner);
                Ok(Page::from_fn(items, move || {
                    fetch_search_page(Arc::clone(&inner), next_url.clone())
                }))
            }
            None => Ok(Page::new(items)),
        }
    })
}

fn search_url(root: &str, base_path: &str, cql: &str, limit: usize) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("cql", cql);
    query.append_pair("start", "0");
    query.append_pair("limit", &limit.to_string());
    query.append_pair("expand", EXPAND);
    format!(
        "{root}{base_path}/rest/api/content/search?{}",
        query.finish()
    )
}

/// Resolve a `_links.next` value. Confluence emits them relative to the
/// site path; absolute links are used verbatim.
fn follow_url(root: &str, base_path: &str, link: &str) -> String {
    if link.to_lowercase().starts_with("http") {
        link.to_string()
    } else {
        format!("{root}{base_path}{link}")
    }
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
    inner: &PagesInner,
    session: &ApiSession,
    url: &str,
) -> Result<Value, RepoError> {
    let response = inner.transport.send(api_request(session, url)).await?;
    if !(200..300).contains(&response.status) {
        return Err(RepoError::upstream(response.status, response.body_text()));
    }
    serde_json::from_slice(&response.body)
        .map_err(|e| RepoError::api(format!("malformed Confluence response: {e}")))
}

async fn fetch_content(
    inner: &PagesInner,
    session: &ApiSession,
    url: &str,
    id: &str,
) -> Result<Value, RepoError> {
    let response = inner.transport.send(api_request(session, url)).await?;
    match response.status {
        404 => Err(RepoError::not_found(id)),
        s if !(200..300).contains(&s) => Err(RepoError::upstream(s, response.body_text())),
        _ => serde_json::from_slice(&response.body)
            .map_err(|e| RepoError::api(format!("malformed Confluence response: {e}"))),
    }
}

fn item_from_document(doc: Value) -> Result<Item, RepoError> {
    let id = item_id(&doc).ok_or_else(|| RepoError::api("Confluence content has no id"))?;
    Ok(Item::new(id, doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, MockTransport};
    use serde_json::json;

    const ROOT: &str = "https://team.example.net";

    fn pages(transport: &MockTransport) -> Pages {
        Pages::new_with_transport(ROOT, "user", "secret", Arc::new(transport.clone()))
    }

    fn content(id: &str, title: &str) -> Value {
        json!({"id": id, "title": title, "type": "page"})
    }

    #[test]
    fn test_prefix_cql_joins_clauses() {
        let transport = MockTransport::new();
        let plain = pages(&transport);
        assert_eq!(
            prefix_cql(&plain.inner, "order by created DESC"),
            "type=page order by created DESC"
        );
        assert_eq!(
            prefix_cql(&plain.inner, "text ~ \"docs\" order by created DESC"),
            "type=page AND text ~ \"docs\" order by created DESC"
        );

        let scoped = pages(&transport).with_space("DOCS");
        assert_eq!(
            prefix_cql(&scoped.inner, "order by created DESC"),
            "type=page AND space=DOCS order by created DESC"
        );
    }

    #[test]
    fn test_base_path_is_normalized() {
        assert_eq!(normalize_base_path("/wiki"), "/wiki");
        assert_eq!(normalize_base_path("wiki/"), "/wiki");
        assert_eq!(normalize_base_path("confluence//"), "/confluence");
        assert_eq!(normalize_base_path(""), "");
        assert_eq!(normalize_base_path("/"), "");
    }

    #[tokio::test]
    async fn test_list_page_queries_page_content() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            search_url(ROOT, "/wiki", "type=page order by created DESC", 100),
            &json!({"results": [content("11", "Welcome")], "_links": {}}),
        );

        let repo = pages(&transport);
        let page = repo.list_page().await.unwrap();
        assert_eq!(page.len(), 1);
        assert!(page.is_terminal());
        assert_eq!(page.items()[0].id(), "11");
    }

    #[tokio::test]
    async fn test_continuations_follow_relative_next_links() {
        let transport = MockTransport::new();
        let next_link = "/rest/api/content/search?cql=type%3Dpage&cursor=abc";
        transport.push_json(
            HttpMethod::Get,
            search_url(ROOT, "/wiki", "type=page order by created DESC", 100),
            &json!({
                "results": [content("1", "One"), content("2", "Two")],
                "_links": {"next": next_link},
            }),
        );
        transport.push_json(
            HttpMethod::Get,
            format!("{ROOT}/wiki{next_link}"),
            &json!({"results": [content("3", "Three")], "_links": {}}),
        );

        let repo = pages(&transport);
        let all = repo.list().try_collect().await.unwrap();
        let ids: Vec<_> = all.iter().map(Item::id).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_absolute_next_links_are_followed_verbatim() {
        let transport = MockTransport::new();
        let next_link = "https://mirror.example.net/wiki/rest/api/content/search?cursor=xyz";
        transport.push_json(
            HttpMethod::Get,
            search_url(ROOT, "/wiki", "type=page order by created DESC", 100),
            &json!({"results": [content("1", "One")], "_links": {"next": next_link}}),
        );
        transport.push_json(
            HttpMethod::Get,
            next_link,
            &json!({"results": [], "_links": {}}),
        );

        let repo = pages(&transport);
        let all = repo.list().try_collect().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(transport.requests()[1].url, next_link);
    }

    #[tokio::test]
    async fn test_search_escapes_quotes_and_keeps_the_type_clause() {
        let cql = r#"type=page AND text ~ "say \"hi\"" order by created DESC"#;
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            search_url(ROOT, "/wiki", cql, 100),
            &json!({"results": [content("9", "Greeting")], "_links": {}}),
        );

        let repo = pages(&transport);
        let page = repo.search_page(r#"say "hi""#).await.unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_get_fetches_content_and_authenticates() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            format!("{ROOT}/wiki/rest/api/content/11"),
            &content("11", "Welcome"),
        );

        let repo = pages(&transport);
        let item = repo.get("11").await.unwrap();
        assert_eq!(item.id(), "11");
        assert_eq!(item.document()["title"], "Welcome");

        let requests = transport.requests();
        assert_eq!(
            requests[0].header("authorization"),
            Some(basic_auth("user", "secret").as_str())
        );
    }

    #[tokio::test]
    async fn test_get_maps_404_to_not_found() {
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            format!("{ROOT}/wiki/rest/api/content/404404"),
            HttpResponse {
                status: 404,
                headers: Vec::new(),
                body: b"{}".to_vec(),
            },
        );

        let repo = pages(&transport);
        let err = repo.get("404404").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_retries_transient_failures() {
        let url = search_url(ROOT, "/wiki", "type=page order by created DESC", 100);
        let transport = MockTransport::new();
        transport.push_response(
            HttpMethod::Get,
            url.clone(),
            HttpResponse {
                status: 500,
                headers: Vec::new(),
                body: b"too much at once".to_vec(),
            },
        );
        transport.push_json(
            HttpMethod::Get,
            url,
            &json!({"results": [content("1", "Recovered")], "_links": {}}),
        );

        let repo = pages(&transport);
        let page = repo.list_page().await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_custom_base_path_routes_requests() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            search_url(ROOT, "/confluence", "type=page order by created DESC", 100),
            &json!({"results": [], "_links": {}}),
        );

        let repo = pages(&transport).with_base_path("confluence/");
        let page = repo.list_page().await.unwrap();
        assert!(page.is_empty());
        assert!(page.is_terminal());
    }
}
