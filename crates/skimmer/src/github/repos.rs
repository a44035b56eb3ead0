//! Repository listings over the bridged REST client.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use super::rest::{GithubRest, RestError};
use crate::bridge::{BlockingTransport, Bridge, BridgeError};
use crate::http::HttpTransport;
use crate::http::reqwest_transport::ReqwestTransport;
use crate::lazy::LazySlot;
use crate::repo::{Item, Page, RepoError, Repository};

/// Whose repositories the connector serves.
#[derive(Debug, Clone)]
enum Owner {
    /// The token's own repositories.
    Viewer,
    /// A user's repositories.
    User(String),
    /// An organization's repositories.
    Org(String),
}

impl Owner {
    fn list_path(&self) -> String {
        match self {
            Owner::Viewer => "/user/repos?affiliation=owner".to_string(),
            Owner::User(login) => format!("/users/{login}/repos"),
            Owner::Org(org) => format!("/orgs/{org}/repos"),
        }
    }
}

/// Repositories for a user or organization on GitHub.
///
/// With neither a user nor an organization configured, the connector serves
/// the authenticated user's own repositories. `get` is not scoped by owner:
/// it returns any repository the token can see.
///
/// Items are raw repository documents; the item id is the `owner/name` full
/// name.
#[derive(Clone)]
pub struct Repos {
    inner: Arc<ReposInner>,
}

struct ReposInner {
    transport: Arc<dyn HttpTransport>,
    bridge: Bridge,
    rest: GithubRest,
    owner: Owner,
    viewer_login: LazySlot<String>,
}

impl Repos {
    /// Create a connector with a default HTTP client.
    ///
    /// At most one of `user` and `org` may be given; with both absent the
    /// connector serves the authenticated user's repositories.
    pub fn new(token: &str, user: Option<&str>, org: Option<&str>) -> Result<Self, RepoError> {
        let transport = ReqwestTransport::with_timeout(StdDuration::from_secs(30))
            .map_err(|e| RepoError::init(e.to_string()))?;
        Self::new_with_transport(token, user, org, Arc::new(transport))
    }

    pub fn new_with_transport(
        token: &str,
        user: Option<&str>,
        org: Option<&str>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, RepoError> {
        let owner = match (user, org) {
            (Some(_), Some(_)) => {
                return Err(RepoError::invalid_request("cannot specify both user and org"));
            }
            (Some(user), None) => Owner::User(user.to_string()),
            (None, Some(org)) => Owner::Org(org.to_string()),
            (None, None) => Owner::Viewer,
        };

        let bridge = Bridge::new(Arc::clone(&transport));
        let session: Arc<dyn BlockingTransport> = bridge.session();
        let rest = GithubRest::new(token, session);
        Ok(Self {
            inner: Arc::new(ReposInner {
                transport,
                bridge,
                rest,
                owner,
                viewer_login: LazySlot::new(),
            }),
        })
    }

    /// Point the connector at a different API host (for GitHub Enterprise).
    #[must_use]
    pub fn with_host(self, host: &str) -> Self {
        self.reassemble(|rest| rest.with_host(host))
    }

    /// Use a different page size for list and search requests.
    #[must_use]
    pub fn with_per_page(self, per_page: usize) -> Self {
        self.reassemble(|rest| rest.with_per_page(per_page))
    }

    fn reassemble(self, reconfigure: impl FnOnce(GithubRest) -> GithubRest) -> Self {
        let inner = &self.inner;
        let bridge = Bridge::new(Arc::clone(&inner.transport));
        let session: Arc<dyn BlockingTransport> = bridge.session();
        let rest = reconfigure(inner.rest.clone_with_transport(session));
        Self {
            inner: Arc::new(ReposInner {
                transport: Arc::clone(&inner.transport),
                bridge,
                rest,
                owner: inner.owner.clone(),
                viewer_login: LazySlot::new(),
            }),
        }
    }
}

impl std::fmt::Debug for Repos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repos")
            .field("owner", &self.inner.owner)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Repository for Repos {
    async fn list_page(&self) -> Result<Page, RepoError> {
        let url = self.inner.rest.list_url(&self.inner.owner.list_path());
        fetch_repos_page(Arc::clone(&self.inner), url).await
    }

    async fn get(&self, id: &str) -> Result<Item, RepoError> {
        let result = self.inner.bridge.drive(|| self.inner.rest.repo(id)).await;
        match result {
            Ok(doc) => item_from_document(doc),
            Err(BridgeError::Call(RestError::Api { status: 404, .. })) => {
                Err(RepoError::not_found(id))
            }
            Err(err) => Err(bridge_error(err)),
        }
    }

    /// Search repositories, scoped to the configured owner with a
    /// `user:`/`org:` qualifier.
    async fn search_page(&self, query: &str) -> Result<Page, RepoError> {
        let qualifier = search_qualifier(&self.inner).await?;
        let query = format!("{query} {qualifier}");
        search_repos(Arc::clone(&self.inner), query, 1, 0).await
    }
}

/// Walk a list endpoint page by page, following `Link` successors.
fn fetch_repos_page(
    inner: Arc<ReposInner>,
    url: String,
) -> BoxFuture<'static, Result<Page, RepoError>> {
    Box::pin(async move {
        let page = drive_rest(&inner, |rest| rest.repos_page(&url)).await?;
        let items = page
            .repos
            .into_iter()
            .map(item_from_document)
            .collect::<Result<Vec<_>, _>>()?;

        match page.next_url {
            Some(next) => {
                let inner = Arc::clone(&inner);
                Ok(Page::from_fn(items, move || {
                    fetch_repos_page(Arc::clone(&inner), next.clone())
                }))
            }
            None => Ok(Page::new(items)),
        }
    })
}

/// Walk the search, page by page, until `total_count` results were seen.
fn search_repos(
    inner: Arc<ReposInner>,
    query: String,
    page: usize,
    seen: usize,
) -> BoxFuture<'static, Result<Page, RepoError>> {
    Box::pin(async move {
        let result = drive_rest(&inner, |rest| rest.search_page(&query, page)).await?;
        let total = result.total_count;
        let items = result
            .repos
            .into_iter()
            .map(item_from_document)
            .collect::<Result<Vec<_>, _>>()?;

        let seen = seen + items.len();
        if seen < total {
            let inner = Arc::clone(&inner);
            Ok(Page::from_fn(items, move || {
                search_repos(Arc::clone(&inner), query.clone(), page + 1, seen)
            }))
        } else {
            Ok(Page::new(items))
        }
    })
}

async fn search_qualifier(inner: &Arc<ReposInner>) -> Result<String, RepoError> {
    match &inner.owner {
        Owner::User(login) => Ok(format!("user:{login}")),
        Owner::Org(org) => Ok(format!("org:{org}")),
        Owner::Viewer => {
            let login = viewer_login(inner).await?;
            Ok(format!("user:{login}"))
        }
    }
}

/// The authenticated user's login, fetched through the bridge once and
/// cached for every later search.
async fn viewer_login(inner: &Arc<ReposInner>) -> Result<Arc<String>, RepoError> {
    inner
        .viewer_login
        .get_or_init(|| async {
            let profile = drive_rest(inner, |rest| rest.viewer()).await?;
            let login = profile
                .get("login")
                .and_then(Value::as_str)
                .ok_or_else(|| RepoError::api("GitHub viewer profile has no login"))?;
            Ok::<_, RepoError>(login.to_string())
        })
        .await
}

async fn drive_rest<T>(
    inner: &ReposInner,
    call: impl Fn(&GithubRest) -> Result<T, RestError>,
) -> Result<T, RepoError> {
    inner
        .bridge
        .drive(|| call(&inner.rest))
        .await
        .map_err(bridge_error)
}

fn bridge_error(err: BridgeError<RestError>) -> RepoError {
    match err {
        BridgeError::Call(RestError::Api { status, message }) => {
            RepoError::upstream(status, message)
        }
        BridgeError::Call(other) => RepoError::api(other.to_string()),
        BridgeError::Transport(message) => RepoError::transient(message),
        other => RepoError::bridge(other.to_string()),
    }
}

fn item_from_document(doc: Value) -> Result<Item, RepoError> {
    let id = doc
        .get("full_name")
        .and_then(Value::as_str)
        .ok_or_else(|| RepoError::api("GitHub repository has no full_name"))?
        .to_string();
    Ok(Item::new(id, doc))
}
