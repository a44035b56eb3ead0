use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use super::RepoError;
use crate::text;

/// Deferred fetch of the page after the one that carries it.
///
/// Invoking the continuation performs the underlying fetch again, so a
/// continuation held past its first use re-issues work rather than replaying
/// a cached result.
pub type NextPage = Arc<dyn Fn() -> BoxFuture<'static, Result<Page, RepoError>> + Send + Sync>;

/// A single result from a source: a stable identifier plus the raw document.
///
/// Items are immutable once built. The document keeps its keys in insertion
/// order, matching what the upstream sent.
#[derive(Debug, Clone)]
pub struct Item {
    id: String,
    document: Value,
}

impl Item {
    pub fn new(id: impl Into<String>, document: Value) -> Self {
        Self {
            id: id.into(),
            document,
        }
    }

    /// Identifier of this item, unique within one result set.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The raw document as the source produced it.
    #[must_use]
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Whether the item's document matches `query` under normalized
    /// substring comparison.
    #[must_use]
    pub fn matches(&self, query: &str) -> bool {
        text::matches(query, &self.document)
    }

    #[must_use]
    pub fn into_document(self) -> Value {
        self.document
    }
}

/// Items compare by identifier. Two fetches of the same logical item are
/// equal even when the source has since revised the document.
impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Item {}

/// One page of results plus an optional continuation to the next page.
///
/// A page without a continuation is terminal. An empty page with a
/// continuation is valid and non-terminal: client-side filtering can empty a
/// page without ending the result set.
#[derive(Clone)]
pub struct Page {
    items: Vec<Item>,
    next: Option<NextPage>,
}

impl Page {
    /// Create a terminal page.
    #[must_use]
    pub fn new(items: Vec<Item>) -> Self {
        Self { items, next: None }
    }

    /// Create a page whose successor is produced by `next`.
    ///
    /// The closure is invoked each time the continuation is followed and must
    /// perform the fetch from scratch.
    #[must_use]
    pub fn from_fn<F>(items: Vec<Item>, next: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<Page, RepoError>> + Send + Sync + 'static,
    {
        Self {
            items,
            next: Some(Arc::new(next)),
        }
    }

    #[must_use]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether this page ends the result set.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.next.is_none()
    }

    /// Fetch the next page, or `None` when this page is terminal.
    ///
    /// This is the only point at which the page suspends; everything else on
    /// a fetched page is immediate.
    pub async fn next_page(&self) -> Result<Option<Page>, RepoError> {
        match &self.next {
            Some(next) => next().await.map(Some),
            None => Ok(None),
        }
    }

    #[must_use]
    pub fn into_items(self) -> Vec<Item> {
        self.items
    }

    pub(crate) fn next_fn(&self) -> Option<NextPage> {
        self.next.clone()
    }

    pub(crate) fn into_parts(self) -> (Vec<Item>, Option<NextPage>) {
        (self.items, self.next)
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("items", &self.items)
            .field("terminal", &self.next.is_none())
            .finish()
    }
}

impl<'a> IntoIterator for &'a Page {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Extract a string identifier from a JSON payload field.
///
/// Sources disagree on id representation: some send strings, some numbers.
pub(crate) fn item_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
