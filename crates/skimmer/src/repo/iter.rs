use super::{Item, NextPage, Page, RepoError, Repository};

enum WalkState {
    /// No fetch issued yet; the first `try_next` seeds the walk.
    Seed,
    /// The previous page's continuation, to be invoked on the next pull.
    Next(NextPage),
    /// Walk finished or failed; every further pull returns `Ok(None)`.
    Done,
}

/// Pull-based walk over a repository's pages.
///
/// Construction fetches nothing. Each successful `try_next` performs exactly
/// one page fetch, so walking n pages costs n fetches regardless of how many
/// items they carry. After the terminal page or an error the walker is fused.
pub struct Pages<'a> {
    repo: &'a (dyn Repository + 'a),
    query: Option<String>,
    state: WalkState,
}

impl<'a> Pages<'a> {
    /// Walk the repository's full listing.
    pub fn list(repo: &'a (dyn Repository + 'a)) -> Self {
        Self {
            repo,
            query: None,
            state: WalkState::Seed,
        }
    }

    /// Walk the repository's results for `query`.
    pub fn search(repo: &'a (dyn Repository + 'a), query: impl Into<String>) -> Self {
        Self {
            repo,
            query: Some(query.into()),
            state: WalkState::Seed,
        }
    }

    /// Fetch and yield the next page, or `Ok(None)` once the walk is over.
    ///
    /// Empty pages are yielded like any other; only a missing continuation
    /// ends the walk.
    pub async fn try_next(&mut self) -> Result<Option<Page>, RepoError> {
        let fetched = match std::mem::replace(&mut self.state, WalkState::Done) {
            WalkState::Seed => match &self.query {
                Some(query) => self.repo.search_page(query).await,
                None => self.repo.list_page().await,
            },
            WalkState::Next(next) => next().await,
            WalkState::Done => return Ok(None),
        };

        let page = fetched?;
        if let Some(next) = page.next_fn() {
            self.state = WalkState::Next(next);
        }
        Ok(Some(page))
    }
}

/// Pull-based walk over a repository's items, flattening pages in order.
///
/// Pages are fetched one at a time as the walk crosses page boundaries; empty
/// pages are crossed without yielding and without extra fetches.
pub struct Items<'a> {
    pages: Pages<'a>,
    buffered: std::vec::IntoIter<Item>,
}

impl<'a> Items<'a> {
    /// Walk every item in the repository's listing.
    pub fn list(repo: &'a (dyn Repository + 'a)) -> Self {
        Self {
            pages: Pages::list(repo),
            buffered: Vec::new().into_iter(),
        }
    }

    /// Walk every item matching `query`.
    pub fn search(repo: &'a (dyn Repository + 'a), query: impl Into<String>) -> Self {
        Self {
            pages: Pages::search(repo, query),
            buffered: Vec::new().into_iter(),
        }
    }

    /// Yield the next item, or `Ok(None)` once the walk is over.
    pub async fn try_next(&mut self) -> Result<Option<Item>, RepoError> {
        loop {
            if let Some(item) = self.buffered.next() {
                return Ok(Some(item));
            }
            match self.pages.try_next().await? {
                Some(page) => self.buffered = page.into_items().into_iter(),
                None => return Ok(None),
            }
        }
    }

    /// Drain the walk into a vector.
    pub async fn try_collect(mut self) -> Result<Vec<Item>, RepoError> {
        let mut all = Vec::new();
        while let Some(item) = self.try_next().await? {
            all.push(item);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::FutureExt;
    use serde_json::json;

    use super::*;

    /// Repository over canned pages, counting every page fetch.
    struct Canned {
        pages: Vec<Vec<&'static str>>,
        fetches: Arc<AtomicUsize>,
    }

    impl Canned {
        fn new(pages: Vec<Vec<&'static str>>) -> Self {
            Self {
                pages,
                fetches: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        fn page_at(pages: Arc<Vec<Vec<&'static str>>>, index: usize, fetches: Arc<AtomicUsize>) -> Page {
            fetches.fetch_add(1, Ordering::SeqCst);
            let items = pages[index]
                .iter()
                .map(|id| Item::new(*id, json!({"id": id})))
                .collect();
            if index + 1 < pages.len() {
                Page::from_fn(items, move || {
                    let pages = Arc::clone(&pages);
                    let fetches = Arc::clone(&fetches);
                    async move { Ok(Self::page_at(pages, index + 1, fetches)) }.boxed()
                })
            } else {
                Page::new(items)
            }
        }
    }

    #[async_trait]
    impl Repository for Canned {
        async fn list_page(&self) -> Result<Page, RepoError> {
            Ok(Self::page_at(
                Arc::new(self.pages.clone()),
                0,
                Arc::clone(&self.fetches),
            ))
        }

        async fn get(&self, id: &str) -> Result<Item, RepoError> {
            Err(RepoError::not_found(id))
        }
    }

    /// Repository whose first fetch fails.
    struct Broken;

    #[async_trait]
    impl Repository for Broken {
        async fn list_page(&self) -> Result<Page, RepoError> {
            Err(RepoError::transient("upstream down"))
        }

        async fn get(&self, id: &str) -> Result<Item, RepoError> {
            Err(RepoError::not_found(id))
        }
    }

    #[tokio::test]
    async fn walks_all_pages_with_one_fetch_each() {
        let repo = Canned::new(vec![vec!["a", "b"], vec!["c"]]);
        let mut pages = Pages::list(&repo);

        let first = pages.try_next().await.unwrap().expect("first page");
        assert_eq!(first.len(), 2);
        let second = pages.try_next().await.unwrap().expect("second page");
        assert_eq!(second.len(), 1);
        assert!(pages.try_next().await.unwrap().is_none());

        assert_eq!(repo.fetches(), 2);
    }

    #[tokio::test]
    async fn construction_fetches_nothing() {
        let repo = Canned::new(vec![vec!["a"]]);
        let _pages = Pages::list(&repo);
        let _items = Items::list(&repo);
        assert_eq!(repo.fetches(), 0);
    }

    #[tokio::test]
    async fn walker_is_fused_after_the_end() {
        let repo = Canned::new(vec![vec!["a"]]);
        let mut pages = Pages::list(&repo);

        assert!(pages.try_next().await.unwrap().is_some());
        assert!(pages.try_next().await.unwrap().is_none());
        assert!(pages.try_next().await.unwrap().is_none());
        assert_eq!(repo.fetches(), 1);
    }

    #[tokio::test]
    async fn walker_is_fused_after_an_error() {
        let repo = Broken;
        let mut pages = Pages::list(&repo);

        assert!(pages.try_next().await.is_err());
        assert!(pages.try_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn items_flatten_pages_in_order() {
        let repo = Canned::new(vec![vec!["a", "b"], vec!["c"]]);
        let collected = Items::list(&repo).try_collect().await.unwrap();

        let ids: Vec<&str> = collected.iter().map(Item::id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(repo.fetches(), 2);
    }

    #[tokio::test]
    async fn items_cross_empty_pages_silently() {
        let repo = Canned::new(vec![vec!["a"], vec![], vec!["b"]]);
        let collected = Items::list(&repo).try_collect().await.unwrap();

        let ids: Vec<&str> = collected.iter().map(Item::id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(repo.fetches(), 3);
    }

    #[tokio::test]
    async fn search_walk_uses_the_fallback_filter() {
        let repo = Canned::new(vec![vec!["alpha", "beta"], vec!["alphabet"]]);
        let collected = Items::search(&repo, "alpha").try_collect().await.unwrap();

        let ids: Vec<&str> = collected.iter().map(Item::id).collect();
        assert_eq!(ids, vec!["alpha", "alphabet"]);
        assert_eq!(repo.fetches(), 2);
    }

    #[tokio::test]
    async fn yielded_pages_keep_their_own_continuations() {
        let repo = Canned::new(vec![vec!["a"], vec!["b"]]);
        let mut pages = Pages::list(&repo);

        let first = pages.try_next().await.unwrap().expect("first page");
        assert!(!first.is_terminal());

        // Following the yielded page's continuation directly re-issues the
        // fetch, independent of the walker's own progress.
        let replayed = first.next_page().await.unwrap().expect("second page");
        assert_eq!(replayed.items()[0].id(), "b");

        let second = pages.try_next().await.unwrap().expect("second page");
        assert_eq!(second.items()[0].id(), "b");
        assert_eq!(repo.fetches(), 3);
    }
}
