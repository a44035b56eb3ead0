//! The core protocol: items, pages, repositories, and walks over them.
//!
//! A [`Repository`] can list, search, and retrieve items from some source.
//! Listing and searching are paginated lazily: each fetched [`Page`] carries
//! at most one deferred continuation to its successor, so a walk holds one
//! page in memory and performs exactly one fetch per page observed.
//!
//! # Example
//!
//! ```ignore
//! use skimmer::{Items, Repository};
//!
//! async fn dump(repo: &dyn Repository) -> Result<(), skimmer::RepoError> {
//!     let mut items = Items::list(repo);
//!     while let Some(item) = items.try_next().await? {
//!         println!("{}", item.id());
//!     }
//!     Ok(())
//! }
//! ```

mod errors;
mod iter;
mod search;
mod types;

pub use errors::RepoError;
pub use iter::{Items, Pages};
pub use search::filter_page;
pub use types::{Item, NextPage, Page};

pub(crate) use types::item_id;

use async_trait::async_trait;

/// A source of items that can be listed, searched, and fetched by id.
///
/// Implementors provide [`list_page`](Repository::list_page) and
/// [`get`](Repository::get). Sources with native querying also override
/// [`search_page`](Repository::search_page); the default filters the listing
/// client-side with [`filter_page`].
#[async_trait]
pub trait Repository: Send + Sync {
    /// Fetch the first page of the full listing.
    async fn list_page(&self) -> Result<Page, RepoError>;

    /// Fetch a single item by identifier.
    ///
    /// Returns [`RepoError::NotFound`] when the source has no such item.
    async fn get(&self, id: &str) -> Result<Item, RepoError>;

    /// Fetch the first page of results for `query`.
    async fn search_page(&self, query: &str) -> Result<Page, RepoError> {
        let page = self.list_page().await?;
        Ok(filter_page(page, query))
    }

    /// Walk the full listing page by page.
    fn list_pages(&self) -> Pages<'_>
    where
        Self: Sized,
    {
        Pages::list(self)
    }

    /// Walk the full listing item by item.
    fn list(&self) -> Items<'_>
    where
        Self: Sized,
    {
        Items::list(self)
    }

    /// Walk the results for `query` page by page.
    fn search_pages(&self, query: &str) -> Pages<'_>
    where
        Self: Sized,
    {
        Pages::search(self, query)
    }

    /// Walk the results for `query` item by item.
    fn search(&self, query: &str) -> Items<'_>
    where
        Self: Sized,
    {
        Items::search(self, query)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Single;

    #[async_trait]
    impl Repository for Single {
        async fn list_page(&self) -> Result<Page, RepoError> {
            Ok(Page::new(vec![
                Item::new("1", json!({"name": "First Thing"})),
                Item::new("2", json!({"name": "Second Thing"})),
            ]))
        }

        async fn get(&self, id: &str) -> Result<Item, RepoError> {
            match id {
                "1" => Ok(Item::new("1", json!({"name": "First Thing"}))),
                _ => Err(RepoError::not_found(id)),
            }
        }
    }

    #[tokio::test]
    async fn default_search_filters_the_listing() {
        let repo = Single;
        let page = repo.search_page("second").await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page.items()[0].id(), "2");
    }

    #[tokio::test]
    async fn trait_walk_methods_mirror_the_walker_constructors() {
        let repo = Single;
        let via_method = repo.list().try_collect().await.unwrap();
        let via_walker = Items::list(&repo).try_collect().await.unwrap();
        assert_eq!(via_method, via_walker);

        let hits = repo.search("thing").try_collect().await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn works_through_a_trait_object() {
        let repo: Box<dyn Repository> = Box::new(Single);
        let mut items = Items::list(repo.as_ref());
        assert_eq!(items.try_next().await.unwrap().unwrap().id(), "1");

        let err = repo.get("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
