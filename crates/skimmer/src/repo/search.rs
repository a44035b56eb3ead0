use std::sync::Arc;

use futures::FutureExt;

use super::{NextPage, Page};

/// Filter a page down to items matching `query`, rewrapping its continuation
/// so every later page is filtered the same way.
///
/// This backs the default search for sources without native querying. The
/// page-fetch sequence is untouched: filtering a walk issues exactly the
/// fetches a plain listing would, and pages that filter down to nothing are
/// kept (empty, non-terminal) rather than collapsed.
#[must_use]
pub fn filter_page(page: Page, query: &str) -> Page {
    filter_with(page, Arc::from(query))
}

fn filter_with(page: Page, query: Arc<str>) -> Page {
    let (items, next) = page.into_parts();
    let items: Vec<_> = items
        .into_iter()
        .filter(|item| item.matches(&query))
        .collect();

    match next {
        None => Page::new(items),
        Some(next) => Page::from_fn(items, move || rewrapped(Arc::clone(&next), Arc::clone(&query))),
    }
}

fn rewrapped(
    next: NextPage,
    query: Arc<str>,
) -> futures::future::BoxFuture<'static, Result<Page, super::RepoError>> {
    async move { Ok(filter_with(next().await?, query)) }.boxed()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::repo::Item;

    fn named(id: &str, name: &str) -> Item {
        Item::new(id, json!({"name": name}))
    }

    fn two_fetch_chain(fetches: Arc<AtomicUsize>) -> Page {
        // First page carries a continuation to a second, terminal page. Both
        // constructions count as fetches the way a connector's would.
        fetches.fetch_add(1, Ordering::SeqCst);
        let counter = Arc::clone(&fetches);
        Page::from_fn(
            vec![named("1", "Widget Alpha"), named("2", "Gadget Beta")],
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Page::new(vec![
                        named("3", "Widget Gamma"),
                        named("4", "Gizmo Delta"),
                    ]))
                }
                .boxed()
            },
        )
    }

    #[tokio::test]
    async fn filters_current_items_and_later_pages() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let page = filter_page(two_fetch_chain(Arc::clone(&fetches)), "widget");

        assert_eq!(page.len(), 1);
        assert_eq!(page.items()[0].id(), "1");

        let next = page.next_page().await.unwrap().expect("second page");
        assert_eq!(next.len(), 1);
        assert_eq!(next.items()[0].id(), "3");
        assert!(next.is_terminal());
    }

    #[tokio::test]
    async fn fetch_count_matches_plain_listing() {
        let plain = Arc::new(AtomicUsize::new(0));
        let mut page = Some(two_fetch_chain(Arc::clone(&plain)));
        while let Some(p) = page {
            page = p.next_page().await.unwrap();
        }

        let filtered = Arc::new(AtomicUsize::new(0));
        let mut page = Some(filter_page(two_fetch_chain(Arc::clone(&filtered)), "widget"));
        while let Some(p) = page {
            page = p.next_page().await.unwrap();
        }

        assert_eq!(plain.load(Ordering::SeqCst), 2);
        assert_eq!(filtered.load(Ordering::SeqCst), plain.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn page_filtered_to_nothing_stays_non_terminal() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let page = filter_page(two_fetch_chain(fetches), "delta");

        assert!(page.is_empty());
        assert!(!page.is_terminal());

        let next = page.next_page().await.unwrap().expect("second page");
        assert_eq!(next.items()[0].id(), "4");
    }

    #[test]
    fn no_match_on_terminal_page_yields_empty_terminal() {
        let page = filter_page(Page::new(vec![named("1", "only")]), "absent");
        assert!(page.is_empty());
        assert!(page.is_terminal());
    }
}
