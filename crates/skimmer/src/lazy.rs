//! Deferred one-time construction of shared resources.
//!
//! Connectors defer building their session state (parsed base URLs,
//! credentials) until the first operation needs it. [`LazySlot`] makes that
//! safe under contention: the construction lock is held across the factory,
//! so concurrent first callers coalesce on a single construction instead of
//! racing.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

/// A slot holding a lazily constructed shared value.
///
/// The factory runs at most once per successful initialization. A factory
/// error leaves the slot empty, so a later call retries construction; after
/// [`reset`](LazySlot::reset) the same applies. Dropping a `get_or_init`
/// future mid-factory releases the lock and leaves the slot empty.
pub struct LazySlot<T> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T> LazySlot<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Get the value, constructing it with `factory` if the slot is empty.
    ///
    /// Every caller that observes a successful construction receives a handle
    /// to the same value.
    pub async fn get_or_init<E, F, Fut>(&self, factory: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(value) = slot.as_ref() {
            return Ok(Arc::clone(value));
        }

        let value = Arc::new(factory().await?);
        *slot = Some(Arc::clone(&value));
        Ok(value)
    }

    /// Whether the slot currently holds a value.
    pub async fn initialized(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Clear the slot. The next `get_or_init` constructs anew; existing
    /// handles stay valid.
    pub async fn reset(&self) {
        *self.slot.lock().await = None;
    }
}

impl<T> Default for LazySlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for LazySlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazySlot").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::join_all;

    use super::*;

    #[tokio::test]
    async fn concurrent_first_callers_share_one_construction() {
        let slot = Arc::new(LazySlot::new());
        let built = Arc::new(AtomicUsize::new(0));

        let tasks = (0..10).map(|_| {
            let slot = Arc::clone(&slot);
            let built = Arc::clone(&built);
            tokio::spawn(async move {
                slot.get_or_init(|| async {
                    built.fetch_add(1, Ordering::SeqCst);
                    // Widen the race window so every task is in flight before
                    // construction finishes.
                    tokio::task::yield_now().await;
                    Ok::<_, ()>(String::from("session"))
                })
                .await
                .unwrap()
            })
        });

        let handles: Vec<Arc<String>> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    }

    #[tokio::test]
    async fn factory_error_leaves_the_slot_empty() {
        let slot: LazySlot<String> = LazySlot::new();

        let err = slot
            .get_or_init(|| async { Err::<String, _>("credentials rejected") })
            .await
            .unwrap_err();
        assert_eq!(err, "credentials rejected");
        assert!(!slot.initialized().await);

        let value = slot
            .get_or_init(|| async { Ok::<_, &str>(String::from("second try")) })
            .await
            .unwrap();
        assert_eq!(*value, "second try");
        assert!(slot.initialized().await);
    }

    #[tokio::test]
    async fn reset_forces_reconstruction() {
        let slot: LazySlot<usize> = LazySlot::new();
        let built = AtomicUsize::new(0);

        let first = slot
            .get_or_init(|| async {
                built.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(1)
            })
            .await
            .unwrap();

        slot.reset().await;
        assert!(!slot.initialized().await);

        let second = slot
            .get_or_init(|| async {
                built.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(2)
            })
            .await
            .unwrap();

        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!((*first, *second), (1, 2));
    }

    #[tokio::test]
    async fn settled_slot_skips_the_factory() {
        let slot: LazySlot<u32> = LazySlot::new();
        let built = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = slot
                .get_or_init(|| async {
                    built.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(7)
                })
                .await
                .unwrap();
            assert_eq!(*value, 7);
        }

        assert_eq!(built.load(Ordering::SeqCst), 1);
    }
}
