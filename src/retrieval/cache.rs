//! Time-bounded cache of notebook nodes shared by per-request retrievers.

use crate::node::Node;
use crate::store::StoreError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Notebook-keyed node cache with a fixed time-to-live.
///
/// The lock is never held across the loader, so concurrent misses may both hit the store;
/// the later write wins.
#[derive(Debug)]
pub struct NodeCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Arc<Vec<Node>>, Instant)>>,
}

impl NodeCache {
    /// Create an empty cache.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn fresh(&self, notebook_id: &str) -> Option<Arc<Vec<Node>>> {
        let entries = self.entries.lock().ok()?;
        let (nodes, fetched_at) = entries.get(notebook_id)?;
        (fetched_at.elapsed() < self.ttl).then(|| Arc::clone(nodes))
    }

    /// Return the cached nodes of `notebook_id`, running `load` when absent or expired.
    pub async fn get_or_load<F, Fut>(
        &self,
        notebook_id: &str,
        load: F,
    ) -> Result<Arc<Vec<Node>>, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Node>, StoreError>>,
    {
        if let Some(nodes) = self.fresh(notebook_id) {
            tracing::trace!(notebook_id, "Node cache hit");
            return Ok(nodes);
        }

        let nodes = Arc::new(load().await?);
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(notebook_id.to_string(), (Arc::clone(&nodes), Instant::now()));
        }
        tracing::debug!(notebook_id, nodes = nodes.len(), "Node cache refreshed");
        Ok(nodes)
    }

    /// Drop the entry of one notebook.
    pub fn invalidate(&self, notebook_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(notebook_id);
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Number of cached notebooks, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn node(id: &str) -> Node {
        Node::chunk(id, "text", None, "s", "nb")
    }

    #[tokio::test]
    async fn fresh_entries_skip_the_loader() {
        let cache = NodeCache::new(Duration::from_secs(60));
        let counter = AtomicUsize::new(0);
        let loads = &counter;
        let loader = move || async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<_, StoreError>(vec![node("a")])
        };

        let first = cache.get_or_load("nb", loader).await.unwrap();
        let second = cache.get_or_load("nb", loader).await.unwrap();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn expired_and_invalidated_entries_reload() {
        let cache = NodeCache::new(Duration::ZERO);
        let counter = AtomicUsize::new(0);
        let loads = &counter;
        let loader = move || async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<_, StoreError>(vec![node("a")])
        };

        cache.get_or_load("nb", loader).await.unwrap();
        cache.get_or_load("nb", loader).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        let cache = NodeCache::new(Duration::from_secs(60));
        cache.get_or_load("nb", loader).await.unwrap();
        cache.invalidate("nb");
        assert!(cache.is_empty());
        cache.get_or_load("nb", loader).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 4);

        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn loader_errors_are_not_cached() {
        let cache = NodeCache::new(Duration::from_secs(60));
        let failed = cache
            .get_or_load("nb", || async { Err(StoreError::Unavailable("down".into())) })
            .await;
        assert!(failed.is_err());
        assert!(cache.is_empty());
    }
}
