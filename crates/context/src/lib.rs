//! Context store for Chatfuse.
//!
//! Holds every open conversation context in memory, keyed by id. Each context
//! carries an append-only history. A background sweep evicts contexts that
//! have been idle longer than the configured age or whose history has grown
//! past the configured entry count.

use chatfuse_core::context::{Context, HistoryEntry};
use chatfuse_core::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Eviction thresholds.
#[derive(Debug, Clone, Copy)]
pub struct ContextLimits {
    pub max_age: Duration,
    pub max_entries: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
            max_entries: 1000,
        }
    }
}

/// In-memory context store. Cloning shares the underlying map.
#[derive(Clone)]
pub struct ContextStore {
    contexts: Arc<RwLock<HashMap<String, Context>>>,
    limits: ContextLimits,
}

impl ContextStore {
    pub fn new(limits: ContextLimits) -> Self {
        Self {
            contexts: Arc::new(RwLock::new(HashMap::new())),
            limits,
        }
    }

    pub fn limits(&self) -> ContextLimits {
        self.limits
    }

    /// Open a new context bound to `service_id` and return its id.
    pub async fn create(&self, service_id: &str, owner_data: serde_json::Value) -> String {
        let context_id = Uuid::new_v4().to_string();
        let context = Context::new(&context_id, service_id, owner_data);
        self.contexts.write().await.insert(context_id.clone(), context);
        debug!(context_id = %context_id, service_id, "Context created");
        context_id
    }

    /// Append an entry and bump `updated_at`.
    pub async fn append(&self, context_id: &str, entry: HistoryEntry) -> Result<()> {
        let mut contexts = self.contexts.write().await;
        let context = contexts
            .get_mut(context_id)
            .ok_or_else(|| Error::ContextNotFound(context_id.to_string()))?;
        context.push(entry);
        Ok(())
    }

    /// Snapshot of a whole context.
    pub async fn get(&self, context_id: &str) -> Result<Context> {
        self.contexts
            .read()
            .await
            .get(context_id)
            .cloned()
            .ok_or_else(|| Error::ContextNotFound(context_id.to_string()))
    }

    /// History in append order.
    pub async fn history(&self, context_id: &str) -> Result<Vec<HistoryEntry>> {
        self.contexts
            .read()
            .await
            .get(context_id)
            .map(|c| c.history.clone())
            .ok_or_else(|| Error::ContextNotFound(context_id.to_string()))
    }

    /// Delete a context on behalf of a caller. Deleting an absent context is
    /// reported as `ContextNotFound`.
    pub async fn evict(&self, context_id: &str) -> Result<()> {
        match self.contexts.write().await.remove(context_id) {
            Some(_) => {
                debug!(context_id, "Context evicted");
                Ok(())
            }
            None => Err(Error::ContextNotFound(context_id.to_string())),
        }
    }

    pub async fn len(&self) -> usize {
        self.contexts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.read().await.is_empty()
    }

    /// Remove every context idle longer than `max_age` at `now`, or holding
    /// more than `max_entries` entries. Returns how many were removed.
    ///
    /// Contexts that vanish between selection and removal are skipped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let stale = self.stale_ids(now).await;
        let removed = self.remove_stale(&stale).await;
        if removed > 0 {
            info!(removed, "Swept stale contexts");
        }
        removed
    }

    async fn stale_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        let max_age = chrono::Duration::from_std(self.limits.max_age).unwrap_or(chrono::Duration::MAX);
        let contexts = self.contexts.read().await;
        contexts
            .values()
            .filter(|c| now - c.updated_at > max_age || c.history.len() > self.limits.max_entries)
            .map(|c| c.context_id.clone())
            .collect()
    }

    async fn remove_stale(&self, stale: &[String]) -> usize {
        let mut removed = 0;
        let mut contexts = self.contexts.write().await;
        for id in stale {
            if contexts.remove(id).is_some() {
                removed += 1;
            } else {
                debug!(context_id = %id, "Context already gone during sweep");
            }
        }
        removed
    }

    /// Run [`sweep`](Self::sweep) every `every` on a background task.
    pub fn spawn_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                store.sweep(Utc::now()).await;
            }
        })
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(ContextLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatfuse_core::context::EntryKind;
    use serde_json::json;
    use std::collections::HashSet;

    #[tokio::test]
    async fn create_append_and_read_history() {
        let store = ContextStore::default();
        let id = store.create("ollama", json!({"userId": "u1"})).await;

        store.append(&id, HistoryEntry::request(json!({"message": "hi"}))).await.unwrap();
        store.append(&id, HistoryEntry::response(json!({"answer": "hello"}))).await.unwrap();

        let history = store.history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, EntryKind::Request);
        assert_eq!(history[1].payload["answer"], "hello");

        let context = store.get(&id).await.unwrap();
        assert_eq!(context.service_id, "ollama");
        assert_eq!(context.owner_data["userId"], "u1");
        assert!(context.updated_at >= context.created_at);
    }

    #[tokio::test]
    async fn append_to_missing_context_fails() {
        let store = ContextStore::default();
        let err = store
            .append("nope", HistoryEntry::request(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ContextNotFound(id) if id == "nope"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_yield_unique_ids() {
        let store = ContextStore::default();
        let handles: Vec<_> = (0..1000)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.create("kg", serde_json::Value::Null).await })
            })
            .collect();

        let ids: HashSet<String> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(ids.len(), 1000);
        assert_eq!(store.len().await, 1000);
    }

    #[tokio::test]
    async fn direct_evict_is_not_idempotent() {
        let store = ContextStore::default();
        let id = store.create("rag", serde_json::Value::Null).await;

        store.evict(&id).await.unwrap();
        assert!(matches!(store.history(&id).await, Err(Error::ContextNotFound(_))));
        assert!(matches!(store.evict(&id).await, Err(Error::ContextNotFound(_))));
    }

    #[tokio::test]
    async fn sweep_removes_idle_contexts() {
        let store = ContextStore::default();
        let id = store.create("ollama", serde_json::Value::Null).await;

        assert_eq!(store.sweep(Utc::now()).await, 0);
        assert_eq!(store.sweep(Utc::now() + chrono::Duration::hours(25)).await, 1);
        assert!(store.get(&id).await.is_err());

        // Sweeping again over nothing is silent.
        assert_eq!(store.sweep(Utc::now() + chrono::Duration::hours(50)).await, 0);
    }

    #[tokio::test]
    async fn sweep_removes_oversized_contexts() {
        let store = ContextStore::new(ContextLimits {
            max_age: Duration::from_secs(3600),
            max_entries: 2,
        });
        let big = store.create("ollama", serde_json::Value::Null).await;
        let small = store.create("ollama", serde_json::Value::Null).await;
        for _ in 0..3 {
            store.append(&big, HistoryEntry::request(json!({}))).await.unwrap();
        }
        store.append(&small, HistoryEntry::request(json!({}))).await.unwrap();

        assert_eq!(store.sweep(Utc::now()).await, 1);
        assert!(store.get(&big).await.is_err());
        assert!(store.get(&small).await.is_ok());
    }

    #[tokio::test]
    async fn sweep_after_direct_evict_does_not_raise() {
        let store = ContextStore::default();
        let id = store.create("ollama", serde_json::Value::Null).await;
        store.evict(&id).await.unwrap();
        assert_eq!(store.sweep(Utc::now() + chrono::Duration::hours(48)).await, 0);
    }

    #[tokio::test]
    async fn context_evicted_between_selection_and_removal_is_skipped() {
        let store = ContextStore::default();
        let first = store.create("ollama", serde_json::Value::Null).await;
        let second = store.create("ollama", serde_json::Value::Null).await;
        let later = Utc::now() + chrono::Duration::hours(48);

        let stale = store.stale_ids(later).await;
        assert_eq!(stale.len(), 2);

        store.evict(&first).await.unwrap();
        assert_eq!(store.remove_stale(&stale).await, 1);
        assert!(store.get(&second).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_runs_on_interval() {
        let store = ContextStore::new(ContextLimits {
            max_age: Duration::from_secs(3600),
            max_entries: 0,
        });
        let id = store.create("ollama", serde_json::Value::Null).await;
        store.append(&id, HistoryEntry::request(json!({}))).await.unwrap();

        let handle = store.spawn_sweeper(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert!(store.is_empty().await);
        handle.abort();
    }
}
