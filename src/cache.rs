//! Local keyed cache of last-known server state.
//!
//! The sync layer only ever talks to [`QueryCache`]; [`MemoryCache`] is the
//! in-process implementation, which also publishes a change feed so a fetch
//! layer can refetch keys as soon as they go stale.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::trace;

/// Cache keys written by the sync layer.
pub mod keys {
    pub const QUEUE: &str = "queue";
    pub const SETTINGS: &str = "settings";
    pub const CHANNELS: &str = "channels";
    pub const FAVORITE_CHANNELS: &str = "favorite-channels";
    pub const VIDEOS: &str = "videos";
    pub const FAVORITE_VIDEOS: &str = "favorite-videos";
    pub const IMPORT: &str = "import";
}

/// Cache collaborator consumed by the sync handlers. All operations are
/// synchronous from the caller's point of view.
pub trait QueryCache: Send + Sync {
    /// Replaces the value for `key` wholesale and clears its stale mark.
    fn set_value(&self, key: &str, value: Value);

    /// Marks `key` stale so the next read goes back to the server.
    fn mark_stale(&self, key: &str);

    fn get_value(&self, key: &str) -> Option<Value>;
}

/// Notification collaborator used for toast dismissal.
pub trait Notifier: Send + Sync {
    fn remove_by_id(&self, id: &str);
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheEntry {
    pub value: Option<Value>,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheUpdate {
    Replaced(String),
    Stale(String),
}

impl CacheUpdate {
    pub fn key(&self) -> &str {
        match self {
            CacheUpdate::Replaced(key) | CacheUpdate::Stale(key) => key,
        }
    }
}

pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    update_sender: broadcast::Sender<CacheUpdate>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(64);
        Self {
            entries: RwLock::new(HashMap::new()),
            update_sender: update_tx,
        }
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn is_stale(&self, key: &str) -> bool {
        self.entry(key).is_some_and(|e| e.stale)
    }

    /// Keys currently marked stale, sorted.
    pub fn stale_keys(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut stale: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.stale)
            .map(|(k, _)| k.clone())
            .collect();
        stale.sort();
        stale
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheUpdate> {
        self.update_sender.subscribe()
    }
}

impl QueryCache for MemoryCache {
    fn set_value(&self, key: &str, value: Value) {
        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            entries.insert(
                key.to_string(),
                CacheEntry {
                    value: Some(value),
                    stale: false,
                },
            );
        }
        trace!(key, "Cache value replaced");
        let _ = self.update_sender.send(CacheUpdate::Replaced(key.to_string()));
    }

    fn mark_stale(&self, key: &str) {
        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            entries.entry(key.to_string()).or_default().stale = true;
        }
        trace!(key, "Cache key marked stale");
        let _ = self.update_sender.send(CacheUpdate::Stale(key.to_string()));
    }

    fn get_value(&self, key: &str) -> Option<Value> {
        self.entry(key).and_then(|e| e.value)
    }
}
