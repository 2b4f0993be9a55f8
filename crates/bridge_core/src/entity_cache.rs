//! Memoized lookups of remote users and groups.
//!
//! Entries are never invalidated while a session is alive; only ids that are
//! not cached yet cause a remote call. Each category has a single fetch lock,
//! so at most one fetch per category is in flight and concurrent callers
//! asking for overlapping ids never fetch the same id twice.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    hash::Hash,
    sync::atomic::{AtomicU64, Ordering},
};

use shared::{
    domain::{ConversationId, GroupDescriptor, Profile, RemoteUserId},
    error::RemoteError,
};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::client::{self, RemoteClient};

pub struct LazyCache<K, V> {
    entries: RwLock<HashMap<K, V>>,
    fetch_lock: Mutex<()>,
    // bumped by `clear` so a fetch that straddles a clear does not repopulate
    generation: AtomicU64,
}

impl<K, V> Default for LazyCache<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            fetch_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }
}

impl<K, V> LazyCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.clear();
    }

    /// Returns the cached values for `keys`, fetching the missing ones first.
    ///
    /// `fetch` receives the deduplicated missing keys and is called at most
    /// once. Keys the fetch does not return are left out of the result and
    /// stay uncached.
    pub async fn get_or_fetch<F, Fut, E>(&self, keys: &[K], fetch: F) -> Result<HashMap<K, V>, E>
    where
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = Result<Vec<(K, V)>, E>>,
    {
        if let Some(hit) = self.lookup_all(keys).await {
            return Ok(hit);
        }

        let _fetch_guard = self.fetch_lock.lock().await;

        // another caller may have fetched these while we waited for the lock
        let missing = {
            let entries = self.entries.read().await;
            let mut seen = HashSet::new();
            keys.iter()
                .filter(|key| !entries.contains_key(*key) && seen.insert((*key).clone()))
                .cloned()
                .collect::<Vec<_>>()
        };

        if !missing.is_empty() {
            let generation = self.generation.load(Ordering::SeqCst);
            let fetched = fetch(missing).await?;
            let mut entries = self.entries.write().await;
            if self.generation.load(Ordering::SeqCst) == generation {
                entries.extend(fetched);
            }
        }

        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| entries.get(key).map(|value| (key.clone(), value.clone())))
            .collect())
    }

    async fn lookup_all(&self, keys: &[K]) -> Option<HashMap<K, V>> {
        let entries = self.entries.read().await;
        keys.iter()
            .map(|key| entries.get(key).map(|value| (key.clone(), value.clone())))
            .collect()
    }
}

/// Per-session cache of remote users and groups.
#[derive(Default)]
pub struct EntityCache {
    users: LazyCache<RemoteUserId, Profile>,
    groups: LazyCache<ConversationId, GroupDescriptor>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resolve_users(
        &self,
        client: &dyn RemoteClient,
        ids: &[RemoteUserId],
    ) -> Result<HashMap<RemoteUserId, Profile>, RemoteError> {
        self.users
            .get_or_fetch(ids, |missing| async move {
                debug!(user_ids = ?missing, "fetching info of users");
                let members = client::get_members(client, missing).await?;
                Ok::<_, RemoteError>(
                    members
                        .into_iter()
                        .map(|profile| (profile.user_id.clone(), profile))
                        .collect(),
                )
            })
            .await
    }

    pub async fn resolve_group(
        &self,
        client: &dyn RemoteClient,
        conversation_id: &ConversationId,
    ) -> Result<GroupDescriptor, RemoteError> {
        let keys = [conversation_id.clone()];
        let mut resolved = self
            .groups
            .get_or_fetch(&keys, |_| async move {
                debug!(conversation_id = %conversation_id, "fetching info of chat");
                let group = client::get_group(client, conversation_id).await?;
                Ok::<_, RemoteError>(vec![(conversation_id.clone(), group)])
            })
            .await?;
        resolved
            .remove(conversation_id)
            .ok_or(RemoteError::UnexpectedResponse {
                request: "get_group",
                actual: "empty",
            })
    }

    pub async fn cached_user(&self, id: &RemoteUserId) -> Option<Profile> {
        self.users.get(id).await
    }

    pub async fn cached_group(&self, id: &ConversationId) -> Option<GroupDescriptor> {
        self.groups.get(id).await
    }

    pub async fn clear(&self) {
        self.users.clear().await;
        self.groups.clear().await;
    }
}

#[cfg(test)]
#[path = "tests/entity_cache_tests.rs"]
mod tests;
