//! Process-wide index of sessions by local account and by remote id.
//!
//! Local entries are inserted when a session is first created and live until
//! the bridge shuts down. Remote entries are bound on first identity
//! resolution and unbound on logout, so readers must tolerate a session that
//! has no remote entry yet.

use std::{collections::HashMap, sync::Arc};

use shared::domain::{LocalUserId, RemoteUserId};
use tokio::sync::RwLock;

use crate::session::Session;

struct Maps<T> {
    by_local: HashMap<LocalUserId, Arc<T>>,
    by_remote: HashMap<RemoteUserId, Arc<T>>,
}

pub struct SessionRegistry<T = Session> {
    maps: RwLock<Maps<T>>,
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self {
            maps: RwLock::new(Maps {
                by_local: HashMap::new(),
                by_remote: HashMap::new(),
            }),
        }
    }
}

impl<T> SessionRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `session` unless one is already registered for `local`;
    /// returns whichever ends up registered.
    pub async fn insert(&self, local: LocalUserId, session: Arc<T>) -> Arc<T> {
        let mut maps = self.maps.write().await;
        maps.by_local.entry(local).or_insert(session).clone()
    }

    pub async fn get(&self, local: &LocalUserId) -> Option<Arc<T>> {
        self.maps.read().await.by_local.get(local).cloned()
    }

    pub async fn get_by_remote(&self, remote: &RemoteUserId) -> Option<Arc<T>> {
        self.maps.read().await.by_remote.get(remote).cloned()
    }

    pub async fn bind_remote(&self, remote: RemoteUserId, session: Arc<T>) {
        self.maps.write().await.by_remote.insert(remote, session);
    }

    /// Removes the remote entry only if it still points at `session`.
    pub async fn unbind_remote(&self, remote: &RemoteUserId, session: &Arc<T>) -> bool {
        let mut maps = self.maps.write().await;
        match maps.by_remote.get(remote) {
            Some(bound) if Arc::ptr_eq(bound, session) => {
                maps.by_remote.remove(remote);
                true
            }
            _ => false,
        }
    }

    pub async fn sessions(&self) -> Vec<Arc<T>> {
        self.maps.read().await.by_local.values().cloned().collect()
    }

    pub async fn clear(&self) {
        let mut maps = self.maps.write().await;
        maps.by_local.clear();
        maps.by_remote.clear();
    }
}
