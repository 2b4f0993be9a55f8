//! Per-account session state, notices and the outbound stubs.
//!
//! The connection lifecycle (resume, login, post-connect, sync, logout) lives
//! in `bootstrap`.

use std::sync::{Arc, Weak};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use shared::domain::{ConversationId, GroupDescriptor, LocalUserId, Profile, RemoteUserId, RoomId};
use storage::AccountRecord;
use tokio::{
    sync::{watch, Mutex},
    task::AbortHandle,
};
use tracing::{debug, warn};

use crate::{
    backoff::BackoffStep,
    bootstrap::BridgeContext,
    client::{RemoteClient, TokenStore},
    collaborators::{BridgeStateEvent, NoticeKind, StateUpdate},
    entity_cache::EntityCache,
    error::SessionError,
    metrics::AccountMetrics,
    router::ConversationResolver,
    supervisor::{Supervisor, SupervisorHooks},
};

/// Own display name, per login epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameState {
    Pending,
    Resolved(Option<String>),
    LoggedOut,
}

pub(crate) struct SessionState {
    pub(crate) remote_id: Option<RemoteUserId>,
    pub(crate) credential: Option<String>,
    pub(crate) notice_room: Option<RoomId>,
    pub(crate) client: Option<Arc<dyn RemoteClient>>,
    pub(crate) supervisor: Option<Arc<Supervisor>>,
    /// Dropping this ends the event pump of the current epoch.
    pub(crate) pump_guard: Option<watch::Sender<()>>,
    pub(crate) connected: bool,
    pub(crate) name: Option<String>,
    pub(crate) name_tx: watch::Sender<NameState>,
    /// Bumped by `stop` and `login_complete`; post-connect work started under
    /// an older value must not write anything.
    pub(crate) epoch: u64,
    pub(crate) post_connect: Option<AbortHandle>,
}

impl SessionState {
    pub(crate) fn resolve_name(&mut self, name: Option<String>) {
        self.name = name.clone();
        self.name_tx.send_replace(NameState::Resolved(name));
    }

    /// Ends the current epoch and returns the post-connect task to cancel.
    pub(crate) fn end_epoch(&mut self) -> Option<AbortHandle> {
        self.epoch += 1;
        self.post_connect.take()
    }

    pub(crate) fn record(&self, local_user_id: &LocalUserId) -> AccountRecord {
        AccountRecord {
            local_user_id: local_user_id.clone(),
            remote_id: self.remote_id.clone(),
            credential: self.credential.clone(),
            notice_room: self.notice_room.clone(),
        }
    }
}

pub struct Session {
    pub(crate) local_user_id: LocalUserId,
    pub(crate) ctx: Arc<BridgeContext>,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) cache: EntityCache,
    pub(crate) metrics: AccountMetrics,
    notice_room_lock: Mutex<()>,
}

impl Session {
    pub(crate) fn new(ctx: Arc<BridgeContext>, record: AccountRecord) -> Arc<Self> {
        let (name_tx, _) = watch::channel(NameState::Pending);
        let metrics = ctx.metrics.account();
        Arc::new(Self {
            local_user_id: record.local_user_id,
            ctx,
            state: Mutex::new(SessionState {
                remote_id: record.remote_id,
                credential: record.credential,
                notice_room: record.notice_room,
                client: None,
                supervisor: None,
                pump_guard: None,
                connected: false,
                name: None,
                name_tx,
                epoch: 0,
                post_connect: None,
            }),
            cache: EntityCache::new(),
            metrics,
            notice_room_lock: Mutex::new(()),
        })
    }

    pub fn local_user_id(&self) -> &LocalUserId {
        &self.local_user_id
    }

    pub async fn remote_id(&self) -> Option<RemoteUserId> {
        self.state.lock().await.remote_id.clone()
    }

    pub async fn credential(&self) -> Option<String> {
        self.state.lock().await.credential.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    pub async fn is_logged_in(&self) -> bool {
        let state = self.state.lock().await;
        state.client.is_some() && state.connected
    }

    pub async fn client(&self) -> Result<Arc<dyn RemoteClient>, SessionError> {
        self.state
            .lock()
            .await
            .client
            .clone()
            .ok_or_else(|| SessionError::NotLoggedIn(self.local_user_id.clone()))
    }

    pub async fn supervisor(&self) -> Option<Arc<Supervisor>> {
        self.state.lock().await.supervisor.clone()
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// Waits until the own name of the current login is known.
    ///
    /// Fails with `LoggedOut` when the session logs out first.
    pub async fn wait_own_name(&self) -> Result<Option<String>, SessionError> {
        let mut name = self.state.lock().await.name_tx.subscribe();
        let settled = name
            .wait_for(|state| *state != NameState::Pending)
            .await
            .map_err(|_| SessionError::LoggedOut)?
            .clone();
        match settled {
            NameState::Resolved(name) => Ok(name),
            _ => Err(SessionError::LoggedOut),
        }
    }

    /// Returns the notice room, creating it on first use.
    pub async fn get_notice_room(&self) -> Result<RoomId> {
        if let Some(room) = self.state.lock().await.notice_room.clone() {
            return Ok(room);
        }

        let _creating = self.notice_room_lock.lock().await;
        // someone else may have created it while we waited
        if let Some(room) = self.state.lock().await.notice_room.clone() {
            return Ok(room);
        }

        let room = self
            .ctx
            .local_chat
            .create_notice_room(&self.local_user_id)
            .await
            .context("failed to create notice room")?;
        self.state.lock().await.notice_room = Some(room.clone());
        self.ctx
            .store
            .set_notice_room(&self.local_user_id, &room)
            .await?;
        Ok(room)
    }

    pub async fn send_bridge_notice(
        &self,
        text: &str,
        important: bool,
        state_event: Option<BridgeStateEvent>,
    ) {
        if let Some(state_event) = state_event {
            self.push_bridge_state(StateUpdate::new(state_event).with_message(text))
                .await;
        }

        let settings = &self.ctx.settings;
        if settings.disable_bridge_notices || (!important && !settings.unimportant_bridge_notices) {
            return;
        }

        let kind = if important {
            NoticeKind::Text
        } else {
            NoticeKind::Notice
        };
        let sent = async {
            let room = self.get_notice_room().await?;
            self.ctx.local_chat.send_notice(&room, text, kind).await
        };
        if let Err(err) = sent.await {
            warn!(
                account = %self.local_user_id,
                notice = text,
                error = %format!("{err:#}"),
                "failed to send bridge notice"
            );
        }
    }

    pub async fn push_bridge_state(&self, mut update: StateUpdate) {
        {
            let state = self.state.lock().await;
            update.remote_id = update.remote_id.or_else(|| state.remote_id.clone());
            update.remote_name = update.remote_name.or_else(|| state.name.clone());
        }
        self.ctx
            .status
            .push_state(&self.local_user_id, &update)
            .await;
    }

    pub async fn set_typing(&self, conversation_id: &ConversationId, typing: bool) -> Result<()> {
        debug!(account = %self.local_user_id, conversation_id = %conversation_id, typing, "set_typing");
        Ok(())
    }

    pub async fn mark_read(&self, conversation_id: &ConversationId, timestamp: i64) -> Result<()> {
        debug!(account = %self.local_user_id, conversation_id = %conversation_id, timestamp, "mark_read");
        Ok(())
    }

    pub(crate) fn token_store(self: &Arc<Self>) -> Arc<dyn TokenStore> {
        Arc::new(SessionTokenStore {
            session: Arc::downgrade(self),
        })
    }
}

/// Reads the session's credential and persists rotated ones right away.
struct SessionTokenStore {
    session: Weak<Session>,
}

#[async_trait]
impl TokenStore for SessionTokenStore {
    async fn get(&self) -> Option<String> {
        let session = self.session.upgrade()?;
        session.credential().await
    }

    async fn set(&self, token: &str) -> Result<()> {
        let session = self
            .session
            .upgrade()
            .ok_or_else(|| anyhow!("session is gone"))?;
        session.state.lock().await.credential = Some(token.to_string());
        session
            .ctx
            .store
            .set_credential(&session.local_user_id, Some(token))
            .await
    }
}

#[async_trait]
impl ConversationResolver for Session {
    fn account(&self) -> &LocalUserId {
        &self.local_user_id
    }

    async fn receiver(&self) -> Result<RemoteUserId, SessionError> {
        self.remote_id()
            .await
            .ok_or_else(|| SessionError::UnknownRemoteId(self.local_user_id.clone()))
    }

    async fn resolve_group(&self, id: &ConversationId) -> Result<GroupDescriptor, SessionError> {
        let client = self.client().await?;
        Ok(self.cache.resolve_group(client.as_ref(), id).await?)
    }

    async fn resolve_user(&self, id: &RemoteUserId) -> Result<Profile, SessionError> {
        let client = self.client().await?;
        self.cache
            .resolve_users(client.as_ref(), std::slice::from_ref(id))
            .await?
            .remove(id)
            .ok_or_else(|| SessionError::MissingProfile(id.clone()))
    }
}

#[async_trait]
impl SupervisorHooks for Session {
    async fn connection_lost(&self, message: &str, step: &BackoffStep) {
        self.state.lock().await.connected = false;
        self.metrics.set_connected(false);
        self.send_bridge_notice(
            message,
            step.severity.is_important(),
            Some(step.severity.state_event()),
        )
        .await;
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
