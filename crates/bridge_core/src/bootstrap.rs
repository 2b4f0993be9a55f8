//! Resuming sessions, completing logins, and the post-connect sequence.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use futures::StreamExt;
use shared::domain::{LocalUserId, RemoteUserId, WorldItem};
use storage::AccountRecord;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, error, info, warn};

use crate::{
    background::BackgroundTasks,
    client::{self, ClientEvent, ClientFactory, RemoteClient},
    collaborators::{BridgeStateEvent, LocalChat, PortalDirectory, StateUpdate, StatusReporter},
    config::BridgeSettings,
    error::SessionError,
    metrics::BridgeMetrics,
    registry::SessionRegistry,
    router::{ConversationResolver, EventRouter},
    session::{NameState, Session},
    store::AccountStore,
    supervisor::{Supervisor, SupervisorConfig, SupervisorHooks},
};

/// External collaborators the bridge is wired to.
pub struct Collaborators {
    pub store: Arc<dyn AccountStore>,
    pub clients: Arc<dyn ClientFactory>,
    pub local_chat: Arc<dyn LocalChat>,
    pub portals: Arc<dyn PortalDirectory>,
    pub status: Arc<dyn StatusReporter>,
}

/// Everything sessions share.
pub struct BridgeContext {
    pub settings: BridgeSettings,
    pub store: Arc<dyn AccountStore>,
    pub clients: Arc<dyn ClientFactory>,
    pub local_chat: Arc<dyn LocalChat>,
    pub portals: Arc<dyn PortalDirectory>,
    pub status: Arc<dyn StatusReporter>,
    pub registry: SessionRegistry,
    pub tasks: BackgroundTasks,
    pub metrics: BridgeMetrics,
}

/// Outcome counts of one initial synchronization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum SyncOutcome {
    Created,
    Updated,
    Skipped,
}

pub struct Bridge {
    ctx: Arc<BridgeContext>,
}

impl Bridge {
    pub fn new(settings: BridgeSettings, collaborators: Collaborators) -> Self {
        let Collaborators {
            store,
            clients,
            local_chat,
            portals,
            status,
        } = collaborators;
        Self {
            ctx: Arc::new(BridgeContext {
                settings,
                store,
                clients,
                local_chat,
                portals,
                status,
                registry: SessionRegistry::new(),
                tasks: BackgroundTasks::new(),
                metrics: BridgeMetrics::new(),
            }),
        }
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    pub fn metrics(&self) -> &BridgeMetrics {
        &self.ctx.metrics
    }

    /// Resumes every account that has a stored credential. Returns how many
    /// sessions came back.
    pub async fn start(&self) -> Result<usize> {
        let records = self
            .ctx
            .store
            .all_logged_in()
            .await
            .context("failed to list logged in accounts")?;
        info!(count = records.len(), "resuming stored sessions");

        let mut resumed = 0;
        for record in records {
            let session = self.register(record).await;
            match session.try_init().await {
                Ok(()) => resumed += 1,
                Err(err) => warn!(
                    account = %session.local_user_id(),
                    error = %err,
                    "account stays logged out"
                ),
            }
        }
        Ok(resumed)
    }

    pub async fn get_session(
        &self,
        local: &LocalUserId,
        create: bool,
    ) -> Result<Option<Arc<Session>>> {
        if let Some(session) = self.ctx.registry.get(local).await {
            return Ok(Some(session));
        }

        let record = match self.ctx.store.load_account(local).await? {
            Some(record) => record,
            None if create => {
                let record = AccountRecord::new(local.clone());
                self.ctx.store.save_account(&record).await?;
                record
            }
            None => return Ok(None),
        };
        Ok(Some(self.register(record).await))
    }

    pub async fn session_by_remote_id(&self, remote: &RemoteUserId) -> Result<Option<Arc<Session>>> {
        if let Some(session) = self.ctx.registry.get_by_remote(remote).await {
            return Ok(Some(session));
        }
        match self.ctx.store.load_account_by_remote_id(remote).await? {
            Some(record) => self.get_session(&record.local_user_id, false).await,
            None => Ok(None),
        }
    }

    /// Stores `credential` for `local` and connects with it.
    ///
    /// A credential the remote side rejects is not kept.
    pub async fn login(&self, local: &LocalUserId, credential: &str) -> Result<Arc<Session>, SessionError> {
        let session = self
            .get_session(local, true)
            .await?
            .ok_or_else(|| SessionError::NotLoggedIn(local.clone()))?;
        if session.state.lock().await.client.is_some() {
            session.logout().await?;
        }

        session.state.lock().await.credential = Some(credential.to_string());
        self.ctx
            .store
            .set_credential(local, Some(credential))
            .await?;

        match self.ctx.clients.resume(session.token_store()).await {
            Ok(client) => {
                session.login_complete(client).await;
                Ok(session)
            }
            Err(err) => {
                session.state.lock().await.credential = None;
                self.ctx.store.set_credential(local, None).await?;
                Err(err.into())
            }
        }
    }

    /// Stops every session and waits up to `grace` for background work.
    pub async fn shutdown(&self, grace: Duration) {
        for session in self.ctx.registry.sessions().await {
            session.stop().await;
        }
        self.ctx.tasks.shutdown(grace).await;
        self.ctx.registry.clear().await;
    }

    async fn register(&self, record: AccountRecord) -> Arc<Session> {
        let local = record.local_user_id.clone();
        let remote_id = record.remote_id.clone();
        let session = self
            .ctx
            .registry
            .insert(local, Session::new(self.ctx.clone(), record))
            .await;
        if let Some(remote_id) = remote_id {
            self.ctx.registry.bind_remote(remote_id, session.clone()).await;
        }
        session
    }
}

impl Session {
    /// Resumes from the stored credential. Failure leaves the account logged
    /// out and is reported, never retried.
    pub async fn try_init(self: &Arc<Self>) -> Result<(), SessionError> {
        match self.ctx.clients.resume(self.token_store()).await {
            Ok(client) => {
                self.login_complete(client).await;
                Ok(())
            }
            Err(err) => {
                error!(account = %self.local_user_id, error = %err, "failed to resume session");
                let (text, state) = if err.is_credential_error() {
                    (
                        format!("Failed to resume session with stored refresh token: {err}"),
                        BridgeStateEvent::BadCredentials,
                    )
                } else {
                    (
                        format!("Failed to resume session: {err}"),
                        BridgeStateEvent::UnknownError,
                    )
                };
                self.send_bridge_notice(&text, true, Some(state)).await;
                Err(err.into())
            }
        }
    }

    /// Wires a freshly built client to this session and starts supervising it.
    pub async fn login_complete(self: &Arc<Self>, client: Arc<dyn RemoteClient>) {
        let supervisor = Arc::new(Supervisor::new(
            client.clone(),
            SupervisorConfig {
                policy: self.ctx.settings.backoff.policy(),
                network_name: self.ctx.settings.remote_network_name.clone(),
            },
        ));
        // subscribe before connecting so the first Connected is not missed
        let events = client.subscribe_events();
        let (pump_guard, pump_closed) = watch::channel(());

        let (previous, stale_post_connect) = {
            let mut state = self.state.lock().await;
            let stale_post_connect = state.end_epoch();
            state.client = Some(client);
            state.pump_guard = Some(pump_guard);
            (state.supervisor.replace(supervisor.clone()), stale_post_connect)
        };
        if let Some(task) = stale_post_connect {
            task.abort();
        }
        if let Some(previous) = previous {
            previous.stop().await;
        }

        let session = self.clone();
        self.ctx
            .tasks
            .spawn(async move { session.pump_events(events, pump_closed).await });

        let hooks: Arc<dyn SupervisorHooks> = self.clone();
        self.ctx
            .tasks
            .spawn(async move { supervisor.start(hooks).await });
    }

    async fn pump_events(
        self: Arc<Self>,
        events: broadcast::Receiver<ClientEvent>,
        mut closed: watch::Receiver<()>,
    ) {
        let resolver: Arc<dyn ConversationResolver> = self.clone();
        let router = EventRouter::new(resolver, self.ctx.portals.clone(), self.ctx.tasks.clone());
        let mut events = BroadcastStream::new(events);

        loop {
            tokio::select! {
                next = events.next() => match next {
                    Some(Ok(ClientEvent::Connected)) => self.on_connect().await,
                    Some(Ok(ClientEvent::Reconnected)) => self.on_reconnect().await,
                    Some(Ok(ClientEvent::Disconnected)) => self.on_disconnect().await,
                    Some(Ok(ClientEvent::Stream(event))) => router.handle(event),
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => warn!(
                        account = %self.local_user_id,
                        skipped,
                        "event stream lagged; events were dropped"
                    ),
                    None => break,
                },
                _ = closed.changed() => break,
            }
        }
        debug!(account = %self.local_user_id, "event pump finished");
    }

    pub async fn on_connect(self: &Arc<Self>) {
        self.mark_connected(true).await;
        {
            let mut state = self.state.lock().await;
            let epoch = state.epoch;
            let session = self.clone();
            let task = self
                .ctx
                .tasks
                .spawn(async move { session.post_connect(epoch).await });
            if let Some(previous) = state.post_connect.replace(task) {
                previous.abort();
            }
        }
        let text = format!("Connected to {}", self.ctx.settings.remote_network_name);
        self.send_bridge_notice(&text, false, None).await;
    }

    pub async fn on_reconnect(&self) {
        self.mark_connected(true).await;
        self.metrics.set_connected(true);
        let text = format!("Reconnected to {}", self.ctx.settings.remote_network_name);
        self.send_bridge_notice(&text, false, None).await;
        self.push_bridge_state(StateUpdate::new(BridgeStateEvent::Connected))
            .await;
    }

    pub async fn on_disconnect(&self) {
        self.mark_connected(false).await;
        self.metrics.set_connected(false);
        let text = format!("Disconnected from {}", self.ctx.settings.remote_network_name);
        self.send_bridge_notice(&text, false, None).await;
        self.push_bridge_state(
            StateUpdate::new(BridgeStateEvent::TransientDisconnect).with_error("remote-disconnected"),
        )
        .await;
    }

    async fn mark_connected(&self, connected: bool) {
        let supervisor = {
            let mut state = self.state.lock().await;
            state.connected = connected;
            state.supervisor.clone()
        };
        if let Some(supervisor) = supervisor {
            supervisor.mark_connected(connected);
        }
    }

    /// Runs once per connect within login epoch `epoch`. Every step is best
    /// effort and the sequence ends by reporting `Connected`. Once the epoch
    /// has ended it stops without writing anything.
    pub(crate) async fn post_connect(&self, epoch: u64) {
        match self.resolve_own_identity(epoch).await {
            Ok(()) => {}
            Err(SessionError::Superseded(_)) => return self.abandon_post_connect(),
            Err(err) => error!(account = %self.local_user_id, error = %err, "failed to get own info"),
        }
        if !self.in_epoch(epoch).await {
            return self.abandon_post_connect();
        }
        self.push_bridge_state(StateUpdate::new(BridgeStateEvent::Backfilling))
            .await;

        match self.mark_logged_in(epoch).await {
            Ok(()) => {}
            Err(SessionError::Superseded(_)) => return self.abandon_post_connect(),
            Err(err) => error!(
                account = %self.local_user_id,
                error = %format!("{err:#}"),
                "failed to save account"
            ),
        }

        if !self.in_epoch(epoch).await {
            return self.abandon_post_connect();
        }
        if let Some(remote_id) = self.remote_id().await {
            match self
                .ctx
                .local_chat
                .enable_custom_puppet(&self.local_user_id, &remote_id)
                .await
            {
                Ok(true) => info!(account = %self.local_user_id, "enabled custom puppet"),
                Ok(false) => {}
                Err(err) => error!(
                    account = %self.local_user_id,
                    error = %format!("{err:#}"),
                    "failed to automatically enable custom puppet"
                ),
            }
        }

        if !self.in_epoch(epoch).await {
            return self.abandon_post_connect();
        }
        match self.sync().await {
            Ok(report) => info!(account = %self.local_user_id, ?report, "initial sync finished"),
            Err(err) => error!(
                account = %self.local_user_id,
                error = %err,
                "failed to sync conversations and users"
            ),
        }

        if !self.in_epoch(epoch).await {
            return self.abandon_post_connect();
        }
        self.push_bridge_state(StateUpdate::new(BridgeStateEvent::Connected))
            .await;
    }

    pub(crate) async fn current_epoch(&self) -> u64 {
        self.state.lock().await.epoch
    }

    async fn in_epoch(&self, epoch: u64) -> bool {
        self.current_epoch().await == epoch
    }

    fn abandon_post_connect(&self) {
        debug!(account = %self.local_user_id, "session stopped; abandoning post-connect");
    }

    fn superseded(&self) -> SessionError {
        SessionError::Superseded(self.local_user_id.clone())
    }

    /// Raises the gauges and persists the account, unless `epoch` has ended.
    async fn mark_logged_in(&self, epoch: u64) -> Result<(), SessionError> {
        let state = self.state.lock().await;
        if state.epoch != epoch {
            return Err(self.superseded());
        }
        self.metrics.set_connected(true);
        self.metrics.set_logged_in(true);
        self.ctx
            .store
            .save_account(&state.record(&self.local_user_id))
            .await
            .with_context(|| format!("failed to save account {}", self.local_user_id))?;
        Ok(())
    }

    /// Learns the remote id on the first connect of a login and refreshes the
    /// own display name.
    pub(crate) async fn resolve_own_identity(&self, epoch: u64) -> Result<(), SessionError> {
        let client = self.client().await?;
        let remote_id = match self.remote_id().await {
            Some(remote_id) => remote_id,
            None => {
                let remote_id = client::get_self_user_id(client.as_ref()).await?;
                self.assign_remote_id(epoch, &remote_id).await?;
                info!(account = %self.local_user_id, remote_id = %remote_id, "resolved own remote id");
                remote_id
            }
        };

        let profile = self
            .cache
            .resolve_users(client.as_ref(), std::slice::from_ref(&remote_id))
            .await?
            .remove(&remote_id)
            .ok_or_else(|| SessionError::MissingProfile(remote_id.clone()))?;
        let name = profile.display_name().map(str::to_string);

        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            return Err(self.superseded());
        }
        debug!(account = %self.local_user_id, name = ?name, "found own name");
        state.resolve_name(name);
        Ok(())
    }

    /// Stores, indexes and persists the own remote id while `epoch` is current.
    async fn assign_remote_id(&self, epoch: u64, remote_id: &RemoteUserId) -> Result<(), SessionError> {
        // held until persisted so a concurrent logout clears it afterwards
        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            return Err(self.superseded());
        }
        state.remote_id = Some(remote_id.clone());
        if let Some(me) = self.ctx.registry.get(&self.local_user_id).await {
            self.ctx.registry.bind_remote(remote_id.clone(), me).await;
        }
        self.ctx
            .store
            .set_remote_id(&self.local_user_id, Some(remote_id))
            .await?;
        Ok(())
    }

    /// Mirrors recent conversations: existing mirrors are updated, and only
    /// the `initial_chat_sync` most recent conversations get a new one.
    pub async fn sync(&self) -> Result<SyncReport, SessionError> {
        let client = self.client().await?;
        let receiver = self.receiver().await?;

        debug!(account = %self.local_user_id, "fetching first page of the world");
        let mut items = client::paginated_world(client.as_ref()).await?;
        items.sort_by(|a, b| b.sort_timestamp.cmp(&a.sort_timestamp));

        let max_sync = self.ctx.settings.initial_chat_sync;
        let mut report = SyncReport::default();
        for (index, item) in items.iter().enumerate() {
            match self
                .sync_item(client.as_ref(), &receiver, item, index < max_sync)
                .await
            {
                Ok(SyncOutcome::Created) => report.created += 1,
                Ok(SyncOutcome::Updated) => report.updated += 1,
                Ok(SyncOutcome::Skipped) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        account = %self.local_user_id,
                        conversation_id = %item.conversation_id,
                        error = %format!("{err:#}"),
                        "failed to sync conversation"
                    );
                }
            }
        }

        if let Err(err) = self
            .ctx
            .local_chat
            .update_direct_chats(&self.local_user_id, &receiver)
            .await
        {
            warn!(account = %self.local_user_id, error = %format!("{err:#}"), "failed to update direct chats");
        }
        Ok(report)
    }

    async fn sync_item(
        &self,
        client: &dyn RemoteClient,
        receiver: &RemoteUserId,
        item: &WorldItem,
        may_create: bool,
    ) -> Result<SyncOutcome> {
        let portal = self
            .ctx
            .portals
            .portal(&item.conversation_id, receiver)
            .await?;
        debug!(account = %self.local_user_id, conversation_id = %item.conversation_id, "syncing");

        if portal.has_mirror().await {
            let group = self.cache.resolve_group(client, &item.conversation_id).await?;
            portal.update_mirror(&self.local_user_id, &group, item).await?;
            Ok(SyncOutcome::Updated)
        } else if may_create {
            let group = self.cache.resolve_group(client, &item.conversation_id).await?;
            portal.create_mirror(&self.local_user_id, &group, item).await?;
            Ok(SyncOutcome::Created)
        } else {
            Ok(SyncOutcome::Skipped)
        }
    }

    /// Requests an intentional disconnect and waits for the supervisor loop
    /// to wind down.
    pub async fn stop(&self) {
        let (supervisor, post_connect) = {
            let mut state = self.state.lock().await;
            state.pump_guard = None;
            (state.supervisor.clone(), state.end_epoch())
        };
        if let Some(task) = post_connect {
            task.abort();
        }
        if let Some(supervisor) = supervisor {
            supervisor.stop().await;
        }
        self.metrics.set_connected(false);
    }

    /// Forgets the remote identity and credential of this account.
    pub async fn logout(self: &Arc<Self>) -> Result<(), SessionError> {
        // ends the epoch first so in-flight post-connect work cannot undo this
        self.stop().await;
        self.metrics.set_logged_in(false);

        let remote_id = {
            let mut state = self.state.lock().await;
            state.client = None;
            state.supervisor = None;
            state.credential = None;
            state.connected = false;
            state.name = None;
            state.name_tx.send_replace(NameState::LoggedOut);
            state.name_tx = watch::channel(NameState::Pending).0;
            state.remote_id.take()
        };
        if let Some(remote_id) = &remote_id {
            self.ctx.registry.unbind_remote(remote_id, self).await;
        }
        self.cache.clear().await;

        self.ctx
            .store
            .clear_session(&self.local_user_id)
            .await
            .with_context(|| format!("failed to clear session of {}", self.local_user_id))?;
        info!(account = %self.local_user_id, "logged out");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/bootstrap_tests.rs"]
mod tests;
