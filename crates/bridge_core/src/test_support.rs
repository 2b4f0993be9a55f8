//! In-memory fakes of every collaborator, for unit tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{
        ConversationId, GroupDescriptor, GroupKind, LocalUserId, Profile, RemoteUserId, RoomId,
        WorldItem,
    },
    error::{ErrorCode, RemoteError},
    protocol::{
        ClientRequest, MessageDeletedPayload, ReactionPayload, ReadReceiptsPayload, RemoteMessage,
        ServerResponse,
    },
};
use storage::AccountRecord;
use tokio::sync::{broadcast, Notify};

use crate::{
    bootstrap::{Bridge, Collaborators},
    client::{ClientEvent, ClientFactory, RemoteClient, TokenStore},
    collaborators::{
        BridgeStateEvent, LocalChat, MessageContext, NoticeKind, Portal, PortalDirectory,
        StateUpdate, StatusReporter,
    },
    config::BridgeSettings,
    session::Session,
    store::AccountStore,
};

/// Polls `check` until it holds, advancing (possibly paused) time between tries.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {what}");
}

pub fn profile(id: &str, name: &str) -> Profile {
    Profile {
        user_id: RemoteUserId::new(id),
        name: Some(name.to_string()),
        first_name: None,
        avatar_url: None,
        email: None,
    }
}

pub fn group(id: &str) -> GroupDescriptor {
    GroupDescriptor {
        conversation_id: ConversationId::new(id),
        kind: GroupKind::Space,
        name: Some(format!("group {id}")),
        members: Vec::new(),
    }
}

pub fn world_item(id: &str, sort_timestamp: i64) -> WorldItem {
    WorldItem {
        conversation_id: ConversationId::new(id),
        sort_timestamp,
        name: None,
        read_state: None,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().expect("test mutex poisoned")
}

// ---------------------------------------------------------------------------
// remote client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    /// `connect` returns `Ok` right away.
    Return,
    Fail(RemoteError),
    /// `connect` blocks until `disconnect` is called.
    Hold,
}

pub struct FakeClient {
    script: Mutex<VecDeque<ConnectOutcome>>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    release: Notify,
    events: broadcast::Sender<ClientEvent>,
    emit_connected: bool,
    self_id: Option<RemoteUserId>,
    profiles: HashMap<RemoteUserId, Profile>,
    groups: HashMap<ConversationId, GroupDescriptor>,
    world: Vec<WorldItem>,
    request_delay: Duration,
    handshake: Duration,
    drops_early_disconnects: bool,
    failing_member_fetches: AtomicUsize,
    fail_self_status: bool,
    requests: Mutex<Vec<ClientRequest>>,
}

impl Default for FakeClient {
    fn default() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            script: Mutex::new(VecDeque::new()),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            release: Notify::new(),
            events,
            emit_connected: false,
            self_id: None,
            profiles: HashMap::new(),
            groups: HashMap::new(),
            world: Vec::new(),
            request_delay: Duration::ZERO,
            handshake: Duration::ZERO,
            drops_early_disconnects: false,
            failing_member_fetches: AtomicUsize::new(0),
            fail_self_status: false,
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, outcomes: impl IntoIterator<Item = ConnectOutcome>) -> Self {
        lock(&self.script).extend(outcomes);
        self
    }

    /// Every held connection announces itself with `ClientEvent::Connected`.
    pub fn emitting_connected(mut self) -> Self {
        self.emit_connected = true;
        self
    }

    pub fn with_self(mut self, profile: Profile) -> Self {
        self.self_id = Some(profile.user_id.clone());
        self.profiles.insert(profile.user_id.clone(), profile);
        self
    }

    pub fn with_profiles(mut self, profiles: impl IntoIterator<Item = Profile>) -> Self {
        for profile in profiles {
            self.profiles.insert(profile.user_id.clone(), profile);
        }
        self
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = GroupDescriptor>) -> Self {
        for group in groups {
            self.groups.insert(group.conversation_id.clone(), group);
        }
        self
    }

    pub fn with_world(mut self, items: Vec<WorldItem>) -> Self {
        self.world = items;
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// Held connections take `handshake` to set up; with
    /// `dropping_early_disconnects` a disconnect during that window is lost.
    pub fn with_handshake(mut self, handshake: Duration) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn dropping_early_disconnects(mut self) -> Self {
        self.drops_early_disconnects = true;
        self
    }

    pub fn failing_self_status(mut self) -> Self {
        self.fail_self_status = true;
        self
    }

    pub fn fail_next_member_fetches(&self, count: usize) {
        self.failing_member_fetches.store(count, Ordering::SeqCst);
    }

    pub fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ClientRequest> {
        lock(&self.requests).clone()
    }

    pub fn requests_named(&self, name: &str) -> Vec<ClientRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.name() == name)
            .collect()
    }

    /// Every member id requested so far, in request order.
    pub fn fetched_member_ids(&self) -> Vec<RemoteUserId> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                ClientRequest::GetMembers { member_ids } => Some(member_ids),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

#[async_trait]
impl RemoteClient for FakeClient {
    async fn connect(&self) -> Result<(), RemoteError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = lock(&self.script)
            .pop_front()
            .unwrap_or(ConnectOutcome::Hold);
        match outcome {
            ConnectOutcome::Return => Ok(()),
            ConnectOutcome::Fail(err) => Err(err),
            ConnectOutcome::Hold => {
                if !self.handshake.is_zero() {
                    tokio::time::sleep(self.handshake).await;
                }
                if self.emit_connected {
                    self.emit(ClientEvent::Connected);
                }
                self.release.notified().await;
                Ok(())
            }
        }
    }

    async fn disconnect(&self) -> Result<(), RemoteError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.drops_early_disconnects {
            // only a connection already waiting for release sees this
            self.release.notify_waiters();
        } else {
            self.release.notify_one();
        }
        Ok(())
    }

    async fn send_request(&self, request: ClientRequest) -> Result<ServerResponse, RemoteError> {
        lock(&self.requests).push(request.clone());
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        match request {
            ClientRequest::GetSelfUserStatus => match (&self.self_id, self.fail_self_status) {
                (Some(user_id), false) => Ok(ServerResponse::SelfUserStatus {
                    user_id: user_id.clone(),
                }),
                _ => Err(RemoteError::Network("self status unavailable".into())),
            },
            ClientRequest::GetMembers { member_ids } => {
                let failing = self
                    .failing_member_fetches
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if failing {
                    return Err(RemoteError::Network("members unavailable".into()));
                }
                Ok(ServerResponse::Members {
                    members: member_ids
                        .iter()
                        .filter_map(|id| self.profiles.get(id).cloned())
                        .collect(),
                })
            }
            ClientRequest::GetGroup {
                conversation_id, ..
            } => match self.groups.get(&conversation_id) {
                Some(group) => Ok(ServerResponse::Group {
                    group: group.clone(),
                }),
                None => Err(RemoteError::remote(ErrorCode::NotFound, "no such group")),
            },
            ClientRequest::PaginatedWorld { .. } => Ok(ServerResponse::World {
                items: self.world.clone(),
            }),
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

pub struct FakeFactory {
    client: Arc<FakeClient>,
    failure: Mutex<Option<RemoteError>>,
    rotate_to: Option<String>,
    seen_tokens: Mutex<Vec<Option<String>>>,
}

impl FakeFactory {
    pub fn new(client: Arc<FakeClient>) -> Self {
        Self {
            client,
            failure: Mutex::new(None),
            rotate_to: None,
            seen_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(self, err: RemoteError) -> Self {
        *lock(&self.failure) = Some(err);
        self
    }

    /// Simulates the client refreshing its credential while resuming.
    pub fn rotating_to(mut self, token: &str) -> Self {
        self.rotate_to = Some(token.to_string());
        self
    }

    pub fn seen_tokens(&self) -> Vec<Option<String>> {
        lock(&self.seen_tokens).clone()
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn resume(&self, tokens: Arc<dyn TokenStore>) -> Result<Arc<dyn RemoteClient>, RemoteError> {
        let token = tokens.get().await;
        lock(&self.seen_tokens).push(token.clone());
        if token.is_none() {
            return Err(RemoteError::BadCredentials("no stored token".into()));
        }
        if let Some(err) = lock(&self.failure).clone() {
            return Err(err);
        }
        if let Some(rotated) = &self.rotate_to {
            tokens
                .set(rotated)
                .await
                .map_err(|err| RemoteError::Network(err.to_string()))?;
        }
        Ok(self.client.clone())
    }
}

// ---------------------------------------------------------------------------
// local chat, status, portals
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeLocalChat {
    rooms_created: AtomicUsize,
    room_delay: Duration,
    fail_notices: bool,
    fail_puppet: bool,
    notices: Mutex<Vec<(RoomId, String, NoticeKind)>>,
    direct_chat_updates: Mutex<Vec<(LocalUserId, RemoteUserId)>>,
    puppet_calls: AtomicUsize,
}

impl FakeLocalChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_room_delay(mut self, delay: Duration) -> Self {
        self.room_delay = delay;
        self
    }

    pub fn failing_notices(mut self) -> Self {
        self.fail_notices = true;
        self
    }

    pub fn failing_puppet(mut self) -> Self {
        self.fail_puppet = true;
        self
    }

    pub fn rooms_created(&self) -> usize {
        self.rooms_created.load(Ordering::SeqCst)
    }

    pub fn notices(&self) -> Vec<(RoomId, String, NoticeKind)> {
        lock(&self.notices).clone()
    }

    pub fn notice_texts(&self) -> Vec<String> {
        self.notices().into_iter().map(|(_, text, _)| text).collect()
    }

    pub fn direct_chat_updates(&self) -> Vec<(LocalUserId, RemoteUserId)> {
        lock(&self.direct_chat_updates).clone()
    }

    pub fn puppet_calls(&self) -> usize {
        self.puppet_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalChat for FakeLocalChat {
    async fn create_notice_room(&self, account: &LocalUserId) -> Result<RoomId> {
        if !self.room_delay.is_zero() {
            tokio::time::sleep(self.room_delay).await;
        }
        let n = self.rooms_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RoomId::new(format!("!notice{n}:{account}")))
    }

    async fn send_notice(&self, room: &RoomId, text: &str, kind: NoticeKind) -> Result<()> {
        if self.fail_notices {
            return Err(anyhow!("notice room unavailable"));
        }
        lock(&self.notices).push((room.clone(), text.to_string(), kind));
        Ok(())
    }

    async fn update_direct_chats(&self, account: &LocalUserId, receiver: &RemoteUserId) -> Result<()> {
        lock(&self.direct_chat_updates).push((account.clone(), receiver.clone()));
        Ok(())
    }

    async fn enable_custom_puppet(&self, _account: &LocalUserId, _remote_id: &RemoteUserId)
        -> Result<bool> {
        self.puppet_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puppet {
            return Err(anyhow!("puppet login refused"));
        }
        Ok(true)
    }
}

#[derive(Default)]
pub struct FakeStatus {
    updates: Mutex<Vec<(LocalUserId, StateUpdate)>>,
}

impl FakeStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<(LocalUserId, StateUpdate)> {
        lock(&self.updates).clone()
    }

    pub fn states(&self) -> Vec<BridgeStateEvent> {
        self.updates()
            .into_iter()
            .map(|(_, update)| update.state)
            .collect()
    }
}

#[async_trait]
impl StatusReporter for FakeStatus {
    async fn push_state(&self, account: &LocalUserId, update: &StateUpdate) {
        lock(&self.updates).push((account.clone(), update.clone()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalCall {
    Created,
    Updated,
    Message(String),
    Edit(String),
    Reaction(String),
    Deletion(String),
    ReadReceipts(usize),
    MarkRead(RemoteUserId),
}

pub type PortalLog = Arc<Mutex<Vec<(ConversationId, PortalCall)>>>;

pub struct FakePortal {
    conversation_id: ConversationId,
    mirrored: Mutex<bool>,
    log: PortalLog,
    message_delay: Duration,
    fail_message_ids: HashSet<String>,
    panic_message_ids: HashSet<String>,
}

impl FakePortal {
    fn record(&self, call: PortalCall) {
        lock(&self.log).push((self.conversation_id.clone(), call));
    }

    async fn message_hooks(&self, message: &RemoteMessage) -> Result<()> {
        if !self.message_delay.is_zero() {
            tokio::time::sleep(self.message_delay).await;
        }
        if self.panic_message_ids.contains(&message.message_id) {
            panic!("handler blew up on {}", message.message_id);
        }
        if self.fail_message_ids.contains(&message.message_id) {
            return Err(anyhow!("cannot bridge {}", message.message_id));
        }
        Ok(())
    }
}

#[async_trait]
impl Portal for FakePortal {
    async fn has_mirror(&self) -> bool {
        *lock(&self.mirrored)
    }

    async fn create_mirror(&self, _account: &LocalUserId, _group: &GroupDescriptor, _item: &WorldItem)
        -> Result<()> {
        *lock(&self.mirrored) = true;
        self.record(PortalCall::Created);
        Ok(())
    }

    async fn update_mirror(&self, _account: &LocalUserId, _group: &GroupDescriptor, _item: &WorldItem)
        -> Result<()> {
        self.record(PortalCall::Updated);
        Ok(())
    }

    async fn handle_message(&self, _ctx: &MessageContext, message: &RemoteMessage) -> Result<()> {
        self.message_hooks(message).await?;
        self.record(PortalCall::Message(message.message_id.clone()));
        Ok(())
    }

    async fn handle_edit(&self, _ctx: &MessageContext, message: &RemoteMessage) -> Result<()> {
        self.message_hooks(message).await?;
        self.record(PortalCall::Edit(message.message_id.clone()));
        Ok(())
    }

    async fn handle_reaction(&self, _account: &LocalUserId, reaction: &ReactionPayload) -> Result<()> {
        self.record(PortalCall::Reaction(reaction.emoji.clone()));
        Ok(())
    }

    async fn handle_deletion(&self, _account: &LocalUserId, deletion: &MessageDeletedPayload)
        -> Result<()> {
        self.record(PortalCall::Deletion(deletion.message_id.clone()));
        Ok(())
    }

    async fn handle_read_receipts(&self, receipts: &ReadReceiptsPayload) -> Result<()> {
        self.record(PortalCall::ReadReceipts(receipts.receipts.len()));
        Ok(())
    }

    async fn mark_read(&self, reader: &RemoteUserId, _view_time: DateTime<Utc>) -> Result<()> {
        self.record(PortalCall::MarkRead(reader.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePortals {
    portals: Mutex<HashMap<ConversationId, Arc<FakePortal>>>,
    mirrored: HashSet<ConversationId>,
    slow: HashMap<ConversationId, Duration>,
    fail_message_ids: HashSet<String>,
    panic_message_ids: HashSet<String>,
    lookups: Mutex<Vec<(ConversationId, RemoteUserId)>>,
    log: PortalLog,
}

impl FakePortals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mirrors(mut self, ids: &[&str]) -> Self {
        self.mirrored.extend(ids.iter().map(|id| ConversationId::new(*id)));
        self
    }

    pub fn with_slow_conversation(mut self, id: &str, delay: Duration) -> Self {
        self.slow.insert(ConversationId::new(id), delay);
        self
    }

    pub fn failing_message(mut self, message_id: &str) -> Self {
        self.fail_message_ids.insert(message_id.to_string());
        self
    }

    pub fn panicking_message(mut self, message_id: &str) -> Self {
        self.panic_message_ids.insert(message_id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(ConversationId, PortalCall)> {
        lock(&self.log).clone()
    }

    pub fn calls_for(&self, id: &str) -> Vec<PortalCall> {
        self.calls()
            .into_iter()
            .filter(|(conversation_id, _)| conversation_id.as_str() == id)
            .map(|(_, call)| call)
            .collect()
    }

    pub fn lookups(&self) -> Vec<(ConversationId, RemoteUserId)> {
        lock(&self.lookups).clone()
    }
}

#[async_trait]
impl PortalDirectory for FakePortals {
    async fn portal(
        &self,
        conversation_id: &ConversationId,
        receiver: &RemoteUserId,
    ) -> Result<Arc<dyn Portal>> {
        lock(&self.lookups).push((conversation_id.clone(), receiver.clone()));
        let portal = lock(&self.portals)
            .entry(conversation_id.clone())
            .or_insert_with(|| {
                Arc::new(FakePortal {
                    conversation_id: conversation_id.clone(),
                    mirrored: Mutex::new(self.mirrored.contains(conversation_id)),
                    log: self.log.clone(),
                    message_delay: self.slow.get(conversation_id).copied().unwrap_or_default(),
                    fail_message_ids: self.fail_message_ids.clone(),
                    panic_message_ids: self.panic_message_ids.clone(),
                })
            })
            .clone();
        Ok(portal)
    }
}

// ---------------------------------------------------------------------------
// persistence
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<LocalUserId, AccountRecord>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(self, record: AccountRecord) -> Self {
        lock(&self.accounts).insert(record.local_user_id.clone(), record);
        self
    }

    pub fn get(&self, local: &LocalUserId) -> Option<AccountRecord> {
        lock(&self.accounts).get(local).cloned()
    }

    fn update(&self, local: &LocalUserId, apply: impl FnOnce(&mut AccountRecord)) {
        let mut accounts = lock(&self.accounts);
        let record = accounts
            .entry(local.clone())
            .or_insert_with(|| AccountRecord::new(local.clone()));
        apply(record);
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn load_account(&self, local: &LocalUserId) -> Result<Option<AccountRecord>> {
        Ok(self.get(local))
    }

    async fn load_account_by_remote_id(&self, remote: &RemoteUserId) -> Result<Option<AccountRecord>> {
        Ok(lock(&self.accounts)
            .values()
            .find(|record| record.remote_id.as_ref() == Some(remote))
            .cloned())
    }

    async fn all_logged_in(&self) -> Result<Vec<AccountRecord>> {
        let mut records: Vec<_> = lock(&self.accounts)
            .values()
            .filter(|record| record.credential.as_deref().is_some_and(|c| !c.is_empty()))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.local_user_id.cmp(&b.local_user_id));
        Ok(records)
    }

    async fn save_account(&self, record: &AccountRecord) -> Result<()> {
        lock(&self.accounts).insert(record.local_user_id.clone(), record.clone());
        Ok(())
    }

    async fn set_remote_id(&self, local: &LocalUserId, remote: Option<&RemoteUserId>) -> Result<()> {
        self.update(local, |record| record.remote_id = remote.cloned());
        Ok(())
    }

    async fn set_credential(&self, local: &LocalUserId, credential: Option<&str>) -> Result<()> {
        self.update(local, |record| record.credential = credential.map(str::to_string));
        Ok(())
    }

    async fn set_notice_room(&self, local: &LocalUserId, room: &RoomId) -> Result<()> {
        self.update(local, |record| record.notice_room = Some(room.clone()));
        Ok(())
    }

    async fn clear_session(&self, local: &LocalUserId) -> Result<()> {
        self.update(local, |record| {
            record.remote_id = None;
            record.credential = None;
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// fully wired bridge
// ---------------------------------------------------------------------------

pub struct TestBridge {
    pub bridge: Bridge,
    pub client: Arc<FakeClient>,
    pub factory: Arc<FakeFactory>,
    pub local_chat: Arc<FakeLocalChat>,
    pub portals: Arc<FakePortals>,
    pub status: Arc<FakeStatus>,
    pub store: Arc<MemoryAccountStore>,
}

pub struct TestBridgeBuilder {
    settings: BridgeSettings,
    client: FakeClient,
    factory: Box<dyn FnOnce(FakeFactory) -> FakeFactory>,
    local_chat: FakeLocalChat,
    portals: FakePortals,
    store: MemoryAccountStore,
}

impl TestBridgeBuilder {
    pub fn new(client: FakeClient) -> Self {
        Self {
            settings: BridgeSettings::default(),
            client,
            factory: Box::new(|factory| factory),
            local_chat: FakeLocalChat::new(),
            portals: FakePortals::new(),
            store: MemoryAccountStore::new(),
        }
    }

    pub fn settings(mut self, apply: impl FnOnce(&mut BridgeSettings)) -> Self {
        apply(&mut self.settings);
        self
    }

    pub fn factory(mut self, apply: impl FnOnce(FakeFactory) -> FakeFactory + 'static) -> Self {
        self.factory = Box::new(apply);
        self
    }

    pub fn local_chat(mut self, local_chat: FakeLocalChat) -> Self {
        self.local_chat = local_chat;
        self
    }

    pub fn portals(mut self, portals: FakePortals) -> Self {
        self.portals = portals;
        self
    }

    pub fn account(mut self, record: AccountRecord) -> Self {
        self.store = self.store.with_account(record);
        self
    }

    pub fn build(self) -> TestBridge {
        let client = Arc::new(self.client);
        let factory = Arc::new((self.factory)(FakeFactory::new(client.clone())));
        let local_chat = Arc::new(self.local_chat);
        let portals = Arc::new(self.portals);
        let status = Arc::new(FakeStatus::new());
        let store = Arc::new(self.store);
        let bridge = Bridge::new(
            self.settings,
            Collaborators {
                store: store.clone(),
                clients: factory.clone(),
                local_chat: local_chat.clone(),
                portals: portals.clone(),
                status: status.clone(),
            },
        );
        TestBridge {
            bridge,
            client,
            factory,
            local_chat,
            portals,
            status,
            store,
        }
    }
}

impl TestBridge {
    pub async fn session(&self, local: &LocalUserId) -> Arc<Session> {
        self.bridge
            .get_session(local, true)
            .await
            .expect("load session")
            .expect("session exists")
    }

    pub async fn connected(&self) {
        eventually("bridge reports connected", || {
            self.status.states().contains(&BridgeStateEvent::Connected)
        })
        .await;
    }
}

pub fn logged_in_record(local: &str, credential: &str) -> AccountRecord {
    AccountRecord {
        credential: Some(credential.to_string()),
        ..AccountRecord::new(LocalUserId::new(local))
    }
}
