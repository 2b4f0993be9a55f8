//! Classification and per-conversation dispatch of live remote events.
//!
//! Every conversation gets its own worker fed by an unbounded queue, so
//! events of one conversation are handled in stream order while a slow or
//! failing handler never holds up other conversations or the ingestion path.
//! A worker whose queue stays empty for `WORKER_IDLE_TIMEOUT` retires; the
//! next event of its conversation starts a fresh one.

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use shared::{
    domain::{ConversationId, GroupDescriptor, LocalUserId, Profile, RemoteUserId},
    protocol::{
        EventBody, EventType, MessageDeletedPayload, ReactionPayload, ReadReceiptsPayload,
        RemoteEvent, RemoteMessage,
    },
};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, error};

use crate::{
    background::BackgroundTasks,
    collaborators::{MessageContext, PortalDirectory},
    error::SessionError,
};

/// What a recognised event asks the conversation to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Message(RemoteMessage),
    Edit(RemoteMessage),
    Reaction(ReactionPayload),
    Deletion(MessageDeletedPayload),
    ReadReceipts(ReadReceiptsPayload),
    Viewed(DateTime<Utc>),
}

impl Dispatch {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Edit(_) => "edit",
            Self::Reaction(_) => "reaction",
            Self::Deletion(_) => "deletion",
            Self::ReadReceipts(_) => "read_receipts",
            Self::Viewed(_) => "viewed",
        }
    }
}

/// Picks the handler by payload shape; a posted message is an edit when the
/// event type says so.
pub fn classify(event_type: EventType, body: EventBody) -> Option<Dispatch> {
    match body {
        EventBody::MessagePosted { message } if event_type == EventType::MessageUpdated => {
            Some(Dispatch::Edit(message))
        }
        EventBody::MessagePosted { message } => Some(Dispatch::Message(message)),
        EventBody::MessageReaction(reaction) => Some(Dispatch::Reaction(reaction)),
        EventBody::MessageDeleted(deletion) => Some(Dispatch::Deletion(deletion)),
        EventBody::ReadReceiptChanged(receipts) => Some(Dispatch::ReadReceipts(receipts)),
        EventBody::GroupViewed { view_time } => Some(Dispatch::Viewed(view_time)),
        EventBody::TypingStateChanged { .. } | EventBody::Unrecognized => None,
    }
}

/// Session-side lookups the router needs before handing an event off.
#[async_trait]
pub trait ConversationResolver: Send + Sync {
    fn account(&self) -> &LocalUserId;
    /// Remote id of the account; portals are keyed by it.
    async fn receiver(&self) -> Result<RemoteUserId, SessionError>;
    async fn resolve_group(&self, id: &ConversationId) -> Result<GroupDescriptor, SessionError>;
    async fn resolve_user(&self, id: &RemoteUserId) -> Result<Profile, SessionError>;
}

const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

struct Worker {
    id: u64,
    sender: mpsc::UnboundedSender<Dispatch>,
}

#[derive(Default)]
struct Workers {
    next_id: u64,
    by_conversation: HashMap<ConversationId, Worker>,
}

// std Mutex: never held across an await point
type SharedWorkers = Arc<Mutex<Workers>>;

pub struct EventRouter {
    resolver: Arc<dyn ConversationResolver>,
    portals: Arc<dyn PortalDirectory>,
    tasks: BackgroundTasks,
    workers: SharedWorkers,
    idle_timeout: Duration,
}

impl EventRouter {
    pub fn new(
        resolver: Arc<dyn ConversationResolver>,
        portals: Arc<dyn PortalDirectory>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            resolver,
            portals,
            tasks,
            workers: SharedWorkers::default(),
            idle_timeout: WORKER_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Queues `event` for its conversation and returns without waiting.
    pub fn handle(&self, event: RemoteEvent) {
        let RemoteEvent {
            conversation_id,
            event_type,
            body,
        } = event;

        let Some(conversation_id) = conversation_id else {
            debug!(event_type = event_type.name(), "dropping event without conversation id");
            return;
        };
        let Some(dispatch) = classify(event_type, body) else {
            debug!(
                conversation_id = %conversation_id,
                event_type = event_type.name(),
                "unhandled event type"
            );
            return;
        };

        self.enqueue(conversation_id, dispatch);
    }

    pub fn active_conversations(&self) -> usize {
        lock_workers(&self.workers).by_conversation.len()
    }

    fn enqueue(&self, conversation_id: ConversationId, dispatch: Dispatch) {
        let mut workers = lock_workers(&self.workers);
        let dispatch = match workers.by_conversation.get(&conversation_id) {
            Some(worker) => match worker.sender.send(dispatch) {
                Ok(()) => return,
                // worker is gone; start a new one below
                Err(mpsc::error::SendError(dispatch)) => dispatch,
            },
            None => dispatch,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        // the receiver is still in hand, so this cannot fail
        let _ = sender.send(dispatch);
        let id = workers.next_id;
        workers.next_id += 1;
        workers
            .by_conversation
            .insert(conversation_id.clone(), Worker { id, sender });
        drop(workers);

        self.tasks.spawn(run_worker(
            WorkerSlot {
                id,
                conversation_id,
                workers: self.workers.clone(),
                idle_timeout: self.idle_timeout,
            },
            receiver,
            self.resolver.clone(),
            self.portals.clone(),
        ));
    }
}

fn lock_workers(workers: &Mutex<Workers>) -> MutexGuard<'_, Workers> {
    workers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A worker's own entry in the router's map.
struct WorkerSlot {
    id: u64,
    conversation_id: ConversationId,
    workers: SharedWorkers,
    idle_timeout: Duration,
}

impl WorkerSlot {
    /// Waits for the next job, or returns `None` once the worker should exit.
    async fn next(&self, jobs: &mut mpsc::UnboundedReceiver<Dispatch>) -> Option<Dispatch> {
        if let Ok(next) = tokio::time::timeout(self.idle_timeout, jobs.recv()).await {
            return next;
        }

        // enqueue sends under this lock, so an empty queue stays empty
        let mut workers = lock_workers(&self.workers);
        match jobs.try_recv() {
            Ok(dispatch) => Some(dispatch),
            Err(TryRecvError::Empty) => {
                let ours = workers
                    .by_conversation
                    .get(&self.conversation_id)
                    .is_some_and(|worker| worker.id == self.id);
                if ours {
                    workers.by_conversation.remove(&self.conversation_id);
                }
                debug!(conversation_id = %self.conversation_id, "conversation worker idle; retiring");
                None
            }
            Err(TryRecvError::Disconnected) => None,
        }
    }
}

async fn run_worker(
    slot: WorkerSlot,
    mut jobs: mpsc::UnboundedReceiver<Dispatch>,
    resolver: Arc<dyn ConversationResolver>,
    portals: Arc<dyn PortalDirectory>,
) {
    let conversation_id = slot.conversation_id.clone();
    while let Some(dispatch) = slot.next(&mut jobs).await {
        let kind = dispatch.kind();
        let outcome = AssertUnwindSafe(deliver(
            resolver.as_ref(),
            portals.as_ref(),
            &conversation_id,
            dispatch,
        ))
        .catch_unwind()
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(
                account = %resolver.account(),
                conversation_id = %conversation_id,
                kind,
                error = %format!("{err:#}"),
                "exception in event handler"
            ),
            Err(_) => error!(
                account = %resolver.account(),
                conversation_id = %conversation_id,
                kind,
                "event handler panicked"
            ),
        }
    }
    debug!(conversation_id = %conversation_id, "conversation worker finished");
}

async fn deliver(
    resolver: &dyn ConversationResolver,
    portals: &dyn PortalDirectory,
    conversation_id: &ConversationId,
    dispatch: Dispatch,
) -> Result<()> {
    let account = resolver.account();
    let receiver = resolver.receiver().await?;
    let portal = portals
        .portal(conversation_id, &receiver)
        .await
        .with_context(|| format!("failed to look up portal for {conversation_id}"))?;

    match dispatch {
        Dispatch::Message(message) => {
            let ctx = message_context(resolver, conversation_id, &message).await?;
            portal.handle_message(&ctx, &message).await
        }
        Dispatch::Edit(message) => {
            let ctx = message_context(resolver, conversation_id, &message).await?;
            portal.handle_edit(&ctx, &message).await
        }
        Dispatch::Reaction(reaction) => portal.handle_reaction(account, &reaction).await,
        Dispatch::Deletion(deletion) => portal.handle_deletion(account, &deletion).await,
        Dispatch::ReadReceipts(receipts) => portal.handle_read_receipts(&receipts).await,
        Dispatch::Viewed(view_time) => portal.mark_read(&receiver, view_time).await,
    }
}

async fn message_context(
    resolver: &dyn ConversationResolver,
    conversation_id: &ConversationId,
    message: &RemoteMessage,
) -> Result<MessageContext> {
    let group = resolver.resolve_group(conversation_id).await?;
    let sender = resolver.resolve_user(&message.sender_id).await?;
    Ok(MessageContext {
        account: resolver.account().clone(),
        group,
        sender,
    })
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
