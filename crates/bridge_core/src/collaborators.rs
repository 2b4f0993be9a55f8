//! Seams to the local chat side and the status reporter.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{ConversationId, GroupDescriptor, LocalUserId, Profile, RemoteUserId, RoomId, WorldItem},
    protocol::{MessageDeletedPayload, ReactionPayload, ReadReceiptsPayload, RemoteMessage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeStateEvent {
    TransientDisconnect,
    Backfilling,
    Connected,
    BadCredentials,
    UnknownError,
}

impl BridgeStateEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientDisconnect => "TRANSIENT_DISCONNECT",
            Self::Backfilling => "BACKFILLING",
            Self::Connected => "CONNECTED",
            Self::BadCredentials => "BAD_CREDENTIALS",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub state: BridgeStateEvent,
    pub message: Option<String>,
    pub error: Option<String>,
    pub remote_id: Option<RemoteUserId>,
    pub remote_name: Option<String>,
}

impl StateUpdate {
    pub fn new(state: BridgeStateEvent) -> Self {
        Self {
            state,
            message: None,
            error: None,
            remote_id: None,
            remote_name: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn push_state(&self, account: &LocalUserId, update: &StateUpdate);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Text,
    Notice,
}

/// Room and puppet management on the local chat side.
#[async_trait]
pub trait LocalChat: Send + Sync {
    async fn create_notice_room(&self, account: &LocalUserId) -> Result<RoomId>;
    async fn send_notice(&self, room: &RoomId, text: &str, kind: NoticeKind) -> Result<()>;
    async fn update_direct_chats(&self, account: &LocalUserId, receiver: &RemoteUserId) -> Result<()>;
    /// Returns whether the enhanced identity mode is now active.
    async fn enable_custom_puppet(&self, account: &LocalUserId, remote_id: &RemoteUserId)
        -> Result<bool>;
}

#[async_trait]
pub trait PortalDirectory: Send + Sync {
    /// Looks up (or instantiates) the local handle of a remote conversation.
    async fn portal(
        &self,
        conversation_id: &ConversationId,
        receiver: &RemoteUserId,
    ) -> Result<Arc<dyn Portal>>;
}

/// Resolved context handed to message-level handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    pub account: LocalUserId,
    pub group: GroupDescriptor,
    pub sender: Profile,
}

/// One mirrored conversation. Content translation happens behind this trait.
#[async_trait]
pub trait Portal: Send + Sync {
    async fn has_mirror(&self) -> bool;
    async fn create_mirror(&self, account: &LocalUserId, group: &GroupDescriptor, item: &WorldItem)
        -> Result<()>;
    async fn update_mirror(&self, account: &LocalUserId, group: &GroupDescriptor, item: &WorldItem)
        -> Result<()>;
    async fn handle_message(&self, ctx: &MessageContext, message: &RemoteMessage) -> Result<()>;
    async fn handle_edit(&self, ctx: &MessageContext, message: &RemoteMessage) -> Result<()>;
    async fn handle_reaction(&self, account: &LocalUserId, reaction: &ReactionPayload) -> Result<()>;
    async fn handle_deletion(&self, account: &LocalUserId, deletion: &MessageDeletedPayload)
        -> Result<()>;
    async fn handle_read_receipts(&self, receipts: &ReadReceiptsPayload) -> Result<()>;
    async fn mark_read(&self, reader: &RemoteUserId, view_time: DateTime<Utc>) -> Result<()>;
}
