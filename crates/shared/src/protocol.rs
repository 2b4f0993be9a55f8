use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ConversationId, GroupDescriptor, Profile, RemoteUserId, WorldItem};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    GetSelfUserStatus,
    GetMembers {
        member_ids: Vec<RemoteUserId>,
    },
    GetGroup {
        conversation_id: ConversationId,
        include_members: bool,
        include_dynamic_name: bool,
    },
    PaginatedWorld {
        fetch_from_user_spaces: bool,
    },
}

impl ClientRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetSelfUserStatus => "get_self_user_status",
            Self::GetMembers { .. } => "get_members",
            Self::GetGroup { .. } => "get_group",
            Self::PaginatedWorld { .. } => "paginated_world",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerResponse {
    SelfUserStatus { user_id: RemoteUserId },
    Members { members: Vec<Profile> },
    Group { group: GroupDescriptor },
    World { items: Vec<WorldItem> },
}

impl ServerResponse {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelfUserStatus { .. } => "self_user_status",
            Self::Members { .. } => "members",
            Self::Group { .. } => "group",
            Self::World { .. } => "world",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    MessagePosted,
    MessageUpdated,
    MessageReaction,
    MessageDeleted,
    ReadReceiptChanged,
    GroupViewed,
    TypingStateChanged,
    #[serde(other)]
    Unknown,
}

impl EventType {
    pub fn name(self) -> &'static str {
        match self {
            Self::MessagePosted => "MESSAGE_POSTED",
            Self::MessageUpdated => "MESSAGE_UPDATED",
            Self::MessageReaction => "MESSAGE_REACTION",
            Self::MessageDeleted => "MESSAGE_DELETED",
            Self::ReadReceiptChanged => "READ_RECEIPT_CHANGED",
            Self::GroupViewed => "GROUP_VIEWED",
            Self::TypingStateChanged => "TYPING_STATE_CHANGED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    pub event_type: EventType,
    pub body: EventBody,
}

/// Payload shape of a remote event. Unknown shapes fold into `Unrecognized`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    MessagePosted { message: RemoteMessage },
    MessageReaction(ReactionPayload),
    MessageDeleted(MessageDeletedPayload),
    ReadReceiptChanged(ReadReceiptsPayload),
    GroupViewed { view_time: DateTime<Utc> },
    TypingStateChanged { user_id: RemoteUserId, typing: bool },
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub message_id: String,
    pub sender_id: RemoteUserId,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edited_at: Option<DateTime<Utc>>,
    /// Message content as sent by the remote service; never inspected here.
    #[serde(default)]
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionPayload {
    pub message_id: String,
    pub user_id: RemoteUserId,
    pub emoji: String,
    pub added: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeletedPayload {
    pub message_id: String,
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: RemoteUserId,
    pub read_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceiptsPayload {
    pub receipts: Vec<ReadReceipt>,
}
