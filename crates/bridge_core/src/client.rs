use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{ConversationId, GroupDescriptor, Profile, RemoteUserId, WorldItem},
    error::RemoteError,
    protocol::{ClientRequest, RemoteEvent, ServerResponse},
};
use tokio::sync::broadcast;

/// Notifications published by a remote client to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Reconnected,
    Disconnected,
    Stream(RemoteEvent),
}

/// Transport to the remote chat service. The wire protocol lives behind this trait.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Runs the connection and only returns once it has ended, either because
    /// `disconnect` was called or because the remote side went away.
    async fn connect(&self) -> Result<(), RemoteError>;
    async fn disconnect(&self) -> Result<(), RemoteError>;
    async fn send_request(&self, request: ClientRequest) -> Result<ServerResponse, RemoteError>;
    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

/// Where a client reads its credential from and writes rotated credentials to.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self) -> Option<String>;
    async fn set(&self, token: &str) -> Result<()>;
}

#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Builds a client from the credential in `tokens`.
    ///
    /// Fails with a credential error when the stored token is invalid or expired.
    async fn resume(
        &self,
        tokens: Arc<dyn TokenStore>,
    ) -> Result<Arc<dyn RemoteClient>, RemoteError>;
}

pub async fn get_self_user_id(client: &dyn RemoteClient) -> Result<RemoteUserId, RemoteError> {
    let request = ClientRequest::GetSelfUserStatus;
    let name = request.name();
    match client.send_request(request).await? {
        ServerResponse::SelfUserStatus { user_id } => Ok(user_id),
        other => Err(unexpected(name, &other)),
    }
}

pub async fn get_members(
    client: &dyn RemoteClient,
    member_ids: Vec<RemoteUserId>,
) -> Result<Vec<Profile>, RemoteError> {
    let request = ClientRequest::GetMembers { member_ids };
    let name = request.name();
    match client.send_request(request).await? {
        ServerResponse::Members { members } => Ok(members),
        other => Err(unexpected(name, &other)),
    }
}

pub async fn get_group(
    client: &dyn RemoteClient,
    conversation_id: &ConversationId,
) -> Result<GroupDescriptor, RemoteError> {
    let request = ClientRequest::GetGroup {
        conversation_id: conversation_id.clone(),
        include_members: true,
        include_dynamic_name: true,
    };
    let name = request.name();
    match client.send_request(request).await? {
        ServerResponse::Group { group } => Ok(group),
        other => Err(unexpected(name, &other)),
    }
}

pub async fn paginated_world(client: &dyn RemoteClient) -> Result<Vec<WorldItem>, RemoteError> {
    let request = ClientRequest::PaginatedWorld {
        fetch_from_user_spaces: true,
    };
    let name = request.name();
    match client.send_request(request).await? {
        ServerResponse::World { items } => Ok(items),
        other => Err(unexpected(name, &other)),
    }
}

fn unexpected(request: &'static str, actual: &ServerResponse) -> RemoteError {
    RemoteError::UnexpectedResponse {
        request,
        actual: actual.name(),
    }
}
