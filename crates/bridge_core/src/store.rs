use anyhow::Result;
use async_trait::async_trait;
use shared::domain::{LocalUserId, RemoteUserId, RoomId};
use storage::{AccountRecord, Storage};

/// Persistence of the account fields this crate reads and writes.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn load_account(&self, local: &LocalUserId) -> Result<Option<AccountRecord>>;
    async fn load_account_by_remote_id(&self, remote: &RemoteUserId) -> Result<Option<AccountRecord>>;
    async fn all_logged_in(&self) -> Result<Vec<AccountRecord>>;
    async fn save_account(&self, record: &AccountRecord) -> Result<()>;
    async fn set_remote_id(&self, local: &LocalUserId, remote: Option<&RemoteUserId>) -> Result<()>;
    async fn set_credential(&self, local: &LocalUserId, credential: Option<&str>) -> Result<()>;
    async fn set_notice_room(&self, local: &LocalUserId, room: &RoomId) -> Result<()>;
    async fn clear_session(&self, local: &LocalUserId) -> Result<()>;
}

#[async_trait]
impl AccountStore for Storage {
    async fn load_account(&self, local: &LocalUserId) -> Result<Option<AccountRecord>> {
        Storage::load_account(self, local).await
    }

    async fn load_account_by_remote_id(&self, remote: &RemoteUserId) -> Result<Option<AccountRecord>> {
        Storage::load_account_by_remote_id(self, remote).await
    }

    async fn all_logged_in(&self) -> Result<Vec<AccountRecord>> {
        Storage::all_logged_in(self).await
    }

    async fn save_account(&self, record: &AccountRecord) -> Result<()> {
        self.upsert_account(record).await
    }

    async fn set_remote_id(&self, local: &LocalUserId, remote: Option<&RemoteUserId>) -> Result<()> {
        Storage::set_remote_id(self, local, remote).await
    }

    async fn set_credential(&self, local: &LocalUserId, credential: Option<&str>) -> Result<()> {
        Storage::set_credential(self, local, credential).await
    }

    async fn set_notice_room(&self, local: &LocalUserId, room: &RoomId) -> Result<()> {
        Storage::set_notice_room(self, local, room).await
    }

    async fn clear_session(&self, local: &LocalUserId) -> Result<()> {
        Storage::clear_session(self, local).await
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
