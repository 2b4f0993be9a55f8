use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{LocalUserId, RemoteUserId, RoomId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Persisted state of one bridged account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub local_user_id: LocalUserId,
    pub remote_id: Option<RemoteUserId>,
    pub credential: Option<String>,
    pub notice_room: Option<RoomId>,
}

impl AccountRecord {
    pub fn new(local_user_id: LocalUserId) -> Self {
        Self {
            local_user_id,
            remote_id: None,
            credential: None,
            notice_room: None,
        }
    }
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // every connection to an in-memory database sees its own empty database
        let max_connections = if database_url.starts_with("sqlite::memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open account database '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run account database migrations")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn load_account(&self, local_user_id: &LocalUserId) -> Result<Option<AccountRecord>> {
        let row = sqlx::query(
            "SELECT local_user_id, remote_id, credential, notice_room
             FROM accounts WHERE local_user_id = ?",
        )
        .bind(local_user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load account {local_user_id}"))?;
        Ok(row.map(account_from_row))
    }

    pub async fn load_account_by_remote_id(
        &self,
        remote_id: &RemoteUserId,
    ) -> Result<Option<AccountRecord>> {
        let row = sqlx::query(
            "SELECT local_user_id, remote_id, credential, notice_room
             FROM accounts WHERE remote_id = ?",
        )
        .bind(remote_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load account for remote id {remote_id}"))?;
        Ok(row.map(account_from_row))
    }

    pub async fn upsert_account(&self, record: &AccountRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO accounts (local_user_id, remote_id, credential, notice_room)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(local_user_id) DO UPDATE SET
                remote_id=excluded.remote_id,
                credential=excluded.credential,
                notice_room=excluded.notice_room,
                updated_at=CURRENT_TIMESTAMP",
        )
        .bind(record.local_user_id.as_str())
        .bind(record.remote_id.as_ref().map(RemoteUserId::as_str))
        .bind(record.credential.as_deref())
        .bind(record.notice_room.as_ref().map(RoomId::as_str))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save account {}", record.local_user_id))?;
        Ok(())
    }

    /// Accounts with a stored credential, ordered by local id.
    pub async fn all_logged_in(&self) -> Result<Vec<AccountRecord>> {
        let rows = sqlx::query(
            "SELECT local_user_id, remote_id, credential, notice_room
             FROM accounts
             WHERE credential IS NOT NULL AND credential != ''
             ORDER BY local_user_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list logged in accounts")?;
        Ok(rows.into_iter().map(account_from_row).collect())
    }

    pub async fn set_remote_id(
        &self,
        local_user_id: &LocalUserId,
        remote_id: Option<&RemoteUserId>,
    ) -> Result<()> {
        self.ensure_account(local_user_id).await?;
        sqlx::query(
            "UPDATE accounts SET remote_id = ?, updated_at = CURRENT_TIMESTAMP
             WHERE local_user_id = ?",
        )
        .bind(remote_id.map(RemoteUserId::as_str))
        .bind(local_user_id.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store remote id for {local_user_id}"))?;
        Ok(())
    }

    pub async fn set_credential(
        &self,
        local_user_id: &LocalUserId,
        credential: Option<&str>,
    ) -> Result<()> {
        self.ensure_account(local_user_id).await?;
        sqlx::query(
            "UPDATE accounts SET credential = ?, updated_at = CURRENT_TIMESTAMP
             WHERE local_user_id = ?",
        )
        .bind(credential)
        .bind(local_user_id.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store credential for {local_user_id}"))?;
        Ok(())
    }

    pub async fn set_notice_room(&self, local_user_id: &LocalUserId, room: &RoomId) -> Result<()> {
        self.ensure_account(local_user_id).await?;
        sqlx::query(
            "UPDATE accounts SET notice_room = ?, updated_at = CURRENT_TIMESTAMP
             WHERE local_user_id = ?",
        )
        .bind(room.as_str())
        .bind(local_user_id.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store notice room for {local_user_id}"))?;
        Ok(())
    }

    /// Forget the remote identity and credential; the notice room survives logout.
    pub async fn clear_session(&self, local_user_id: &LocalUserId) -> Result<()> {
        sqlx::query(
            "UPDATE accounts SET remote_id = NULL, credential = NULL, updated_at = CURRENT_TIMESTAMP
             WHERE local_user_id = ?",
        )
        .bind(local_user_id.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to clear session for {local_user_id}"))?;
        Ok(())
    }

    async fn ensure_account(&self, local_user_id: &LocalUserId) -> Result<()> {
        sqlx::query("INSERT INTO accounts (local_user_id) VALUES (?) ON CONFLICT(local_user_id) DO NOTHING")
            .bind(local_user_id.as_str())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to create account row for {local_user_id}"))?;
        Ok(())
    }
}

fn account_from_row(row: SqliteRow) -> AccountRecord {
    AccountRecord {
        local_user_id: LocalUserId(row.get::<String, _>(0)),
        remote_id: row.get::<Option<String>, _>(1).map(RemoteUserId),
        credential: row.get::<Option<String>, _>(2),
        notice_room: row.get::<Option<String>, _>(3).map(RoomId),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
