//! Repository contracts and their two backends.
//!
//! Every repository answers "absent" with `Ok(None)` and reserves `Err` for a
//! backend that misbehaved, so callers can tell a missing room from a broken
//! database.

mod mem;
mod sqlite;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub use mem::{MemRefreshTokenRepository, MemRoomRepository, MemUserRepository};
pub use sqlite::{SqliteRefreshTokenRepository, SqliteRoomRepository, SqliteUserRepository};

use crate::config::{StorageConfig, StorageKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token already exists")]
    TokenAlreadyExists,
    #[error("user already exists")]
    UserAlreadyExists,
    #[error("user not found")]
    UserNotFound,
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: String,
    pub creator_user_id: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    /// Legacy access secret; rooms without one are open to any token holder.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshToken {
    pub token: String,
    pub user_id: String,
    pub expiry: OffsetDateTime,
}

impl RefreshToken {
    pub fn is_valid(&self) -> bool {
        self.expiry > OffsetDateTime::now_utc()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: PushKeys,
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    /// PHC string; guests have none and cannot log in with a password.
    pub password_hash: Option<String>,
    pub is_guest: bool,
    pub created_at: OffsetDateTime,
    pub push_subscription: Option<PushSubscription>,
}

#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// Creates the room, or bumps its last activity if the id is taken.
    async fn add_room(&self, id: &str, creator_user_id: &str, secret: Option<&str>) -> StoreResult<()>;
    async fn get_room(&self, id: &str) -> StoreResult<Option<Room>>;
    /// Moves last activity to now. Never moves it backwards.
    async fn refresh_room(&self, id: &str) -> StoreResult<()>;
    async fn delete_room(&self, id: &str) -> StoreResult<()>;
    /// Deletes every room idle for longer than `ttl`, returning how many went.
    async fn clean_rooms(&self, ttl: Duration) -> StoreResult<usize>;
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Fails with [`StoreError::TokenAlreadyExists`] if the value belongs to a
    /// still valid token. An expired holder of the same value is overwritten.
    async fn create(&self, token: &RefreshToken) -> StoreResult<()>;
    async fn get_token(&self, token: &str) -> StoreResult<Option<RefreshToken>>;
    async fn remove(&self, token: &str) -> StoreResult<()>;
    async fn clean_expired(&self) -> StoreResult<usize>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, user: &User) -> StoreResult<()>;
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>>;
    /// Guests are not addressable by name.
    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn update_push_subscription(&self, user_id: &str, sub: &PushSubscription) -> StoreResult<()>;
    async fn remove_push_subscription(&self, user_id: &str) -> StoreResult<()>;
}

pub type Rooms = Arc<dyn RoomRepository>;
pub type Users = Arc<dyn UserRepository>;
pub type RefreshTokenStore = Arc<dyn RefreshTokenRepository>;

/// The three repositories, all backed by the same storage kind.
#[derive(Clone)]
pub struct Storage {
    pub rooms: Rooms,
    pub users: Users,
    pub refresh_tokens: RefreshTokenStore,
}

impl Storage {
    pub fn memory() -> Self {
        Self {
            rooms: Arc::new(MemRoomRepository::default()),
            users: Arc::new(MemUserRepository::default()),
            refresh_tokens: Arc::new(MemRefreshTokenRepository::default()),
        }
    }

    pub fn sqlite(pool: sqlx::SqlitePool) -> Self {
        Self {
            rooms: Arc::new(SqliteRoomRepository::new(pool.clone())),
            users: Arc::new(SqliteUserRepository::new(pool.clone())),
            refresh_tokens: Arc::new(SqliteRefreshTokenRepository::new(pool)),
        }
    }

    pub async fn open(config: &StorageConfig) -> anyhow::Result<Self> {
        match config.kind {
            StorageKind::Memory => Ok(Self::memory()),
            StorageKind::Sqlite => {
                let pool = crate::db::connect(&config.database_url, config.max_connections).await?;
                Ok(Self::sqlite(pool))
            }
        }
    }
}

pub(crate) fn from_unix(secs: i64) -> StoreResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs).map_err(|err| StoreError::Corrupt(err.to_string()))
}
