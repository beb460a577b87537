use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use super::{
    PushSubscription, RefreshToken, RefreshTokenRepository, Room, RoomRepository, StoreError,
    StoreResult, User, UserRepository, from_unix,
};

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub struct SqliteRoomRepository {
    db_pool: SqlitePool,
}

impl SqliteRoomRepository {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl RoomRepository for SqliteRoomRepository {
    async fn add_room(&self, id: &str, creator_user_id: &str, secret: Option<&str>) -> StoreResult<()> {
        let now = now();
        sqlx::query(
            "INSERT INTO rooms (id,creator_user_id,created_at,updated_at,secret) VALUES (?,?,?,?,?)
             ON CONFLICT(id) DO UPDATE SET updated_at = MAX(updated_at, excluded.updated_at)",
        )
        .bind(id)
        .bind(creator_user_id)
        .bind(now)
        .bind(now)
        .bind(secret)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn get_room(&self, id: &str) -> StoreResult<Option<Room>> {
        let row: Option<(String, String, i64, i64, Option<String>)> = sqlx::query_as(
            "SELECT id,creator_user_id,created_at,updated_at,secret FROM rooms WHERE id=?",
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await?;

        let Some((id, creator_user_id, created_at, updated_at, secret)) = row else {
            return Ok(None);
        };

        Ok(Some(Room {
            id,
            creator_user_id,
            created_at: from_unix(created_at)?,
            updated_at: from_unix(updated_at)?,
            secret,
        }))
    }

    async fn refresh_room(&self, id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE rooms SET updated_at = MAX(updated_at, ?) WHERE id=?")
            .bind(now())
            .bind(id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn delete_room(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM rooms WHERE id=?")
            .bind(id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn clean_rooms(&self, ttl: Duration) -> StoreResult<usize> {
        let cutoff = (OffsetDateTime::now_utc() - ttl).unix_timestamp();
        let result = sqlx::query("DELETE FROM rooms WHERE updated_at < ?")
            .bind(cutoff)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

pub struct SqliteRefreshTokenRepository {
    db_pool: SqlitePool,
}

impl SqliteRefreshTokenRepository {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl RefreshTokenRepository for SqliteRefreshTokenRepository {
    async fn create(&self, token: &RefreshToken) -> StoreResult<()> {
        // the upsert only fires over an expired row
        let result = sqlx::query(
            "INSERT INTO refresh_tokens (token,user_id,expiry) VALUES (?,?,?)
             ON CONFLICT(token) DO UPDATE SET user_id = excluded.user_id, expiry = excluded.expiry
             WHERE refresh_tokens.expiry <= ?",
        )
        .bind(&token.token)
        .bind(&token.user_id)
        .bind(token.expiry.unix_timestamp())
        .bind(now())
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TokenAlreadyExists);
        }
        Ok(())
    }

    async fn get_token(&self, token: &str) -> StoreResult<Option<RefreshToken>> {
        let row: Option<(String, String, i64)> =
            sqlx::query_as("SELECT token,user_id,expiry FROM refresh_tokens WHERE token=?")
                .bind(token)
                .fetch_optional(&self.db_pool)
                .await?;

        row.map(|(token, user_id, expiry)| -> StoreResult<RefreshToken> {
            Ok(RefreshToken { token, user_id, expiry: from_unix(expiry)? })
        })
        .transpose()
    }

    async fn remove(&self, token: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM refresh_tokens WHERE token=?")
            .bind(token)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn clean_expired(&self) -> StoreResult<usize> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expiry <= ?")
            .bind(now())
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

pub struct SqliteUserRepository {
    db_pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }
}

type UserRow = (String, String, Option<String>, bool, i64, Option<String>);

fn user_from_row((id, username, password_hash, is_guest, created_at, push): UserRow) -> StoreResult<User> {
    let push_subscription = match push {
        Some(json) => match serde_json::from_str(&json) {
            Ok(sub) => Some(sub),
            Err(err) => {
                tracing::warn!(user_id = %id, %err, "ignoring unreadable push subscription");
                None
            }
        },
        None => None,
    };

    Ok(User {
        id,
        username,
        password_hash,
        is_guest,
        created_at: from_unix(created_at)?,
        push_subscription,
    })
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        let push = user
            .push_subscription
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;

        sqlx::query(
            "INSERT INTO users (id,username,password_hash,is_guest,created_at,push_subscription) VALUES (?,?,?,?,?,?)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.is_guest)
        .bind(user.created_at.unix_timestamp())
        .bind(push)
        .execute(&self.db_pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::UserAlreadyExists
            } else {
                StoreError::Database(err)
            }
        })?;
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id,username,password_hash,is_guest,created_at,push_subscription FROM users WHERE id=?",
        )
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id,username,password_hash,is_guest,created_at,push_subscription FROM users WHERE username=? AND is_guest=0",
        )
        .bind(username)
        .fetch_optional(&self.db_pool)
        .await?;

        row.map(user_from_row).transpose()
    }

    async fn update_push_subscription(&self, user_id: &str, sub: &PushSubscription) -> StoreResult<()> {
        let json = serde_json::to_string(sub).map_err(|err| StoreError::Corrupt(err.to_string()))?;
        let result = sqlx::query("UPDATE users SET push_subscription=? WHERE id=?")
            .bind(json)
            .bind(user_id)
            .execute(&self.db_pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound);
        }
        Ok(())
    }

    async fn remove_push_subscription(&self, user_id: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET push_subscription=NULL WHERE id=?")
            .bind(user_id)
            .execute(&self.db_pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound);
        }
        Ok(())
    }
}
