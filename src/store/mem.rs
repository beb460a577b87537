use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use parking_lot::RwLock;
use time::OffsetDateTime;

use super::{
    PushSubscription, RefreshToken, RefreshTokenRepository, Room, RoomRepository, StoreError,
    StoreResult, User, UserRepository,
};

#[derive(Default)]
pub struct MemRoomRepository {
    rooms: RwLock<HashMap<String, Room>>,
}

#[async_trait]
impl RoomRepository for MemRoomRepository {
    async fn add_room(&self, id: &str, creator_user_id: &str, secret: Option<&str>) -> StoreResult<()> {
        let now = OffsetDateTime::now_utc();
        let mut rooms = self.rooms.write();
        rooms
            .entry(id.to_owned())
            .and_modify(|room| room.updated_at = room.updated_at.max(now))
            .or_insert_with(|| Room {
                id: id.to_owned(),
                creator_user_id: creator_user_id.to_owned(),
                created_at: now,
                updated_at: now,
                secret: secret.map(str::to_owned),
            });
        Ok(())
    }

    async fn get_room(&self, id: &str) -> StoreResult<Option<Room>> {
        Ok(self.rooms.read().get(id).cloned())
    }

    async fn refresh_room(&self, id: &str) -> StoreResult<()> {
        let now = OffsetDateTime::now_utc();
        if let Some(room) = self.rooms.write().get_mut(id) {
            room.updated_at = room.updated_at.max(now);
        }
        Ok(())
    }

    async fn delete_room(&self, id: &str) -> StoreResult<()> {
        self.rooms.write().remove(id);
        Ok(())
    }

    async fn clean_rooms(&self, ttl: Duration) -> StoreResult<usize> {
        let cutoff = OffsetDateTime::now_utc() - ttl;
        let mut rooms = self.rooms.write();
        let before = rooms.len();
        rooms.retain(|id, room| {
            let keep = room.updated_at >= cutoff;
            if !keep {
                tracing::debug!(room = %id, "evicting idle room");
            }
            keep
        });
        Ok(before - rooms.len())
    }
}

#[derive(Default)]
pub struct MemRefreshTokenRepository {
    tokens: RwLock<HashMap<String, RefreshToken>>,
}

#[async_trait]
impl RefreshTokenRepository for MemRefreshTokenRepository {
    async fn create(&self, token: &RefreshToken) -> StoreResult<()> {
        let mut tokens = self.tokens.write();
        if tokens.get(&token.token).is_some_and(RefreshToken::is_valid) {
            return Err(StoreError::TokenAlreadyExists);
        }
        tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn get_token(&self, token: &str) -> StoreResult<Option<RefreshToken>> {
        Ok(self.tokens.read().get(token).cloned())
    }

    async fn remove(&self, token: &str) -> StoreResult<()> {
        self.tokens.write().remove(token);
        Ok(())
    }

    async fn clean_expired(&self) -> StoreResult<usize> {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, token| {
            let keep = token.is_valid();
            if !keep {
                tracing::debug!(user_id = %token.user_id, "evicting expired refresh token");
            }
            keep
        });
        Ok(before - tokens.len())
    }
}

#[derive(Default)]
struct Users {
    by_id: HashMap<String, User>,
    by_name: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemUserRepository {
    users: RwLock<Users>,
}

#[async_trait]
impl UserRepository for MemUserRepository {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        let mut users = self.users.write();
        if users.by_id.contains_key(&user.id) {
            return Err(StoreError::UserAlreadyExists);
        }
        if !user.is_guest {
            if users.by_name.contains_key(&user.username) {
                return Err(StoreError::UserAlreadyExists);
            }
            users.by_name.insert(user.username.clone(), user.id.clone());
        }
        users.by_id.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.users.read().by_id.get(user_id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let users = self.users.read();
        Ok(users
            .by_name
            .get(username)
            .and_then(|id| users.by_id.get(id))
            .cloned())
    }

    async fn update_push_subscription(&self, user_id: &str, sub: &PushSubscription) -> StoreResult<()> {
        let mut users = self.users.write();
        let user = users.by_id.get_mut(user_id).ok_or(StoreError::UserNotFound)?;
        user.push_subscription = Some(sub.clone());
        Ok(())
    }

    async fn remove_push_subscription(&self, user_id: &str) -> StoreResult<()> {
        let mut users = self.users.write();
        let user = users.by_id.get_mut(user_id).ok_or(StoreError::UserNotFound)?;
        user.push_subscription = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PushKeys;

    fn backdate(repo: &MemRoomRepository, id: &str, by: Duration) {
        let mut rooms = repo.rooms.write();
        let room = rooms.get_mut(id).unwrap();
        room.updated_at = OffsetDateTime::now_utc() - by;
    }

    #[tokio::test]
    async fn missing_room_is_none() {
        let repo = MemRoomRepository::default();
        assert_eq!(repo.get_room("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn add_get_delete_room() {
        let repo = MemRoomRepository::default();
        repo.add_room("r1", "alice", Some("hunter2")).await.unwrap();

        let room = repo.get_room("r1").await.unwrap().unwrap();
        assert_eq!(room.creator_user_id, "alice");
        assert_eq!(room.secret.as_deref(), Some("hunter2"));

        repo.delete_room("r1").await.unwrap();
        assert!(repo.get_room("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn re_adding_keeps_the_creator() {
        let repo = MemRoomRepository::default();
        repo.add_room("r1", "alice", None).await.unwrap();
        repo.add_room("r1", "mallory", Some("x")).await.unwrap();

        let room = repo.get_room("r1").await.unwrap().unwrap();
        assert_eq!(room.creator_user_id, "alice");
        assert_eq!(room.secret, None);
    }

    #[tokio::test]
    async fn refresh_moves_activity_forward() {
        let repo = MemRoomRepository::default();
        repo.add_room("r1", "alice", None).await.unwrap();
        backdate(&repo, "r1", Duration::from_secs(600));
        let stale = repo.get_room("r1").await.unwrap().unwrap().updated_at;

        repo.refresh_room("r1").await.unwrap();
        let fresh = repo.get_room("r1").await.unwrap().unwrap().updated_at;
        assert!(fresh > stale);

        // unknown ids are ignored
        repo.refresh_room("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn clean_rooms_honours_ttl_boundary() {
        let ttl = Duration::from_secs(900);
        let repo = MemRoomRepository::default();
        repo.add_room("old", "alice", None).await.unwrap();
        repo.add_room("young", "bob", None).await.unwrap();
        backdate(&repo, "old", ttl + Duration::from_secs(1));
        backdate(&repo, "young", ttl - Duration::from_secs(1));

        assert_eq!(repo.clean_rooms(ttl).await.unwrap(), 1);
        assert!(repo.get_room("old").await.unwrap().is_none());
        assert!(repo.get_room("young").await.unwrap().is_some());
    }

    fn token(value: &str, expiry: OffsetDateTime) -> RefreshToken {
        RefreshToken { token: value.to_owned(), user_id: "alice".to_owned(), expiry }
    }

    #[tokio::test]
    async fn duplicate_valid_token_is_rejected() {
        let repo = MemRefreshTokenRepository::default();
        let later = OffsetDateTime::now_utc() + Duration::from_secs(3600);
        repo.create(&token("abc", later)).await.unwrap();

        let err = repo.create(&token("abc", later)).await.unwrap_err();
        assert!(matches!(err, StoreError::TokenAlreadyExists));
    }

    #[tokio::test]
    async fn expired_token_value_can_be_reused() {
        let repo = MemRefreshTokenRepository::default();
        let now = OffsetDateTime::now_utc();
        repo.create(&token("abc", now - Duration::from_secs(1))).await.unwrap();

        let renewed = token("abc", now + Duration::from_secs(3600));
        repo.create(&renewed).await.unwrap();
        assert_eq!(repo.get_token("abc").await.unwrap(), Some(renewed));
    }

    #[tokio::test]
    async fn clean_expired_drops_only_expired() {
        let repo = MemRefreshTokenRepository::default();
        let now = OffsetDateTime::now_utc();
        repo.create(&token("old", now - Duration::from_secs(5))).await.unwrap();
        repo.create(&token("new", now + Duration::from_secs(5))).await.unwrap();

        assert_eq!(repo.clean_expired().await.unwrap(), 1);
        assert!(repo.get_token("old").await.unwrap().is_none());
        assert!(repo.get_token("new").await.unwrap().is_some());

        repo.remove("new").await.unwrap();
        repo.remove("new").await.unwrap();
        assert!(repo.get_token("new").await.unwrap().is_none());
    }

    fn user(id: &str, name: &str, is_guest: bool) -> User {
        User {
            id: id.to_owned(),
            username: name.to_owned(),
            password_hash: (!is_guest).then(|| "$argon2id$stub".to_owned()),
            is_guest,
            created_at: OffsetDateTime::now_utc(),
            push_subscription: None,
        }
    }

    #[tokio::test]
    async fn usernames_are_unique_for_registered_users_only() {
        let repo = MemUserRepository::default();
        repo.create_user(&user("1", "alice", false)).await.unwrap();
        assert!(matches!(
            repo.create_user(&user("2", "alice", false)).await,
            Err(StoreError::UserAlreadyExists)
        ));

        repo.create_user(&user("3", "alice", true)).await.unwrap();
        repo.create_user(&user("4", "alice", true)).await.unwrap();
        assert_eq!(repo.get_user_by_username("alice").await.unwrap().unwrap().id, "1");
    }

    #[tokio::test]
    async fn push_subscription_lifecycle() {
        let repo = MemUserRepository::default();
        repo.create_user(&user("1", "alice", false)).await.unwrap();
        let sub = PushSubscription {
            endpoint: "https://push.example/abc".to_owned(),
            keys: PushKeys { p256dh: "p".to_owned(), auth: "a".to_owned() },
        };

        repo.update_push_subscription("1", &sub).await.unwrap();
        assert_eq!(repo.get_user("1").await.unwrap().unwrap().push_subscription, Some(sub.clone()));

        repo.remove_push_subscription("1").await.unwrap();
        assert_eq!(repo.get_user("1").await.unwrap().unwrap().push_subscription, None);

        assert!(matches!(
            repo.update_push_subscription("ghost", &sub).await,
            Err(StoreError::UserNotFound)
        ));
    }
}
