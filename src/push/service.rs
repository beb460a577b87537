use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::store::{PushSubscription, StoreError, Users};

const ICON: &str = "/logo192.png";

/// What a push notification shows and carries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: &'static str,
    pub data: Value,
}

impl Notification {
    pub fn room_invite(inviter_user_id: &str, inviter_name: &str, room_id: &str) -> Self {
        Self {
            title: "Video Call Invitation".to_owned(),
            body: format!("{inviter_name} invites you to a video call"),
            icon: ICON,
            data: json!({
                "type": "room_invite",
                "roomId": room_id,
                "inviterUserId": inviter_user_id,
                "inviterName": inviter_name,
            }),
        }
    }

    pub fn user_joined(joiner_name: &str, room_id: &str) -> Self {
        Self {
            title: "Someone joined your room".to_owned(),
            body: format!("{joiner_name} has joined the video call"),
            icon: ICON,
            data: json!({
                "type": "user_joined",
                "roomId": room_id,
                "joinerName": joiner_name,
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The push service no longer knows the subscription.
    #[error("subscription is gone")]
    Gone,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Hands a notification to the push transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, subscription: &PushSubscription, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Writes notifications to the log instead of a push service.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, subscription: &PushSubscription, notification: &Notification) -> Result<(), DeliveryError> {
        let payload = serde_json::to_string(notification).map_err(anyhow::Error::from)?;
        tracing::info!(endpoint = %subscription.endpoint, payload = %payload, "push notification");
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("user not found")]
    UserNotFound,
    #[error("user has no push subscription")]
    NoSubscription,
    #[error("push subscription expired")]
    Gone,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("push delivery failed: {0}")]
    Delivery(anyhow::Error),
}

/// Addresses notifications to users through their stored subscription.
#[derive(Clone)]
pub struct PushService {
    users: Users,
    notifier: Arc<dyn Notifier>,
}

impl PushService {
    pub fn new(users: Users, notifier: Arc<dyn Notifier>) -> Self {
        Self { users, notifier }
    }

    pub async fn notify_room_invite(
        &self,
        inviter_user_id: &str,
        inviter_name: &str,
        invited_user_id: &str,
        room_id: &str,
    ) -> Result<(), PushError> {
        let notification = Notification::room_invite(inviter_user_id, inviter_name, room_id);
        self.send(invited_user_id, &notification).await
    }

    pub async fn notify_user_joined(&self, user_id: &str, joiner_name: &str, room_id: &str) -> Result<(), PushError> {
        self.send(user_id, &Notification::user_joined(joiner_name, room_id)).await
    }

    /// A subscription the push service reports gone is dropped from the user.
    pub async fn send(&self, user_id: &str, notification: &Notification) -> Result<(), PushError> {
        let user = self.users.get_user(user_id).await?.ok_or(PushError::UserNotFound)?;
        let Some(subscription) = user.push_subscription.as_ref() else {
            return Err(PushError::NoSubscription);
        };

        match self.notifier.deliver(subscription, notification).await {
            Ok(()) => {
                tracing::info!(username = %user.username, user_id = %user.id, "push notification sent");
                Ok(())
            }
            Err(DeliveryError::Gone) => {
                tracing::warn!(username = %user.username, user_id = %user.id, "push subscription gone");
                if let Err(err) = self.users.remove_push_subscription(user_id).await {
                    tracing::error!(user_id = %user.id, error = %err, "cannot drop push subscription");
                }
                Err(PushError::Gone)
            }
            Err(DeliveryError::Failed(err)) => Err(PushError::Delivery(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use time::OffsetDateTime;

    use super::*;
    use crate::store::{MemUserRepository, PushKeys, User, UserRepository};

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(String, Notification)>>,
        gone: bool,
    }

    #[async_trait]
    impl Notifier for Outbox {
        async fn deliver(&self, subscription: &PushSubscription, notification: &Notification) -> Result<(), DeliveryError> {
            if self.gone {
                return Err(DeliveryError::Gone);
            }
            self.sent.lock().push((subscription.endpoint.clone(), notification.clone()));
            Ok(())
        }
    }

    async fn users() -> Users {
        let users: Users = Arc::new(MemUserRepository::default());
        for (id, subscribed) in [("u1", true), ("u2", false)] {
            let user = User {
                id: id.to_owned(),
                username: id.to_owned(),
                password_hash: None,
                is_guest: false,
                created_at: OffsetDateTime::now_utc(),
                push_subscription: None,
            };
            users.create_user(&user).await.unwrap();
            if subscribed {
                let sub = PushSubscription {
                    endpoint: format!("https://push.example/{id}"),
                    keys: PushKeys { p256dh: "p".to_owned(), auth: "a".to_owned() },
                };
                users.update_push_subscription(id, &sub).await.unwrap();
            }
        }
        users
    }

    #[test]
    fn invite_payload() {
        let notification = Notification::room_invite("u9", "alice", "r1");
        assert_eq!(notification.body, "alice invites you to a video call");
        assert_eq!(
            serde_json::to_value(&notification).unwrap()["data"],
            json!({"type": "room_invite", "roomId": "r1", "inviterUserId": "u9", "inviterName": "alice"})
        );
    }

    #[tokio::test]
    async fn delivers_to_the_stored_endpoint() {
        let outbox = Arc::new(Outbox::default());
        let push = PushService::new(users().await, outbox.clone());

        push.notify_user_joined("u1", "bob", "r1").await.unwrap();

        let sent = outbox.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "https://push.example/u1");
        assert_eq!(sent[0].1, Notification::user_joined("bob", "r1"));
    }

    #[tokio::test]
    async fn unknown_or_unsubscribed_users_are_errors() {
        let outbox = Arc::new(Outbox::default());
        let push = PushService::new(users().await, outbox.clone());

        assert!(matches!(push.notify_user_joined("nobody", "bob", "r1").await, Err(PushError::UserNotFound)));
        assert!(matches!(push.notify_user_joined("u2", "bob", "r1").await, Err(PushError::NoSubscription)));
        assert!(outbox.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn gone_subscription_is_dropped() {
        let users = users().await;
        let push = PushService::new(users.clone(), Arc::new(Outbox { gone: true, ..Outbox::default() }));

        assert!(matches!(push.notify_room_invite("u2", "bob", "u1", "r1").await, Err(PushError::Gone)));
        assert!(users.get_user("u1").await.unwrap().unwrap().push_subscription.is_none());
    }
}
