use std::{collections::HashMap, sync::Arc};

use axum::extract::ws::Message;
use parking_lot::RwLock;

use super::{Client, RelayScope};

/// Live clients keyed by user id.
#[derive(Default)]
pub struct Connections {
    clients: RwLock<HashMap<String, Arc<Client>>>,
    scope: RelayScope,
}

impl Connections {
    pub fn new(scope: RelayScope) -> Self {
        Self { clients: RwLock::default(), scope }
    }

    /// Registers `client`, replacing any connection of the same user. The
    /// replaced one is returned untouched; it just stops receiving.
    pub fn add(&self, client: Arc<Client>) -> Option<Arc<Client>> {
        let replaced = self.clients.write().insert(client.user_id().to_owned(), client.clone());
        tracing::info!(
            user_id = client.user_id(),
            username = client.username(),
            replaced = replaced.is_some(),
            "client registered"
        );
        replaced
    }

    /// Unregisters `client` and closes it. A newer connection registered
    /// under the same user id stays in place.
    pub fn remove(&self, client: &Arc<Client>) -> bool {
        let removed = {
            let mut clients = self.clients.write();
            match clients.get(client.user_id()) {
                Some(current) if Arc::ptr_eq(current, client) => clients.remove(client.user_id()).is_some(),
                _ => false,
            }
        };
        client.close();

        if removed {
            tracing::info!(user_id = client.user_id(), "client unregistered");
        }
        removed
    }

    /// Queues `msg` on every client the sender can reach except the sender's
    /// own user, returning how many accepted it.
    pub fn broadcast_except(&self, sender: &Client, msg: Message) -> usize {
        // registry lock is released before any client lock is taken
        let recipients: Vec<Arc<Client>> = self
            .clients
            .read()
            .values()
            .filter(|client| client.user_id() != sender.user_id())
            .filter(|client| self.reaches(sender.room_id(), client))
            .cloned()
            .collect();

        recipients
            .iter()
            .filter(|client| client.send(msg.clone()))
            .count()
    }

    /// User ids a message sent from `room` would reach.
    pub fn peers(&self, room: &str) -> Vec<String> {
        self.clients
            .read()
            .values()
            .filter(|client| self.reaches(Some(room), client))
            .map(|client| client.user_id().to_owned())
            .collect()
    }

    fn reaches(&self, room: Option<&str>, client: &Client) -> bool {
        match self.scope {
            RelayScope::Global => true,
            RelayScope::Room => client.room_id() == room,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_in(&self, room: &str) -> usize {
        self.clients
            .read()
            .values()
            .filter(|client| client.room_id() == Some(room))
            .count()
    }

    /// Participants counted against `room`'s capacity.
    pub fn occupancy(&self, room: &str) -> usize {
        match self.scope {
            RelayScope::Global => self.len(),
            RelayScope::Room => self.count_in(room),
        }
    }
}
