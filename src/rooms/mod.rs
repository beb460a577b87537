mod fetch;
mod invite;
mod join;
mod new;

use axum::{Router, routing::post};
use serde::Deserialize;

use crate::AppState;

/// Calls are tested with two participants.
pub const MAX_ROOM_USERS: usize = 2;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/rooms", post(new::new_room))
        .route("/api/rooms/{room_id}/join", post(join::join_room))
        .route("/api/rooms/{room_id}/invite", post(invite::invite_to_room))
        .route("/api/rooms/{room_id}/fetch", post(fetch::fetch_room))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RoomPassword {
    pub(crate) password: Option<String>,
}

impl RoomPassword {
    /// An empty password means none.
    pub(crate) fn into_secret(self) -> Option<String> {
        self.password.filter(|password| !password.is_empty())
    }
}
