use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    debug_handler,
    extract::{Path, State},
};
use serde::Serialize;

use crate::{
    AppError, AppResult, AppState,
    auth::{Authed, TokenService},
    json_or_default,
    push::{PushError, PushService},
    signal::Connections,
    store::Rooms,
};

use super::{MAX_ROOM_USERS, RoomPassword};

#[derive(Serialize)]
pub(crate) struct JoinResponse {
    jwt: String,
}

/// Re-issues the caller's session token scoped to the room and keeps the
/// room alive. Whoever is already there hears about it by push.
#[debug_handler(state = AppState)]
pub(crate) async fn join_room(
    Path(room_id): Path<String>,
    State(rooms): State<Rooms>,
    State(tokens): State<TokenService>,
    State(connections): State<Arc<Connections>>,
    State(push): State<PushService>,
    Authed(claims): Authed,
    body: Bytes,
) -> AppResult<Json<JoinResponse>> {
    let password = json_or_default::<RoomPassword>(&body)?.into_secret();

    let Some(room) = rooms.get_room(&room_id).await? else {
        return Err(AppError::not_found(format!("room not found {room_id}")));
    };
    if room.secret.is_some() && room.secret != password {
        return Err(AppError::unauthorized("wrong room password"));
    }
    if connections.occupancy(&room_id) >= MAX_ROOM_USERS {
        return Err(AppError::not_acceptable("room already full"));
    }

    let jwt = tokens.issue(&claims.user_id, &claims.username, Some(&room_id))?;
    rooms.refresh_room(&room_id).await?;

    if room.creator_user_id != claims.user_id {
        let peers = connections.peers(&room_id);
        let recipients = if peers.is_empty() {
            vec![room.creator_user_id]
        } else {
            peers.into_iter().filter(|user_id| *user_id != claims.user_id).collect()
        };
        announce_join(push, recipients, claims.username.clone(), room_id.clone());
    }

    tracing::info!(username = %claims.username, user_id = %claims.user_id, room_id = %room_id, "joined room");
    Ok(Json(JoinResponse { jwt }))
}

/// Notifies `recipients` in the background; the join never waits on it.
fn announce_join(push: PushService, recipients: Vec<String>, joiner: String, room_id: String) {
    if recipients.is_empty() {
        return;
    }

    tokio::spawn(async move {
        for user_id in recipients {
            match push.notify_user_joined(&user_id, &joiner, &room_id).await {
                Ok(()) | Err(PushError::UserNotFound | PushError::NoSubscription) => {}
                Err(err) => tracing::warn!(user_id = %user_id, error = %err, "join notification failed"),
            }
        }
    });
}
