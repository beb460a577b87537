use axum::{
    Json,
    body::Bytes,
    debug_handler,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

use crate::{
    AppError, AppResult, AppState,
    auth::{Authed, normalize_username},
    json_body,
    push::PushService,
    store::{Rooms, Users},
};

#[derive(Deserialize)]
pub(crate) struct InviteRequest {
    #[serde(default)]
    invited_username: String,
}

#[derive(Serialize)]
pub(crate) struct InviteResponse {
    status: &'static str,
}

/// Sends a registered user a push invitation to the room.
#[debug_handler(state = AppState)]
pub(crate) async fn invite_to_room(
    Path(room_id): Path<String>,
    State(rooms): State<Rooms>,
    State(users): State<Users>,
    State(push): State<PushService>,
    Authed(claims): Authed,
    body: Bytes,
) -> AppResult<Json<InviteResponse>> {
    let InviteRequest { invited_username } = json_body(&body)?;
    let invited_username = normalize_username(&invited_username);
    if invited_username.is_empty() {
        return Err(AppError::bad_request("invited_username required"));
    }

    if rooms.get_room(&room_id).await?.is_none() {
        return Err(AppError::not_found("room not found"));
    }
    let Some(invited) = users.get_user_by_username(&invited_username).await? else {
        return Err(AppError::not_found("user not found"));
    };
    if invited.push_subscription.is_none() {
        return Err(AppError::bad_request("user has no push subscription"));
    }

    push.notify_room_invite(&claims.user_id, &claims.username, &invited.id, &room_id)
        .await?;

    tracing::info!(from = %claims.username, to = %invited.username, room_id = %room_id, "invite sent");
    Ok(Json(InviteResponse { status: "invited" }))
}
