use axum::{Json, body::Bytes, debug_handler, extract::State};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    AppResult, AppState,
    auth::{Authed, TokenService},
    json_or_default,
    store::Rooms,
};

use super::RoomPassword;

#[derive(Serialize)]
pub(crate) struct NewRoomResponse {
    room_id: String,
    jwt: String,
    join_url: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_room(
    State(rooms): State<Rooms>,
    State(tokens): State<TokenService>,
    Authed(claims): Authed,
    body: Bytes,
) -> AppResult<Json<NewRoomResponse>> {
    let secret = json_or_default::<RoomPassword>(&body)?.into_secret();
    let room_id = Uuid::new_v4().simple().to_string();

    rooms.add_room(&room_id, &claims.user_id, secret.as_deref()).await?;
    let jwt = tokens.issue(&claims.user_id, &claims.username, Some(&room_id))?;

    tracing::info!(
        username = %claims.username,
        user_id = %claims.user_id,
        room_id = %room_id,
        protected = secret.is_some(),
        "room created"
    );

    Ok(Json(NewRoomResponse {
        join_url: format!("/join/{room_id}"),
        room_id,
        jwt,
    }))
}
