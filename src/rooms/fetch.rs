use axum::{
    Json, debug_handler,
    extract::{Path, State},
};
use serde::Serialize;

use crate::{AppError, AppResult, AppState, store::Rooms};

#[derive(Serialize)]
pub(crate) struct FetchResponse {
    exists: &'static str,
    is_protected: &'static str,
}

#[debug_handler(state = AppState)]
pub(crate) async fn fetch_room(
    Path(room_id): Path<String>,
    State(rooms): State<Rooms>,
) -> AppResult<Json<FetchResponse>> {
    let Some(room) = rooms.get_room(&room_id).await? else {
        return Err(AppError::not_found(format!("room not found {room_id}")));
    };

    Ok(Json(FetchResponse {
        exists: "true",
        is_protected: if room.secret.is_some() { "1" } else { "0" },
    }))
}
