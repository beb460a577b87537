use axum::{Json, body::Bytes, debug_handler, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult, AppState, json_body, store::Users};

use super::{RefreshCheck, RefreshTokens, TokenService};

#[derive(Deserialize)]
pub(crate) struct RefreshRequest {
    #[serde(default)]
    token: String,
    room_id: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct RefreshResponse {
    jwt: String,
    user_id: String,
    username: String,
}

/// Exchanges a refresh token for a session token, optionally scoped to a room.
#[debug_handler(state = AppState)]
pub(crate) async fn refresh(
    State(users): State<Users>,
    State(tokens): State<TokenService>,
    State(refresh_tokens): State<RefreshTokens>,
    body: Bytes,
) -> AppResult<Json<RefreshResponse>> {
    let RefreshRequest { token, room_id } = json_body(&body)?;

    let owner = match refresh_tokens.validate(&token).await? {
        RefreshCheck::Valid(found) => found.user_id,
        RefreshCheck::Expired(_) | RefreshCheck::Unknown => {
            return Err(AppError::unauthorized("invalid refresh token"));
        }
    };
    let Some(user) = users.get_user(&owner).await? else {
        return Err(AppError::unauthorized("invalid refresh token"));
    };

    let jwt = tokens.issue(&user.id, &user.username, room_id.as_deref())?;
    tracing::info!(username = %user.username, room = ?room_id, "session token issued from refresh token");

    Ok(Json(RefreshResponse { jwt, user_id: user.id, username: user.username }))
}

#[derive(Deserialize)]
pub(crate) struct RevokeRequest {
    #[serde(default)]
    token: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn revoke(
    State(refresh_tokens): State<RefreshTokens>,
    body: Bytes,
) -> AppResult<StatusCode> {
    let RevokeRequest { token } = json_body(&body)?;
    refresh_tokens.revoke(&token).await?;

    tracing::info!("refresh token revoked");
    Ok(StatusCode::OK)
}
