use axum::{Json, body::Bytes, debug_handler, extract::State};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    AppError, AppResult, AppState, json_body,
    store::{User, Users},
};

use super::{RefreshTokens, SessionResponse, TokenService, normalize_username, start_session, verify_password};

#[derive(Deserialize)]
pub(crate) struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn login(
    State(users): State<Users>,
    State(tokens): State<TokenService>,
    State(refresh_tokens): State<RefreshTokens>,
    body: Bytes,
) -> AppResult<Json<SessionResponse>> {
    let LoginRequest { username, password } = json_body(&body)?;
    let invalid = || AppError::unauthorized("invalid credentials");

    let Some(user) = users.get_user_by_username(&normalize_username(&username)).await? else {
        return Err(invalid());
    };
    let Some(hash) = user.password_hash.clone() else {
        return Err(invalid());
    };
    if !tokio::task::spawn_blocking(move || verify_password(&hash, &password)).await? {
        return Err(invalid());
    }

    tracing::info!(username = %user.username, user_id = %user.id, "user logged in");
    start_session(&tokens, &refresh_tokens, &user).await
}

#[derive(Deserialize)]
pub(crate) struct GuestRequest {
    #[serde(default)]
    username: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn guest(
    State(users): State<Users>,
    State(tokens): State<TokenService>,
    State(refresh_tokens): State<RefreshTokens>,
    body: Bytes,
) -> AppResult<Json<SessionResponse>> {
    let GuestRequest { username } = json_body(&body)?;
    let username = username.trim();
    if username.is_empty() {
        return Err(AppError::bad_request("username required"));
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.to_owned(),
        password_hash: None,
        is_guest: true,
        created_at: OffsetDateTime::now_utc(),
        push_subscription: None,
    };
    users.create_user(&user).await?;

    tracing::info!(username = %user.username, user_id = %user.id, "guest created");
    start_session(&tokens, &refresh_tokens, &user).await
}
