use axum::{Json, body::Bytes, debug_handler, extract::State};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    AppError, AppResult, AppState, json_body,
    store::{StoreError, User, Users},
};

use super::{MIN_PASSWORD_LEN, RefreshTokens, SessionResponse, TokenService, hash_password, normalize_username, start_session};

#[derive(Deserialize)]
pub(crate) struct RegisterRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn register(
    State(users): State<Users>,
    State(tokens): State<TokenService>,
    State(refresh_tokens): State<RefreshTokens>,
    body: Bytes,
) -> AppResult<Json<SessionResponse>> {
    let RegisterRequest { username, password } = json_body(&body)?;
    let username = normalize_username(&username);

    if username.is_empty() || password.is_empty() {
        return Err(AppError::bad_request("username and password required"));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;
    let user = User {
        id: Uuid::new_v4().to_string(),
        username,
        password_hash: Some(password_hash),
        is_guest: false,
        created_at: OffsetDateTime::now_utc(),
        push_subscription: None,
    };

    match users.create_user(&user).await {
        Err(StoreError::UserAlreadyExists) => return Err(AppError::conflict("username already exists")),
        other => other?,
    }

    tracing::info!(username = %user.username, user_id = %user.id, "user registered");
    start_session(&tokens, &refresh_tokens, &user).await
}
