mod jwt;
mod login;
mod password;
mod refresh;
mod register;
mod session;

use axum::{
    Json, Router,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
    routing::post,
};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;

pub use jwt::{Claims, TokenService};
pub use password::{MIN_PASSWORD_LEN, hash_password, verify_password};
pub use refresh::{RefreshCheck, RefreshTokens};

use crate::{AppError, AppResult, AppState, store::User};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register::register))
        .route("/api/auth/login", post(login::login))
        .route("/api/auth/guest", post(login::guest))
        .route("/api/auth/refresh", post(session::refresh))
        .route("/api/auth/revoke", post(session::revoke))
}

/// Claims of a valid `Authorization: Bearer` session token.
pub struct Authed(pub Claims);

impl<S> FromRequestParts<S> for Authed
where
    TokenService: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(jwt) = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
        else {
            return Err(AppError::unauthorized("missing bearer token"));
        };

        TokenService::from_ref(state)
            .claims(jwt.trim())
            .map(Authed)
            .map_err(|_| AppError::unauthorized("invalid jwt"))
    }
}

pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    /// Refresh token.
    pub token: String,
    /// RFC 3339 expiry of the refresh token.
    pub expires: String,
    pub jwt: String,
    pub user_id: String,
    pub username: String,
}

/// Issues a fresh refresh token and an unscoped session token for `user`.
pub(crate) async fn start_session(
    tokens: &TokenService,
    refresh_tokens: &RefreshTokens,
    user: &User,
) -> AppResult<Json<SessionResponse>> {
    let refresh = refresh_tokens.generate(&user.id).await?;
    let jwt = tokens.issue(&user.id, &user.username, None)?;

    Ok(Json(SessionResponse {
        token: refresh.token,
        expires: refresh.expiry.format(&Rfc3339)?,
        jwt,
        user_id: user.id.clone(),
        username: user.username.clone(),
    }))
}
