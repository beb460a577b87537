//! Short-lived TURN credentials in coturn's `use-auth-secret` format.

use std::sync::Arc;

use anyhow::anyhow;
use axum::{Json, Router, debug_handler, extract::State, routing::get};
use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha1::Sha1;
use time::OffsetDateTime;

use crate::{AppResult, AppState, Config, auth::Authed, config::TurnConfig};

type HmacSha1 = Hmac<Sha1>;

const DEFAULT_TURN_PORT: &str = "3478";

#[derive(Debug, Serialize)]
pub struct TurnCredentials {
    pub username: String,
    pub password: String,
    pub ttl: u64,
    pub uris: Vec<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/turn", get(turn).post(turn))
}

#[debug_handler(state = AppState)]
async fn turn(State(config): State<Arc<Config>>, Authed(claims): Authed) -> AppResult<Json<TurnCredentials>> {
    let creds = credentials(&config.turn, OffsetDateTime::now_utc())?;
    tracing::debug!(user_id = %claims.user_id, username = %creds.username, "turn credentials issued");
    Ok(Json(creds))
}

pub fn credentials(turn: &TurnConfig, now: OffsetDateTime) -> anyhow::Result<TurnCredentials> {
    let expiry = (now + turn.ttl).unix_timestamp();
    let username = format!("{expiry}:webrtc-user");

    let mut mac = HmacSha1::new_from_slice(turn.secret.as_bytes()).map_err(|_| anyhow!("HMAC key error"))?;
    mac.update(username.as_bytes());
    let password = STANDARD.encode(mac.finalize().into_bytes());

    let host = with_default_port(&turn.host);
    Ok(TurnCredentials {
        username,
        password,
        ttl: turn.ttl.as_secs(),
        uris: vec![
            format!("turn:{host}?transport=udp"),
            format!("turn:{host}?transport=tcp"),
            format!("stun:{host}"),
        ],
    })
}

fn with_default_port(host: &str) -> String {
    if host.contains(':') {
        host.to_owned()
    } else {
        format!("{host}:{DEFAULT_TURN_PORT}")
    }
}
