//! Web Push: subscription bookkeeping and the [`PushService`] that addresses
//! invites and join notices to a user's stored subscription.

mod service;

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    debug_handler,
    extract::State,
    routing::{get, post},
};
use serde::Serialize;

pub use service::{DeliveryError, LogNotifier, Notification, Notifier, PushError, PushService};

use crate::{
    AppError, AppResult, AppState, Config,
    auth::Authed,
    json_body,
    store::{PushSubscription, StoreError, Users},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/push/subscribe", post(subscribe))
        .route("/api/push/unsubscribe", post(unsubscribe))
        .route("/api/push/vapid-public-key", get(vapid_public_key))
}

#[derive(Serialize)]
struct Status {
    status: &'static str,
}

#[debug_handler(state = AppState)]
async fn subscribe(State(users): State<Users>, Authed(claims): Authed, body: Bytes) -> AppResult<Json<Status>> {
    let sub: PushSubscription = json_body(&body)?;
    if sub.endpoint.is_empty() {
        return Err(AppError::bad_request("endpoint required"));
    }

    match users.update_push_subscription(&claims.user_id, &sub).await {
        Err(StoreError::UserNotFound) => return Err(AppError::not_found("user not found")),
        other => other?,
    }

    tracing::info!(username = %claims.username, user_id = %claims.user_id, "push subscription saved");
    Ok(Json(Status { status: "subscribed" }))
}

#[debug_handler(state = AppState)]
async fn unsubscribe(State(users): State<Users>, Authed(claims): Authed) -> AppResult<Json<Status>> {
    match users.remove_push_subscription(&claims.user_id).await {
        Err(StoreError::UserNotFound) => return Err(AppError::not_found("user not found")),
        other => other?,
    }

    tracing::info!(username = %claims.username, user_id = %claims.user_id, "push subscription removed");
    Ok(Json(Status { status: "unsubscribed" }))
}

#[derive(Serialize)]
struct VapidKey {
    #[serde(rename = "publicKey")]
    public_key: String,
}

#[debug_handler(state = AppState)]
async fn vapid_public_key(State(config): State<Arc<Config>>) -> Json<VapidKey> {
    Json(VapidKey { public_key: config.vapid_public_key.clone() })
}
