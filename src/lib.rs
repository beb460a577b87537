pub mod appresult;
pub mod auth;
pub mod config;
pub mod db;
pub mod push;
pub mod reaper;
pub mod rooms;
pub mod signal;
pub mod store;
pub mod turn;

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::FromRef,
    http::{HeaderValue, Method, header},
    routing::get,
};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

pub use appresult::{AppError, AppResult};
pub use config::Config;

use auth::{RefreshTokens, TokenService};
use push::{LogNotifier, Notifier, PushService};
use signal::Connections;
use store::{Rooms, Storage, Users};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tokens: TokenService,
    pub refresh_tokens: RefreshTokens,
    pub rooms: Rooms,
    pub users: Users,
    pub push: PushService,
    pub connections: Arc<Connections>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, storage: Storage, shutdown: CancellationToken) -> Self {
        let tokens = TokenService::new(&config.jwt.secret, config.jwt.ttl, config.jwt.issuer.clone());
        let refresh_tokens = RefreshTokens::new(storage.refresh_tokens, config.refresh_token.ttl);
        let connections = Arc::new(Connections::new(config.relay_scope));
        let push = PushService::new(storage.users.clone(), Arc::new(LogNotifier));

        Self {
            config: Arc::new(config),
            tokens,
            refresh_tokens,
            rooms: storage.rooms,
            users: storage.users,
            push,
            connections,
            shutdown,
        }
    }

    /// Swaps the push transport notifications are handed to.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.push = PushService::new(self.users.clone(), notifier);
        self
    }
}

pub fn app(state: AppState) -> Router {
    let cors = cors(&state.config.allowed_origins);

    Router::new()
        .route("/health", get(health))
        .merge(auth::router())
        .merge(rooms::router())
        .merge(push::router())
        .merge(turn::router())
        .merge(signal::router())
        .with_state(state)
        .layer(cors)
}

async fn health() -> &'static str {
    "OK"
}

fn cors(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring unparsable allowed origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Parses a JSON request body, answering 400 when it does not fit `T`.
pub(crate) fn json_body<T: DeserializeOwned>(body: &Bytes) -> AppResult<T> {
    serde_json::from_slice(body).map_err(|err| AppError::bad_request(format!("invalid request: {err}")))
}

/// Like [`json_body`], but an empty body yields `T::default()`.
pub(crate) fn json_or_default<T: DeserializeOwned + Default>(body: &Bytes) -> AppResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    json_body(body)
}
