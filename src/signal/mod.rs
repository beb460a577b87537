//! Live signaling: one [`Client`] per accepted socket, a shared
//! [`Connections`] registry, and the relay that fans every inbound payload
//! out to the other registered clients.

mod client;
mod handshake;
mod publisher;
mod registry;

use std::str::FromStr;

use axum::{Router, routing::get};

pub use client::{BUFFER_SIZE, Client};
pub use handshake::{run, signal};
pub use registry::Connections;

use crate::AppState;

/// Which registered clients a relayed message, and a room's capacity check,
/// take into account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelayScope {
    /// Every connected user, whatever room their token names.
    #[default]
    Global,
    /// Only users whose token names the same room.
    Room,
}

impl FromStr for RelayScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(RelayScope::Global),
            "room" => Ok(RelayScope::Room),
            other => Err(format!("unknown relay scope {other:?}")),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/signal", get(signal))
}
