//! Background sweeps for idle rooms and expired refresh tokens.

use std::time::Duration;

use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::store::{RefreshTokenRepository, RefreshTokenStore, RoomRepository, Rooms};

/// Deletes rooms idle for longer than `ttl`. Backend errors are logged and
/// count as nothing swept.
pub async fn sweep_rooms(rooms: &dyn RoomRepository, ttl: Duration) -> usize {
    match rooms.clean_rooms(ttl).await {
        Ok(evicted) => {
            tracing::info!(evicted, "room clean up finished");
            evicted
        }
        Err(err) => {
            tracing::error!(error = %err, "room clean up failed");
            0
        }
    }
}

pub async fn sweep_tokens(tokens: &dyn RefreshTokenRepository) -> usize {
    match tokens.clean_expired().await {
        Ok(evicted) => {
            tracing::info!(evicted, "refresh token clean up finished");
            evicted
        }
        Err(err) => {
            tracing::error!(error = %err, "refresh token clean up failed");
            0
        }
    }
}

pub fn spawn_room_reaper(
    rooms: Rooms,
    ttl: Duration,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        every_tick(every, shutdown, "room reaper", || {
            let rooms = rooms.clone();
            async move {
                sweep_rooms(rooms.as_ref(), ttl).await;
            }
        })
        .await
    })
}

pub fn spawn_token_reaper(tokens: RefreshTokenStore, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        every_tick(every, shutdown, "token reaper", || {
            let tokens = tokens.clone();
            async move {
                sweep_tokens(tokens.as_ref()).await;
            }
        })
        .await
    })
}

async fn every_tick<F, Fut>(every: Duration, shutdown: CancellationToken, name: &str, mut sweep: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::debug!(name, "shutting down");
                break;
            }
            _ = interval.tick() => {
                tracing::debug!(name, "dispatched clean up task");
                sweep().await;
            }
        }
    }
}
