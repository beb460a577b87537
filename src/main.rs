use callroom::{AppState, Config, app, reaper, store::Storage};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("callroom=debug,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;
    let storage = Storage::open(&config.storage).await?;
    let shutdown = CancellationToken::new();

    let room_reaper = reaper::spawn_room_reaper(
        storage.rooms.clone(),
        config.room.ttl,
        config.room.clean_interval,
        shutdown.clone(),
    );
    let token_reaper = reaper::spawn_token_reaper(
        storage.refresh_tokens.clone(),
        config.refresh_token.clean_interval,
        shutdown.clone(),
    );

    let addr = config.addr.clone();
    tracing::info!(
        addr = %addr,
        storage = ?config.storage.kind,
        relay_scope = ?config.relay_scope,
        "callroom starting"
    );

    let app = app(AppState::new(config, storage, shutdown.clone()));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("shutdown requested");
            shutdown.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    let _ = room_reaper.await;
    let _ = token_reaper.await;
    tracing::info!("callroom stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
