use std::{fmt::Display, sync::Arc};

use axum::{
    debug_handler,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use futures_util::{Sink, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    AppState,
    appresult::{AppError, AppResult},
    auth::TokenService,
    store::Rooms,
};

use super::{BUFFER_SIZE, Client, Connections};

#[derive(Deserialize)]
pub struct SignalQuery {
    jwt: Option<String>,
}

#[debug_handler(state = AppState)]
pub async fn signal(
    Query(SignalQuery { jwt }): Query<SignalQuery>,
    State(tokens): State<TokenService>,
    State(rooms): State<Rooms>,
    State(connections): State<Arc<Connections>>,
    State(shutdown): State<CancellationToken>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    let Some(jwt) = jwt.filter(|jwt| !jwt.is_empty()) else {
        return Err(AppError::unauthorized("missing token"));
    };
    let claims = tokens.claims(&jwt).map_err(|err| {
        tracing::debug!(error = %err, "rejected signaling token");
        AppError::unauthorized("invalid token")
    })?;

    let Some(room_id) = claims.room.clone() else {
        return Err(AppError::not_found("token names no room"));
    };
    if rooms.get_room(&room_id).await?.is_none() {
        return Err(AppError::not_found("room not found"));
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let response = ws
        .on_failed_upgrade(|err| tracing::warn!(error = %err, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let (client, queue) =
                Client::new(claims.user_id, claims.username, Some(room_id), shutdown.child_token());
            connections.add(client.clone());

            let (sink, stream) = socket.split();
            run(connections, client, queue, sink, stream, shutdown).await;
        });
    Ok(response)
}

/// Drives one registered client: read pump, write pump and publisher run
/// side by side until the publisher reports done or the writer gives up,
/// then the client is unregistered.
pub async fn run<W, S, E>(
    connections: Arc<Connections>,
    client: Arc<Client>,
    queue: mpsc::Receiver<Message>,
    sink: W,
    stream: S,
    shutdown: CancellationToken,
) where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display,
    S: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let (read_tx, read_rx) = mpsc::channel(BUFFER_SIZE);
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn({
        let client = client.clone();
        async move { client.read_pump(stream, read_tx).await }
    });
    let mut writer = tokio::spawn({
        let client = client.clone();
        async move { client.write_pump(sink, queue).await }
    });
    tokio::spawn({
        let connections = connections.clone();
        let client = client.clone();
        async move { connections.publish(&client, read_rx, shutdown, done_tx).await }
    });

    tokio::select! {
        _ = done_rx => {}
        _ = &mut writer => {}
    }

    connections.remove(&client);
}

#[cfg(test)]
mod tests {
    use std::{convert::Infallible, time::Duration};

    use axum::body::Bytes;
    use futures::{FutureExt, channel::mpsc as fmpsc};
    use tokio::{task::JoinHandle, time::timeout};

    use super::*;

    struct Peer {
        inbound: fmpsc::UnboundedSender<Result<Message, Infallible>>,
        outbound: fmpsc::UnboundedReceiver<Message>,
        session: JoinHandle<()>,
    }

    fn connect(connections: &Arc<Connections>, user_id: &str, shutdown: &CancellationToken) -> Peer {
        let (client, queue) =
            Client::new(user_id, user_id, Some("room".to_owned()), shutdown.child_token());
        connections.add(client.clone());

        let (inbound, stream) = fmpsc::unbounded();
        let (sink, outbound) = fmpsc::unbounded();
        let session = tokio::spawn(run(connections.clone(), client, queue, sink, stream, shutdown.clone()));
        Peer { inbound, outbound, session }
    }

    #[tokio::test]
    async fn offer_reaches_the_peer_and_not_the_sender() {
        let connections = Arc::new(Connections::default());
        let shutdown = CancellationToken::new();
        let x = connect(&connections, "x", &shutdown);
        let mut y = connect(&connections, "y", &shutdown);

        x.inbound.unbounded_send(Ok(Message::Text("offer123".into()))).unwrap();
        let got = timeout(Duration::from_secs(5), y.outbound.next()).await.unwrap();
        assert!(matches!(got, Some(Message::Text(text)) if text.as_str() == "offer123"));

        x.inbound.unbounded_send(Ok(Message::Close(None))).unwrap();
        timeout(Duration::from_secs(5), x.session).await.unwrap().unwrap();

        let x_frames: Vec<Message> = timeout(Duration::from_secs(5), x.outbound.collect()).await.unwrap();
        assert_eq!(x_frames.len(), 1);
        assert!(matches!(x_frames[0], Message::Close(None)));

        assert_eq!(connections.peers("room"), vec!["y".to_owned()]);
        assert!(y.outbound.next().now_or_never().is_none());
    }

    #[tokio::test]
    async fn binary_offer_arrives_as_binary() {
        let connections = Arc::new(Connections::default());
        let shutdown = CancellationToken::new();
        let x = connect(&connections, "x", &shutdown);
        let mut y = connect(&connections, "y", &shutdown);

        let offer = Bytes::from_static(b"offer123");
        x.inbound.unbounded_send(Ok(Message::Binary(offer.clone()))).unwrap();
        let got = timeout(Duration::from_secs(5), y.outbound.next()).await.unwrap();
        assert_eq!(got, Some(Message::Binary(offer)));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn stalled_peer_does_not_hold_up_the_sender() {
        let connections = Arc::new(Connections::default());
        let shutdown = CancellationToken::new();
        let x = connect(&connections, "x", &shutdown);
        let mut z = connect(&connections, "z", &shutdown);

        // y is registered but nothing ever drains its queue
        let (y, y_queue) = Client::new("y", "y", Some("room".to_owned()), shutdown.child_token());
        connections.add(y);

        for i in 0..BUFFER_SIZE + 64 {
            x.inbound.unbounded_send(Ok(Message::Text(i.to_string().into()))).unwrap();
            let got = timeout(Duration::from_secs(5), z.outbound.next()).await.unwrap();
            assert_eq!(got, Some(Message::Text(i.to_string().into())));
        }

        assert_eq!(y_queue.len(), BUFFER_SIZE);
        assert!(!x.session.is_finished());
        let mut peers = connections.peers("room");
        peers.sort();
        assert_eq!(peers, vec!["x", "y", "z"]);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn shutdown_unregisters_every_client() {
        let connections = Arc::new(Connections::default());
        let shutdown = CancellationToken::new();
        let x = connect(&connections, "x", &shutdown);
        let y = connect(&connections, "y", &shutdown);
        assert_eq!(connections.len(), 2);

        shutdown.cancel();
        timeout(Duration::from_secs(5), x.session).await.unwrap().unwrap();
        timeout(Duration::from_secs(5), y.session).await.unwrap().unwrap();
        assert!(connections.is_empty());
    }
}
