use std::{
    fmt::Display,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Capacity of every client's outbound queue.
pub const BUFFER_SIZE: usize = 256;

/// One accepted signaling socket.
pub struct Client {
    user_id: String,
    username: String,
    room_id: Option<String>,
    /// Taken on close, which ends the write pump once the queue drains.
    outbound: RwLock<Option<mpsc::Sender<Message>>>,
    closed: AtomicBool,
    socket: CancellationToken,
}

impl Client {
    /// `socket` is cancelled when the client closes; pass a child of the
    /// server's shutdown token.
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        room_id: Option<String>,
        socket: CancellationToken,
    ) -> (Arc<Client>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(BUFFER_SIZE);
        let client = Client {
            user_id: user_id.into(),
            username: username.into(),
            room_id,
            outbound: RwLock::new(Some(tx)),
            closed: AtomicBool::new(false),
            socket,
        };
        (Arc::new(client), rx)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queues `msg` without waiting. A full queue drops the message.
    pub fn send(&self, msg: Message) -> bool {
        let Some(tx) = self.outbound.read().clone() else {
            return false;
        };

        match tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(user_id = %self.user_id, "outbound queue full, dropping message");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Closes the outbound queue and shuts the socket down. Only the first
    /// call does anything; it returns `true`.
    pub fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.outbound.write().take();
        self.socket.cancel();
        tracing::debug!(user_id = %self.user_id, "client closed");
        true
    }

    /// Forwards text and binary frames to `read` until the peer goes away.
    /// Returning drops `read`, which closes the inbound channel.
    pub async fn read_pump<S, E>(&self, mut stream: S, read: mpsc::Sender<Message>)
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        loop {
            let frame = tokio::select! {
                _ = self.socket.cancelled() => break,
                frame = stream.next() => frame,
            };

            let msg = match frame {
                Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => msg,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    tracing::debug!(user_id = %self.user_id, error = %err, "socket read failed");
                    break;
                }
            };

            tokio::select! {
                _ = self.socket.cancelled() => break,
                sent = read.send(msg) => if sent.is_err() {
                    break;
                },
            }
        }
    }

    /// Writes queued frames to the socket as they are. Sends a close frame
    /// once the queue has been closed and drained.
    pub async fn write_pump<W>(&self, mut sink: W, mut queue: mpsc::Receiver<Message>)
    where
        W: Sink<Message> + Unpin,
        W::Error: Display,
    {
        loop {
            tokio::select! {
                biased;
                msg = queue.recv() => {
                    let Some(msg) = msg else {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    };
                    if let Err(err) = sink.send(msg).await {
                        tracing::debug!(user_id = %self.user_id, error = %err, "socket write failed");
                        return;
                    }
                }
                _ = self.socket.cancelled() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use axum::body::Bytes;
    use futures::channel::mpsc as fmpsc;

    use super::*;

    fn client(user_id: &str) -> (Arc<Client>, mpsc::Receiver<Message>) {
        Client::new(user_id, user_id, None, CancellationToken::new())
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (client, mut queue) = client("u1");
        for i in 0..BUFFER_SIZE {
            assert!(client.send(Message::Text(i.to_string().into())));
        }
        assert!(!client.send(Message::Text("overflow".into())));

        let mut drained = 0;
        while let Ok(msg) = queue.try_recv() {
            assert_ne!(msg, Message::Text("overflow".into()));
            drained += 1;
        }
        assert_eq!(drained, BUFFER_SIZE);
    }

    #[tokio::test]
    async fn send_after_close_is_a_no_op() {
        let (client, mut queue) = client("u1");
        assert!(client.close());
        assert!(!client.send(Message::Text("late".into())));
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn concurrent_close_runs_once_and_writes_one_close_frame() {
        let (client, queue) = client("u1");
        let (sink, written) = fmpsc::unbounded::<Message>();

        let writer = {
            let client = client.clone();
            tokio::spawn(async move { client.write_pump(sink, queue).await })
        };

        let closers: Vec<_> = (0..16)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.close() })
            })
            .collect();

        let mut winners = 0;
        for closer in closers {
            if closer.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(client.is_closed());

        writer.await.unwrap();
        let frames: Vec<Message> = written.collect().await;
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Message::Close(None)));
    }

    #[tokio::test]
    async fn write_pump_flushes_queue_before_closing() {
        let (client, queue) = client("u1");
        let (sink, written) = fmpsc::unbounded::<Message>();

        client.send(Message::Text("offer".into()));
        client.send(Message::Binary(Bytes::from_static(&[0xff, 0x00])));
        client.close();
        client.write_pump(sink, queue).await;

        let frames: Vec<Message> = written.collect().await;
        assert_eq!(
            frames,
            vec![
                Message::Text("offer".into()),
                Message::Binary(Bytes::from_static(&[0xff, 0x00])),
                Message::Close(None),
            ]
        );
    }

    #[tokio::test]
    async fn binary_frames_stay_binary() {
        let (client, queue) = client("u1");
        let (sink, written) = fmpsc::unbounded::<Message>();

        // valid UTF-8, still written as binary
        client.send(Message::Binary(Bytes::from_static(b"offer123")));
        client.close();
        client.write_pump(sink, queue).await;

        let frames: Vec<Message> = written.collect().await;
        assert_eq!(frames[0], Message::Binary(Bytes::from_static(b"offer123")));
    }

    #[tokio::test]
    async fn read_pump_forwards_payloads_and_stops_at_close() {
        let (client, _queue) = client("u1");
        let (tx, stream) = fmpsc::unbounded::<Result<Message, Infallible>>();
        let (read_tx, mut read_rx) = mpsc::channel(BUFFER_SIZE);

        tx.unbounded_send(Ok(Message::Text("hello".into()))).unwrap();
        tx.unbounded_send(Ok(Message::Ping(Bytes::new()))).unwrap();
        tx.unbounded_send(Ok(Message::Binary(Bytes::from_static(b"\x01\x02")))).unwrap();
        tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        tx.unbounded_send(Ok(Message::Text("ignored".into()))).unwrap();

        client.read_pump(stream, read_tx).await;

        assert_eq!(read_rx.recv().await, Some(Message::Text("hello".into())));
        assert_eq!(read_rx.recv().await, Some(Message::Binary(Bytes::from_static(b"\x01\x02"))));
        assert_eq!(read_rx.recv().await, None);
    }

    #[tokio::test]
    async fn read_pump_ends_when_client_closes() {
        let (client, _queue) = client("u1");
        let (_tx, stream) = fmpsc::unbounded::<Result<Message, Infallible>>();
        let (read_tx, mut read_rx) = mpsc::channel(BUFFER_SIZE);

        let reader = {
            let client = client.clone();
            tokio::spawn(async move { client.read_pump(stream, read_tx).await })
        };
        client.close();

        reader.await.unwrap();
        assert_eq!(read_rx.recv().await, None);
    }
}
