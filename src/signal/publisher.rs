use axum::extract::ws::Message;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{Client, Connections};

impl Connections {
    /// Relays everything `sender` reads to the other clients, in order, until
    /// the inbound channel closes or `shutdown` fires. Signals `done` once on
    /// the way out.
    pub async fn publish(
        &self,
        sender: &Client,
        mut read: mpsc::Receiver<Message>,
        shutdown: CancellationToken,
        done: oneshot::Sender<()>,
    ) {
        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = read.recv() => msg,
            };
            let Some(msg) = msg else {
                break;
            };

            let delivered = self.broadcast_except(sender, msg);
            tracing::trace!(user_id = sender.user_id(), delivered, "relayed");
        }

        tracing::debug!(user_id = sender.user_id(), "publisher done");
        let _ = done.send(());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn client(user_id: &str) -> (Arc<Client>, mpsc::Receiver<Message>) {
        Client::new(user_id, user_id, None, CancellationToken::new())
    }

    #[tokio::test]
    async fn relays_in_order_then_reports_done() {
        let connections = Arc::new(Connections::default());
        let (x, _x_queue) = client("x");
        let (y, mut y_queue) = client("y");
        connections.add(x.clone());
        connections.add(y);

        let (read_tx, read_rx) = mpsc::channel(8);
        let (done_tx, done_rx) = oneshot::channel();
        let publisher = {
            let connections = connections.clone();
            tokio::spawn(async move {
                connections.publish(&x, read_rx, CancellationToken::new(), done_tx).await
            })
        };

        for msg in ["offer", "candidate-1", "candidate-2"] {
            read_tx.send(Message::Text(msg.into())).await.unwrap();
        }
        drop(read_tx);

        done_rx.await.unwrap();
        publisher.await.unwrap();

        for expected in ["offer", "candidate-1", "candidate-2"] {
            assert_eq!(y_queue.recv().await.unwrap(), Message::Text(expected.into()));
        }
    }

    #[tokio::test]
    async fn cancellation_still_reports_done() {
        let connections = Connections::default();
        let (x, _x_queue) = client("x");
        let (_read_tx, read_rx) = mpsc::channel(8);
        let (done_tx, done_rx) = oneshot::channel();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        connections.publish(&x, read_rx, shutdown, done_tx).await;
        assert!(done_rx.await.is_ok());
    }
}
