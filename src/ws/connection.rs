//! Outbound half of a client socket
//!
//! The socket's writer task owns the receiving end; the simulation holds
//! [`Connection`] handles and never awaits a network write.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

/// Frames queued for the socket writer
#[derive(Debug)]
pub enum Outbound {
    /// Serialized snapshot, shared by every recipient of a tick
    Snapshot(Arc<str>),
    /// Close the socket, then acknowledge
    Close(oneshot::Sender<()>),
}

/// Per-connection send failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Connection closed")]
    Closed,

    #[error("Outbound buffer full, frame dropped")]
    Lagging,
}

/// Create the outbound channel for a freshly upgraded socket
pub fn channel(capacity: usize) -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
    mpsc::channel(capacity.max(1))
}

/// Handle to a client's outbound channel
#[derive(Debug, Clone)]
pub struct Connection {
    /// Client-generated ID, stable for the session
    pub client_id: Uuid,
    /// Server-generated ID of the socket that registered this client
    pub socket_id: Uuid,
    tx: mpsc::Sender<Outbound>,
}

impl Connection {
    pub fn new(client_id: Uuid, socket_id: Uuid, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            client_id,
            socket_id,
            tx,
        }
    }

    /// True once the writer task has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queue a frame without waiting
    pub fn send(&self, frame: Arc<str>) -> Result<(), SendError> {
        self.tx
            .try_send(Outbound::Snapshot(frame))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::Lagging,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })
    }

    /// Ask the writer to close the socket and wait up to `wait` for it to
    /// finish. Returns false if the writer did not acknowledge in time.
    pub async fn close(&self, wait: Duration) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();

        let closed = timeout(wait, async {
            if self.tx.send(Outbound::Close(ack_tx)).await.is_ok() {
                let _ = ack_rx.await;
            }
        })
        .await;

        if closed.is_err() {
            warn!(
                client_id = %self.client_id,
                socket_id = %self.socket_id,
                "Writer did not acknowledge close, giving up"
            );
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_connection(capacity: usize) -> (Connection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = channel(capacity);
        (Connection::new(Uuid::new_v4(), Uuid::new_v4(), tx), rx)
    }

    #[test]
    fn test_send_queues_frame() {
        let (conn, mut rx) = test_connection(4);
        tokio_test::assert_ok!(conn.send(Arc::from("[]")));

        match rx.try_recv() {
            Ok(Outbound::Snapshot(frame)) => assert_eq!(&*frame, "[]"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_send_after_writer_gone() {
        let (conn, rx) = test_connection(4);
        assert!(!conn.is_closed());

        drop(rx);

        assert!(conn.is_closed());
        assert_eq!(conn.send(Arc::from("[]")), Err(SendError::Closed));
    }

    #[test]
    fn test_send_full_buffer_is_lagging() {
        let (conn, _rx) = test_connection(1);
        tokio_test::assert_ok!(conn.send(Arc::from("a")));
        assert_eq!(conn.send(Arc::from("b")), Err(SendError::Lagging));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_close_waits_for_ack() {
        let (conn, mut rx) = test_connection(4);

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Outbound::Close(ack) = frame {
                    let _ = ack.send(());
                    return true;
                }
            }
            false
        });

        assert!(conn.close(Duration::from_secs(1)).await);
        assert!(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_close_on_dead_writer_returns() {
        let (conn, rx) = test_connection(4);
        drop(rx);
        assert!(conn.close(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_close_gives_up_on_stuck_writer() {
        // Writer alive but never reading: the buffer is full, so even
        // queueing the close frame blocks
        let (conn, _rx) = test_connection(1);
        tokio_test::assert_ok!(conn.send(Arc::from("[]")));

        assert!(!conn.close(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_close_gives_up_without_ack() {
        let (conn, mut rx) = test_connection(4);

        // Reads the close request but never acknowledges it
        let writer = tokio::spawn(async move {
            let request = rx.recv().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(request);
        });

        assert!(!conn.close(Duration::from_millis(20)).await);
        writer.abort();
    }
}
