//! The remote node: a persistent connection with correlated replies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use terrastore_common::protocol::{Command, CommandResult, NodeAddress};
use terrastore_common::transport::{codec, connect as tcp_connect, read_frame, write_frame};
use terrastore_common::{ErrorMessage, Result, TerrastoreError};
use terrastore_routing::Node;

type Awaiter = oneshot::Sender<Result<CommandResult>>;
type Pending = Arc<SyncMutex<HashMap<u64, Awaiter>>>;

/// A member of some cluster reachable over TCP.
///
/// One persistent connection carries every command: `send` stamps a
/// monotonically increasing request id, writes a frame, and waits on the
/// correlation map entry that the background reader completes when the
/// matching reply arrives. Replies may come back in any order.
///
/// A reply missing its per-call timeout releases the awaiter and drops the
/// correlation entry, but leaves the socket open; the late reply is discarded
/// by the reader when it eventually lands.
pub struct RemoteNode {
    address: NodeAddress,
    node_timeout: Duration,
    next_request_id: AtomicU64,
    pending: Pending,
    connection: Mutex<Option<Connection>>,
}

struct Connection {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    reader: JoinHandle<()>,
}

impl RemoteNode {
    pub fn new(address: NodeAddress, node_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            address,
            node_timeout,
            next_request_id: AtomicU64::new(1),
            pending: Arc::new(SyncMutex::new(HashMap::new())),
            connection: Mutex::new(None),
        })
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    async fn writer(&self) -> Result<Arc<Mutex<OwnedWriteHalf>>> {
        let connection = self.connection.lock().await;
        connection
            .as_ref()
            .map(|c| c.writer.clone())
            .ok_or_else(|| {
                TerrastoreError::Communication(format!(
                    "Node {} is not connected",
                    self.address.name
                ))
            })
    }
}

#[async_trait]
impl Node for RemoteNode {
    fn name(&self) -> &str {
        &self.address.name
    }

    async fn send(&self, command: Command) -> Result<CommandResult> {
        let writer = self.writer().await?;

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().insert(request_id, sender);

        let frame = match codec::encode_request(request_id, &command) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.lock().remove(&request_id);
                return Err(e);
            }
        };

        {
            let mut writer = writer.lock().await;
            if let Err(e) = write_frame(&mut *writer, &frame).await {
                self.pending.lock().remove(&request_id);
                return Err(e);
            }
        }

        match tokio::time::timeout(self.node_timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            // The reader failed the awaiter or went away entirely.
            Ok(Err(_)) => Err(TerrastoreError::Communication(format!(
                "Node {} disconnected while awaiting response",
                self.address.name
            ))),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(TerrastoreError::Processing(ErrorMessage::new(
                    ErrorMessage::INTERNAL,
                    format!(
                        "Communication timeout after {}ms talking to node {}",
                        self.node_timeout.as_millis(),
                        self.address.name
                    ),
                )))
            }
        }
    }

    async fn connect(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            return Ok(());
        }

        let stream = tcp_connect(&self.address.endpoint()).await?;
        let (read_half, write_half) = stream.into_split();
        let reader = tokio::spawn(read_loop(
            read_half,
            self.pending.clone(),
            self.address.name.clone(),
        ));

        *connection = Some(Connection {
            writer: Arc::new(Mutex::new(write_half)),
            reader,
        });
        info!("Connected to remote node {}", self.address.name);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut connection = self.connection.lock().await;
        if let Some(connection) = connection.take() {
            connection.reader.abort();
            fail_all(
                &self.pending,
                TerrastoreError::Communication(format!(
                    "Node {} disconnected",
                    self.address.name
                )),
            );
            info!("Disconnected from remote node {}", self.address.name);
        }
    }
}

/// Completes awaiters as correlated replies arrive; on any transport or
/// decode failure the connection is considered dead and every in-flight send
/// fails at once.
async fn read_loop(mut reader: OwnedReadHalf, pending: Pending, node_name: String) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(payload)) => match codec::decode_response(&payload) {
                Ok(envelope) => {
                    let awaiter = pending.lock().remove(&envelope.request_id);
                    match awaiter {
                        Some(sender) => {
                            let _ = sender.send(envelope.into_result());
                        }
                        None => debug!(
                            "Discarding late response {} from node {}",
                            envelope.request_id, node_name
                        ),
                    }
                }
                Err(e) => {
                    warn!("Garbled response from node {}: {}", node_name, e);
                    fail_all(&pending, e);
                    return;
                }
            },
            Ok(None) => {
                debug!("Node {} closed the connection", node_name);
                fail_all(
                    &pending,
                    TerrastoreError::Communication(format!(
                        "Node {} closed the connection",
                        node_name
                    )),
                );
                return;
            }
            Err(e) => {
                warn!("Read failure from node {}: {}", node_name, e);
                fail_all(&pending, e);
                return;
            }
        }
    }
}

fn fail_all(pending: &Pending, error: TerrastoreError) {
    let awaiters: Vec<Awaiter> = pending.lock().drain().map(|(_, sender)| sender).collect();
    for awaiter in awaiters {
        let _ = awaiter.send(Err(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrastore_common::protocol::ResponseEnvelope;
    use tokio::net::TcpListener;

    fn address(port: u16) -> NodeAddress {
        NodeAddress::new("peer", "127.0.0.1", port)
    }

    /// A peer that answers every request through the supplied closure, or
    /// stalls forever when it returns `None`.
    async fn spawn_peer<F>(behavior: F) -> u16
    where
        F: Fn(u64, Command) -> Option<ResponseEnvelope> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            while let Ok(Some(payload)) = read_frame(&mut stream).await {
                let (request_id, command) = codec::decode_request(&payload).unwrap();
                if let Some(envelope) = behavior(request_id, command) {
                    let frame = codec::encode_response(&envelope).unwrap();
                    write_frame(&mut stream, &frame).await.unwrap();
                }
            }
        });
        port
    }

    #[tokio::test]
    async fn test_send_not_connected() {
        let node = RemoteNode::new(address(1), Duration::from_millis(100));
        let err = node.send(Command::GetBuckets).await.unwrap_err();
        assert!(matches!(err, TerrastoreError::Communication(_)));
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let port = spawn_peer(|id, _| Some(ResponseEnvelope::success(id, CommandResult::Ack)))
            .await;

        let node = RemoteNode::new(address(port), Duration::from_secs(1));
        node.connect().await.unwrap();
        node.send(Command::GetBuckets)
            .await
            .unwrap()
            .into_ack()
            .unwrap();
        node.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_idempotent() {
        let port = spawn_peer(|id, _| Some(ResponseEnvelope::success(id, CommandResult::Ack)))
            .await;

        let node = RemoteNode::new(address(port), Duration::from_secs(1));
        node.connect().await.unwrap();
        node.connect().await.unwrap();
        node.disconnect().await;
        node.disconnect().await;
    }

    #[tokio::test]
    async fn test_timeout_on_stalled_peer_leaves_socket_usable() {
        use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
        static STALL_FIRST: AtomicBool = AtomicBool::new(true);

        let port = spawn_peer(|id, _| {
            if STALL_FIRST.swap(false, AtomicOrdering::SeqCst) {
                None // stall the first request
            } else {
                Some(ResponseEnvelope::success(id, CommandResult::Ack))
            }
        })
        .await;

        let node = RemoteNode::new(address(port), Duration::from_millis(100));
        node.connect().await.unwrap();

        let started = std::time::Instant::now();
        let err = node.send(Command::GetBuckets).await.unwrap_err();
        assert!(matches!(err, TerrastoreError::Processing(_)));
        assert!(started.elapsed() < Duration::from_millis(500));

        // Socket stayed open: the next request goes through.
        node.send(Command::GetBuckets)
            .await
            .unwrap()
            .into_ack()
            .unwrap();
        node.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_fails_in_flight_sends() {
        let port = spawn_peer(|_, _| None).await; // never answers

        let node = RemoteNode::new(address(port), Duration::from_secs(10));
        node.connect().await.unwrap();

        let in_flight = {
            let node = node.clone();
            tokio::spawn(async move { node.send(Command::GetBuckets).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        node.disconnect().await;
        let result = tokio::time::timeout(Duration::from_secs(1), in_flight)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TerrastoreError::Communication(_))));
    }

    #[tokio::test]
    async fn test_peer_error_is_surfaced() {
        let port = spawn_peer(|id, _| {
            let error = TerrastoreError::Processing(ErrorMessage::not_found("missing"));
            Some(ResponseEnvelope::failure(id, &error))
        })
        .await;

        let node = RemoteNode::new(address(port), Duration::from_secs(1));
        node.connect().await.unwrap();
        let err = node.send(Command::GetBuckets).await.unwrap_err();
        assert!(matches!(err, TerrastoreError::Processing(msg) if msg.code == 404));
        node.disconnect().await;
    }
}
