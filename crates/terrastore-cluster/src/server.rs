//! The TCP command server remote peers talk to.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use terrastore_common::protocol::ResponseEnvelope;
use terrastore_common::transport::{codec, read_frame, write_frame};
use terrastore_common::{Result, TerrastoreError};

use crate::processor::CommandProcessor;

/// Accepts peer connections and executes their command frames against the
/// shared processor.
///
/// Each frame is handled on its own task so slow commands never block the
/// connection; replies carry the frame's request id and may be written out of
/// order, which is exactly what the remote node's correlation map expects.
pub struct CommandServer {
    listener: TcpListener,
    processor: Arc<CommandProcessor>,
}

impl CommandServer {
    /// Binds the server socket.
    pub async fn bind(bind_addr: &str, processor: Arc<CommandProcessor>) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            TerrastoreError::Communication(format!("Failed to bind {}: {}", bind_addr, e))
        })?;
        Ok(Self {
            listener,
            processor,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| TerrastoreError::Communication(format!("No local address: {}", e)))
    }

    /// Runs the accept loop in the background.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Command server listening");
            loop {
                match self.listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("Accepted connection from {}", peer);
                        let processor = self.processor.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, processor).await {
                                warn!("Connection from {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                    }
                }
            }
        })
    }
}

async fn handle_connection(stream: TcpStream, processor: Arc<CommandProcessor>) -> Result<()> {
    let (mut reader, writer) = stream.into_split();
    let writer = Arc::new(Mutex::new(writer));

    loop {
        let Some(payload) = read_frame(&mut reader).await? else {
            debug!("Peer closed the connection");
            return Ok(());
        };

        let (request_id, command) = match codec::decode_request(&payload) {
            Ok(decoded) => decoded,
            Err(e @ TerrastoreError::Protocol(_)) => {
                // Unknown kind or version: answer, then drop the connection.
                let envelope = ResponseEnvelope::failure(0, &e);
                let frame = codec::encode_response(&envelope)?;
                let mut writer = writer.lock().await;
                write_frame(&mut *writer, &frame).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let processor = processor.clone();
        let writer = writer.clone();
        tokio::spawn(async move {
            let envelope = match processor.process(&command).await {
                Ok(result) => ResponseEnvelope::success(request_id, result),
                Err(e) => ResponseEnvelope::failure(request_id, &e),
            };
            match codec::encode_response(&envelope) {
                Ok(frame) => {
                    let mut writer = writer.lock().await;
                    if let Err(e) = write_frame(&mut *writer, &frame).await {
                        warn!("Failed to send response {}: {}", request_id, e);
                    }
                }
                Err(e) => warn!("Failed to encode response {}: {}", request_id, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::RemoteNode;
    use crate::processor::MembershipView;
    use serde_json::json;
    use std::time::Duration;
    use terrastore_common::protocol::{Command, NodeAddress};
    use terrastore_routing::Node;
    use terrastore_store::{MemoryEventBus, Store};

    struct NoMembers;
    impl MembershipView for NoMembers {
        fn members(&self) -> Vec<NodeAddress> {
            vec![NodeAddress::new("server-node", "127.0.0.1", 0)]
        }
    }

    async fn spawn_server() -> u16 {
        let store = Arc::new(Store::new(MemoryEventBus::new(Vec::new())));
        let processor = CommandProcessor::new(store, Arc::new(NoMembers), 4);
        let server = CommandServer::bind("127.0.0.1:0", processor).await.unwrap();
        let port = server.local_addr().unwrap().port();
        server.spawn();
        port
    }

    fn remote(port: u16) -> Arc<RemoteNode> {
        RemoteNode::new(
            NodeAddress::new("server-node", "127.0.0.1", port),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn test_put_and_get_through_the_wire() {
        let port = spawn_server().await;
        let node = remote(port);
        node.connect().await.unwrap();

        node.send(Command::PutValue {
            bucket: "books".to_string(),
            key: "dune".to_string(),
            value: json!({"a": 1}),
            predicate: None,
        })
        .await
        .unwrap()
        .into_ack()
        .unwrap();

        let value = node
            .send(Command::GetValue {
                bucket: "books".to_string(),
                key: "dune".to_string(),
                predicate: None,
            })
            .await
            .unwrap()
            .into_value()
            .unwrap();
        assert_eq!(value, json!({"a": 1}));

        node.disconnect().await;
    }

    #[tokio::test]
    async fn test_processing_error_crosses_the_wire() {
        let port = spawn_server().await;
        let node = remote(port);
        node.connect().await.unwrap();

        let err = node
            .send(Command::GetValue {
                bucket: "ghost".to_string(),
                key: "nothing".to_string(),
                predicate: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TerrastoreError::Processing(msg) if msg.code == 404));

        node.disconnect().await;
    }

    #[tokio::test]
    async fn test_membership_crosses_the_wire() {
        let port = spawn_server().await;
        let node = remote(port);
        node.connect().await.unwrap();

        let members = node
            .send(Command::Membership)
            .await
            .unwrap()
            .into_members()
            .unwrap();
        assert_eq!(members[0].name, "server-node");

        node.disconnect().await;
    }

    #[tokio::test]
    async fn test_validation_error_crosses_the_wire() {
        let port = spawn_server().await;
        let node = remote(port);
        node.connect().await.unwrap();

        let err = node
            .send(Command::PutValue {
                bucket: "books".to_string(),
                key: "bad".to_string(),
                value: json!([1, 2, 3]),
                predicate: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TerrastoreError::Validation(_)));

        node.disconnect().await;
    }

    #[tokio::test]
    async fn test_concurrent_requests_one_connection() {
        let port = spawn_server().await;
        let node = remote(port);
        node.connect().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let node = node.clone();
            handles.push(tokio::spawn(async move {
                node.send(Command::PutValue {
                    bucket: "books".to_string(),
                    key: format!("key-{}", i),
                    value: json!({"i": i}),
                    predicate: None,
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let keys = node
            .send(Command::GetKeys {
                bucket: "books".to_string(),
            })
            .await
            .unwrap()
            .into_keys()
            .unwrap();
        assert_eq!(keys.len(), 16);

        node.disconnect().await;
    }
}
