//! The in-process node.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use terrastore_common::protocol::{Command, CommandResult};
use terrastore_common::Result;
use terrastore_routing::Node;

use crate::processor::CommandProcessor;

/// The node this process embodies: commands execute on the local worker pool
/// without touching the network.
pub struct LocalNode {
    name: String,
    processor: Arc<CommandProcessor>,
}

impl LocalNode {
    pub fn new(name: impl Into<String>, processor: Arc<CommandProcessor>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            processor,
        })
    }
}

#[async_trait]
impl Node for LocalNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, command: Command) -> Result<CommandResult> {
        self.processor.process(&command).await
    }

    async fn connect(&self) -> Result<()> {
        debug!("Connected local node {}", self.name);
        Ok(())
    }

    async fn disconnect(&self) {
        debug!("Disconnected local node {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::MembershipView;
    use serde_json::json;
    use terrastore_common::protocol::NodeAddress;
    use terrastore_store::{MemoryEventBus, Store};

    struct NoMembers;
    impl MembershipView for NoMembers {
        fn members(&self) -> Vec<NodeAddress> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_send_executes_against_store() {
        let store = Arc::new(Store::new(MemoryEventBus::new(Vec::new())));
        let processor = CommandProcessor::new(store, Arc::new(NoMembers), 2);
        let node = LocalNode::new("node-1", processor);

        node.connect().await.unwrap();
        node.send(Command::PutValue {
            bucket: "books".to_string(),
            key: "dune".to_string(),
            value: json!({"a": 1}),
            predicate: None,
        })
        .await
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
}
