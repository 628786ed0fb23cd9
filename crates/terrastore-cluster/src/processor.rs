//! Bounded command execution with a pause gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Semaphore};
use tracing::debug;

use terrastore_common::protocol::{Command, CommandResult, NodeAddress};
use terrastore_common::{Result, TerrastoreError};
use terrastore_store::Store;

/// Answers `Membership` commands with the current local-cluster view.
///
/// Provided by the coordinator; the processor itself only knows storage.
pub trait MembershipView: Send + Sync {
    fn members(&self) -> Vec<NodeAddress>;
}

/// Executes commands against the local store on a bounded worker pool.
///
/// Both the local node and the remote command server feed this processor, so
/// `node.concurrency` bounds everything the process executes regardless of
/// where the command came from. While paused, new commands park on the gate
/// until resume; commands already holding a permit run to completion, which
/// is what gives the flush cycle a stable snapshot.
pub struct CommandProcessor {
    store: Arc<Store>,
    membership: Arc<dyn MembershipView>,
    workers: Semaphore,
    pause_tx: watch::Sender<bool>,
    pause_rx: watch::Receiver<bool>,
    stopped: AtomicBool,
}

impl CommandProcessor {
    pub fn new(
        store: Arc<Store>,
        membership: Arc<dyn MembershipView>,
        concurrency: usize,
    ) -> Arc<Self> {
        let (pause_tx, pause_rx) = watch::channel(false);
        Arc::new(Self {
            store,
            membership,
            workers: Semaphore::new(concurrency.max(1)),
            pause_tx,
            pause_rx,
            stopped: AtomicBool::new(false),
        })
    }

    /// Executes one command, waiting through any pause and for a free worker.
    pub async fn process(&self, command: &Command) -> Result<CommandResult> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(stopped_error());
        }

        // Park while paused. The sender lives in self, so a closed channel
        // can only mean the processor is going away.
        let mut gate = self.pause_rx.clone();
        while *gate.borrow() {
            if gate.changed().await.is_err() {
                return Err(stopped_error());
            }
        }

        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| stopped_error())?;
        if self.stopped.load(Ordering::SeqCst) {
            return Err(stopped_error());
        }

        match command {
            Command::Membership => Ok(CommandResult::Members(self.membership.members())),
            storage_command => self.store.execute(storage_command).await,
        }
    }

    /// Parks new commands until [`resume`](Self::resume).
    pub fn pause(&self) {
        debug!("Pausing command processing");
        let _ = self.pause_tx.send(true);
    }

    pub fn resume(&self) {
        debug!("Resuming command processing");
        let _ = self.pause_tx.send(false);
    }

    /// Stops the processor for good; parked and future commands fail.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // Release parked commands so they observe the stop.
        let _ = self.pause_tx.send(false);
        self.workers.close();
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

fn stopped_error() -> TerrastoreError {
    TerrastoreError::Communication("Command processor is stopped".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use terrastore_store::MemoryEventBus;

    struct NoMembers;
    impl MembershipView for NoMembers {
        fn members(&self) -> Vec<NodeAddress> {
            vec![NodeAddress::new("node-1", "127.0.0.1", 6200)]
        }
    }

    fn processor() -> Arc<CommandProcessor> {
        let store = Arc::new(Store::new(MemoryEventBus::new(Vec::new())));
        CommandProcessor::new(store, Arc::new(NoMembers), 4)
    }

    fn put_command() -> Command {
        Command::PutValue {
            bucket: "books".to_string(),
            key: "dune".to_string(),
            value: json!({"a": 1}),
            predicate: None,
        }
    }

    #[tokio::test]
    async fn test_executes_storage_commands() {
        let processor = processor();
        processor.process(&put_command()).await.unwrap();
        let buckets = processor
            .process(&Command::GetBuckets)
            .await
            .unwrap()
            .into_buckets()
            .unwrap();
        assert!(buckets.contains("books"));
    }

    #[tokio::test]
    async fn test_answers_membership_itself() {
        let processor = processor();
        let members = processor
            .process(&Command::Membership)
            .await
            .unwrap()
            .into_members()
            .unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "node-1");
    }

    #[tokio::test]
    async fn test_pause_parks_commands_until_resume() {
        let processor = processor();
        processor.pause();

        let parked = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.process(&Command::GetBuckets).await })
        };

        // The command must still be parked...
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!parked.is_finished());

        // ...and complete promptly after resume.
        processor.resume();
        let result = tokio::time::timeout(Duration::from_secs(1), parked)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stop_fails_parked_and_future_commands() {
        let processor = processor();
        processor.pause();

        let parked = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.process(&Command::GetBuckets).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        processor.stop();
        let parked_result = tokio::time::timeout(Duration::from_secs(1), parked)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            parked_result,
            Err(TerrastoreError::Communication(_))
        ));

        assert!(processor.process(&Command::GetBuckets).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_idempotent() {
        let processor = processor();
        processor.stop();
        processor.stop();
        assert!(processor.process(&Command::GetBuckets).await.is_err());
    }
}
