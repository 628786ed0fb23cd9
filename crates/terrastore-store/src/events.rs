//! Value change events and the in-memory event bus.
//!
//! Buckets publish an event on every successful put, update and remove,
//! inside the same critical section as the write itself, so listeners see
//! per-key publications in operation order. The memory bus dispatches from a
//! single background task, which preserves that order end to end.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use terrastore_common::{Result, TerrastoreError};

use crate::value::Value;

/// A published storage event.
#[derive(Debug, Clone)]
pub enum Event {
    ValueChanged {
        bucket: String,
        key: String,
        value: Value,
    },
    ValueRemoved {
        bucket: String,
        key: String,
    },
}

impl Event {
    fn bucket(&self) -> &str {
        match self {
            Event::ValueChanged { bucket, .. } => bucket,
            Event::ValueRemoved { bucket, .. } => bucket,
        }
    }
}

/// A subscriber interested in some buckets' events.
pub trait EventListener: Send + Sync {
    /// Whether this listener wants events for the given bucket.
    fn observes(&self, bucket: &str) -> bool;

    fn on_value_changed(&self, bucket: &str, key: &str, value: &Value);

    fn on_value_removed(&self, bucket: &str, key: &str);

    /// Called once when the bus starts.
    fn init(&self) {}

    /// Called once when the bus shuts down.
    fn cleanup(&self) {}
}

/// Publication endpoint handed to buckets.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: Event) -> Result<()>;

    /// Stops dispatching. Idempotent; publishing afterwards is an error.
    fn shutdown(&self);
}

/// In-process event bus (`event_bus.impl = memory`).
///
/// Events are queued on an unbounded channel and dispatched by one background
/// task, so listeners are never invoked from a bucket's critical section.
pub struct MemoryEventBus {
    sender: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    shut_down: AtomicBool,
}

impl MemoryEventBus {
    pub fn new(listeners: Vec<Arc<dyn EventListener>>) -> Arc<Self> {
        for listener in &listeners {
            listener.init();
        }

        let (sender, mut receiver) = mpsc::unbounded_channel::<Event>();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                dispatch(&listeners, event);
            }
            for listener in &listeners {
                listener.cleanup();
            }
        });

        Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            shut_down: AtomicBool::new(false),
        })
    }
}

fn dispatch(listeners: &[Arc<dyn EventListener>], event: Event) {
    for listener in listeners {
        if !listener.observes(event.bucket()) {
            continue;
        }
        match &event {
            Event::ValueChanged { bucket, key, value } => {
                listener.on_value_changed(bucket, key, value)
            }
            Event::ValueRemoved { bucket, key } => listener.on_value_removed(bucket, key),
        }
    }
}

impl EventBus for MemoryEventBus {
    fn publish(&self, event: Event) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(TerrastoreError::internal("Event bus has been shut down"));
        }
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => {
                // A full shutdown between the flag check and here just drops
                // the event, same as any event in flight at shutdown.
                let _ = sender.send(event);
                Ok(())
            }
            None => Err(TerrastoreError::internal("Event bus has been shut down")),
        }
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.sender.lock().take();
    }
}
