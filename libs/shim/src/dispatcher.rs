//! Single-consumer event bus between informer handlers, state machines,
//! and scheduling-core callbacks.
//!
//! The dispatcher owns a bounded queue and one background consumer task.
//! Producers block only when the queue is full (backpressure). Handlers
//! are registered per event kind and are awaited sequentially by the
//! consumer, which makes delivery for a given target id follow dispatch
//! order.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Routing key for handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Application,
    Task,
    Node,
}

/// Events advancing the application state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationEvent {
    Submit,
    Accept,
    Run,
    Completing,
    Complete,
    Fail,
    Kill,
}

/// Events advancing the task state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Init,
    Schedule,
    Allocated {
        node_id: String,
        allocation_key: String,
    },
    Bound,
    Complete,
    Fail {
        reason: String,
    },
    Reject {
        reason: String,
    },
}

/// Scheduling-core callbacks about cached nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    Accepted,
}

#[derive(Debug, Clone)]
pub struct ApplicationEventPayload {
    pub application_id: String,
    pub event: ApplicationEvent,
}

#[derive(Debug, Clone)]
pub struct TaskEventPayload {
    pub application_id: String,
    pub task_id: String,
    pub event: TaskEvent,
}

#[derive(Debug, Clone)]
pub struct NodeEventPayload {
    pub node_id: String,
    pub event: NodeEvent,
}

/// An event travelling through the dispatcher.
#[derive(Debug, Clone)]
pub enum ShimEvent {
    Application(ApplicationEventPayload),
    Task(TaskEventPayload),
    Node(NodeEventPayload),
}

impl ShimEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ShimEvent::Application(_) => EventKind::Application,
            ShimEvent::Task(_) => EventKind::Task,
            ShimEvent::Node(_) => EventKind::Node,
        }
    }
}

pub type BoxedHandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handler invoked by the consumer for each event of a registered kind.
pub type EventHandler = Arc<dyn Fn(ShimEvent) -> BoxedHandlerFuture + Send + Sync>;

/// The process-wide event bus. Create one, share it via `Arc`.
pub struct Dispatcher {
    tx: mpsc::Sender<ShimEvent>,
    rx: Mutex<Option<mpsc::Receiver<ShimEvent>>>,
    handlers: RwLock<HashMap<EventKind, Vec<(String, EventHandler)>>>,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
    consumer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            tx,
            rx: Mutex::new(Some(rx)),
            handlers: RwLock::new(HashMap::new()),
            shutdown_tx,
            running: AtomicBool::new(false),
            consumer: Mutex::new(None),
        })
    }

    /// Register a named handler for one event kind.
    pub async fn register_event_handler(
        &self,
        name: &str,
        kind: EventKind,
        handler: EventHandler,
    ) {
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(kind)
            .or_default()
            .push((name.to_string(), handler));
        debug!(handler = name, ?kind, "Registered event handler");
    }

    /// Drop all handler registrations.
    pub async fn unregister_all_event_handlers(&self) {
        self.handlers.write().await.clear();
    }

    /// Start the consumer task. A second call is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut slot = self.rx.lock().await;
        let Some(mut rx) = slot.take() else {
            debug!("Dispatcher already started");
            return;
        };
        self.running.store(true, Ordering::SeqCst);

        let dispatcher = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            info!("Dispatcher consumer started");
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            // Drain whatever is already queued, then stop.
                            while let Ok(event) = rx.try_recv() {
                                dispatcher.deliver(event).await;
                            }
                            break;
                        }
                    }

                    event = rx.recv() => {
                        match event {
                            Some(event) => dispatcher.deliver(event).await,
                            None => break,
                        }
                    }
                }
            }
            info!("Dispatcher consumer stopped");
        });
        *self.consumer.lock().await = Some(handle);
    }

    /// Enqueue an event. Blocks the producer when the queue is full.
    /// Events dispatched after [`stop`](Self::stop) are dropped silently.
    pub async fn dispatch(&self, event: ShimEvent) {
        if !self.running.load(Ordering::SeqCst) {
            debug!(kind = ?event.kind(), "Dispatcher stopped, dropping event");
            return;
        }
        if self.tx.send(event).await.is_err() {
            debug!("Dispatcher queue closed, dropping event");
        }
    }

    /// Drain in-flight events and halt the consumer.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.consumer.lock().await.take() {
            if handle.await.is_err() {
                warn!("Dispatcher consumer panicked during shutdown");
            }
        }
    }

    async fn deliver(&self, event: ShimEvent) {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = {
            let registered = self.handlers.read().await;
            registered
                .get(&kind)
                .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        if handlers.is_empty() {
            debug!(?kind, "No handler registered, dropping event");
            return;
        }
        for handler in handlers {
            handler(event.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn node_event(node_id: &str) -> ShimEvent {
        ShimEvent::Node(NodeEventPayload {
            node_id: node_id.to_string(),
            event: NodeEvent::Accepted,
        })
    }

    fn collecting_handler(seen: Arc<StdMutex<Vec<String>>>) -> EventHandler {
        Arc::new(move |event| {
            let seen = Arc::clone(&seen);
            Box::pin(async move {
                if let ShimEvent::Node(payload) = event {
                    seen.lock().unwrap().push(payload.node_id);
                }
            })
        })
    }

    #[tokio::test]
    async fn test_delivery_preserves_dispatch_order() {
        let dispatcher = Dispatcher::new(16);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        dispatcher
            .register_event_handler("test", EventKind::Node, collecting_handler(seen.clone()))
            .await;
        dispatcher.start().await;

        for i in 0..5 {
            dispatcher.dispatch(node_event(&format!("node{}", i))).await;
        }
        dispatcher.stop().await;

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec!["node0", "node1", "node2", "node3", "node4"]
        );
    }

    #[tokio::test]
    async fn test_stop_drains_queue() {
        let dispatcher = Dispatcher::new(16);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        dispatcher
            .register_event_handler("test", EventKind::Node, collecting_handler(seen.clone()))
            .await;
        dispatcher.start().await;

        dispatcher.dispatch(node_event("node1")).await;
        dispatcher.dispatch(node_event("node2")).await;
        dispatcher.stop().await;

        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_after_stop_is_dropped() {
        let dispatcher = Dispatcher::new(16);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        dispatcher
            .register_event_handler("test", EventKind::Node, collecting_handler(seen.clone()))
            .await;
        dispatcher.start().await;
        dispatcher.stop().await;

        dispatcher.dispatch(node_event("late")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unhandled_kind_is_dropped() {
        let dispatcher = Dispatcher::new(16);
        dispatcher.start().await;
        // No handler registered: must not hang or panic.
        dispatcher.dispatch(node_event("node1")).await;
        dispatcher.stop().await;
    }
}
