use crate::error::{StackError, WifiError, WifiResult};
use crate::wifi::types::{EventBase, EventFilter, WifiEvent};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;
use tracing::{debug, error, trace};

/// Callback run on the dispatch thread for every matching event
pub type EventHandler = Arc<dyn Fn(&WifiEvent) + Send + Sync>;

/// Token returned by [`EventSource::subscribe`].
///
/// Not `Clone`: handing it back to `unsubscribe` consumes it, so a cleared
/// registration can never be unsubscribed twice.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Registration {
    id: u64,
    base: EventBase,
}

impl Registration {
    pub fn new(id: u64, base: EventBase) -> Self {
        Self { id, base }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn base(&self) -> EventBase {
        self.base
    }
}

/// Subscription interface of an event bus
pub trait EventSource: Send + Sync {
    fn subscribe(
        &self,
        base: EventBase,
        filter: EventFilter,
        handler: EventHandler,
    ) -> WifiResult<Registration>;

    fn unsubscribe(&self, registration: Registration) -> WifiResult<()>;
}

enum Message {
    Event(WifiEvent),
    Fence(oneshot::Sender<()>),
    Shutdown,
}

struct Subscriber {
    id: u64,
    base: EventBase,
    filter: EventFilter,
    handler: EventHandler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Event bus with one dedicated dispatch thread and FIFO delivery
pub struct EventLoop {
    sender: UnboundedSender<Message>,
    registry: Arc<Mutex<Registry>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl EventLoop {
    /// Spawn the dispatch thread
    pub fn new() -> WifiResult<Self> {
        let (sender, receiver) = unbounded_channel();
        let registry = Arc::new(Mutex::new(Registry::default()));

        let worker_registry = Arc::clone(&registry);
        let worker = thread::Builder::new()
            .name("wifi-events".to_string())
            .spawn(move || dispatch(receiver, worker_registry))?;
        let worker_id = worker.thread().id();

        Ok(Self {
            sender,
            registry,
            worker: Some(worker),
            worker_id,
        })
    }

    /// Queue an event for delivery on the dispatch thread
    pub fn post(&self, event: impl Into<WifiEvent>) -> WifiResult<()> {
        self.sender
            .send(Message::Event(event.into()))
            .map_err(|_| WifiError::EventLoopClosed)
    }

    /// Block until every event posted before this call has been dispatched.
    ///
    /// Returns immediately when called from a handler, since the dispatch
    /// thread cannot wait on itself.
    ///
    /// # Panics
    ///
    /// Panics when called from a thread driving a tokio runtime. Async callers
    /// go through `tokio::task::spawn_blocking`.
    pub fn flush(&self) -> WifiResult<()> {
        if thread::current().id() == self.worker_id {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Message::Fence(tx))
            .map_err(|_| WifiError::EventLoopClosed)?;
        rx.blocking_recv().map_err(|_| WifiError::EventLoopClosed)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }
}

impl EventSource for EventLoop {
    fn subscribe(
        &self,
        base: EventBase,
        filter: EventFilter,
        handler: EventHandler,
    ) -> WifiResult<Registration> {
        if self.sender.is_closed() {
            return Err(WifiError::SubscribeFailed {
                code: StackError::INVALID_STATE.code(),
            });
        }

        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.subscribers.push(Subscriber {
            id,
            base,
            filter,
            handler,
        });
        debug!(id, ?base, ?filter, "handler registered");
        Ok(Registration::new(id, base))
    }

    fn unsubscribe(&self, registration: Registration) -> WifiResult<()> {
        let mut registry = lock(&self.registry);
        let before = registry.subscribers.len();
        registry
            .subscribers
            .retain(|subscriber| subscriber.id != registration.id);

        if registry.subscribers.len() == before {
            return Err(WifiError::UnsubscribeFailed {
                code: StackError::NOT_FOUND.code(),
            });
        }
        debug!(id = registration.id, base = ?registration.base, "handler unregistered");
        Ok(())
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let _ = self.sender.send(Message::Shutdown);
        if let Some(worker) = self.worker.take() {
            if thread::current().id() != self.worker_id {
                let _ = worker.join();
            }
        }
    }
}

fn dispatch(mut receiver: UnboundedReceiver<Message>, registry: Arc<Mutex<Registry>>) {
    while let Some(message) = receiver.blocking_recv() {
        match message {
            Message::Event(event) => {
                let base = event.base();
                let id = event.id();
                // Snapshot so handlers may (un)subscribe without deadlocking.
                let handlers: Vec<EventHandler> = lock(&registry)
                    .subscribers
                    .iter()
                    .filter(|s| s.base == base && s.filter.matches(id))
                    .map(|s| Arc::clone(&s.handler))
                    .collect();

                trace!(?base, id, handlers = handlers.len(), "dispatching event");
                for handler in handlers {
                    if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                        error!(?base, id, "event handler panicked");
                    }
                }
            }
            Message::Fence(done) => {
                let _ = done.send(());
            }
            Message::Shutdown => break,
        }
    }
    debug!("event loop stopped");
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
