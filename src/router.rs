//! Event fan-out to registered listeners

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};

use tokio::sync::{mpsc, watch};
use tracing::{error, warn};

use crate::{
    connection::{ConnectionState, EslClient},
    error::EslError,
    event::EslEvent,
};

/// Callback invoked for every event the server sends on a connection.
///
/// Listeners run on the connection's reader task, so decoding of further
/// messages waits until they return. Hand long work off to a spawned task.
/// A panicking listener is logged and skipped; it does not affect the others.
pub trait EventListener: Send + Sync + 'static {
    /// Handle one event.
    fn on_event(&self, client: &EslClient, event: &EslEvent);
}

impl<F> EventListener for F
where
    F: Fn(&EslClient, &EslEvent) + Send + Sync + 'static,
{
    fn on_event(&self, client: &EslClient, event: &EslEvent) {
        self(client, event)
    }
}

/// Handle returned by listener registration, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Ordered listener set for one connection.
#[derive(Default)]
pub(crate) struct EventRouter {
    listeners: Mutex<Vec<(ListenerId, Arc<dyn EventListener>)>>,
    next_id: AtomicU64,
}

impl EventRouter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, Arc<dyn EventListener>)>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn add(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId(
            self.next_id
                .fetch_add(1, Ordering::Relaxed),
        );
        self.lock()
            .push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Drop every listener. Used when the connection closes.
    pub(crate) fn clear(&self) {
        let removed = std::mem::take(&mut *self.lock());
        drop(removed);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock()
            .len()
    }

    /// Deliver `event` to every listener in registration order.
    ///
    /// The set is snapshotted first, so listeners may register or remove
    /// listeners without deadlocking; such changes apply from the next event.
    pub(crate) fn dispatch(&self, client: &EslClient, event: &EslEvent) {
        let snapshot: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(client, event)));
            if let Err(panic) = outcome {
                error!(
                    "[EVENT] {} panicked on {:?}: {}",
                    id,
                    event.event_name(),
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

struct StreamShared {
    /// Set when events have been dropped due to a full queue
    overflow: AtomicBool,
    /// Total count of dropped events
    dropped: AtomicU64,
}

/// Router listener feeding a bounded channel.
struct ChannelListener {
    tx: mpsc::Sender<Result<EslEvent, EslError>>,
    shared: Arc<StreamShared>,
}

impl EventListener for ChannelListener {
    /// Try to send the event via try_send.
    ///
    /// If the channel is full, drop the item, set the overflow flag, and
    /// increment the dropped counter. Before each delivery, check the overflow
    /// flag and attempt to deliver a QueueFull notification first.
    fn on_event(&self, _client: &EslClient, event: &EslEvent) {
        if self
            .shared
            .overflow
            .load(Ordering::Relaxed)
        {
            match self
                .tx
                .try_send(Err(EslError::QueueFull))
            {
                Ok(()) => {
                    self.shared
                        .overflow
                        .store(false, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
                Err(mpsc::error::TrySendError::Full(_)) => {}
            }
        }

        match self
            .tx
            .try_send(Ok(event.clone()))
        {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared
                    .overflow
                    .store(true, Ordering::Relaxed);
                self.shared
                    .dropped
                    .fetch_add(1, Ordering::Relaxed);
                warn!("[EVENT] event stream full, dropping event");
            }
        }
    }
}

/// Pull-style view of a connection's events.
///
/// Events are delivered as `Result<EslEvent, EslError>`. An
/// `Err(EslError::QueueFull)` indicates that one or more events were dropped
/// because the application fell behind; use
/// [`dropped_event_count`](Self::dropped_event_count) for the exact count.
/// The stream ends when the connection closes. Dropping it unregisters its
/// listener.
pub struct EslEventStream {
    rx: mpsc::Receiver<Result<EslEvent, EslError>>,
    state_rx: watch::Receiver<ConnectionState>,
    shared: Arc<StreamShared>,
    router: Weak<EventRouter>,
    listener_id: ListenerId,
}

impl fmt::Debug for EslEventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EslEventStream")
            .field("state", &*self.state_rx.borrow())
            .field("listener_id", &self.listener_id)
            .finish()
    }
}

impl EslEventStream {
    pub(crate) fn register(
        router: &Arc<EventRouter>,
        state_rx: watch::Receiver<ConnectionState>,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shared = Arc::new(StreamShared {
            overflow: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        });
        let listener_id = router.add(Arc::new(ChannelListener {
            tx,
            shared: Arc::clone(&shared),
        }));
        Self {
            rx,
            state_rx,
            shared,
            router: Arc::downgrade(router),
            listener_id,
        }
    }

    /// Receive the next event, or `None` once the connection has closed and
    /// everything queued has been read.
    pub async fn recv(&mut self) -> Option<Result<EslEvent, EslError>> {
        self.rx
            .recv()
            .await
    }

    /// Number of events dropped because the queue was full.
    pub fn dropped_event_count(&self) -> u64 {
        self.shared
            .dropped
            .load(Ordering::Relaxed)
    }

    /// Current connection state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.state_rx
            .borrow()
            .clone()
    }
}

impl Drop for EslEventStream {
    fn drop(&mut self) {
        if let Some(router) = self
            .router
            .upgrade()
        {
            router.remove(self.listener_id);
        }
    }
}

impl futures_util::Stream for EslEventStream {
    type Item = Result<EslEvent, EslError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
    }
}
