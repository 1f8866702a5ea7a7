//! Push-subscription handles
//!
//! A [`Subscription`] owns the receiving end of an event stream plus the
//! means to tell the backend to stop sending. `close` consumes the handle, so
//! a subscription can be closed at most once; a handle dropped without
//! `close` schedules its own unsubscribe on the current runtime.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::backend::{BackendError, BackendResult};

/// Identifier of one open subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend side of a subscription's teardown.
#[async_trait]
pub trait Unsubscribe: Send + Sync {
    async fn unsubscribe(&self, id: SubscriptionId) -> BackendResult<()>;
}

/// Receiving end of a push subscription.
pub struct Subscription<T> {
    id: SubscriptionId,
    label: String,
    events: mpsc::UnboundedReceiver<T>,
    closer: Option<Arc<dyn Unsubscribe>>,
}

impl<T> Subscription<T> {
    pub fn new(
        id: SubscriptionId,
        label: impl Into<String>,
        events: mpsc::UnboundedReceiver<T>,
        closer: Arc<dyn Unsubscribe>,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            events,
            closer: Some(closer),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Next event, or `None` once the backend stopped sending.
    pub async fn next(&mut self) -> Option<T> {
        self.events.recv().await
    }

    pub fn try_next(&mut self) -> Option<T> {
        self.events.try_recv().ok()
    }

    /// Stop delivery and release the backend side.
    pub async fn close(mut self) -> BackendResult<()> {
        self.events.close();
        match self.closer.take() {
            Some(closer) => {
                debug!(id = %self.id, label = %self.label, "closing subscription");
                closer.unsubscribe(self.id).await
            }
            None => Ok(()),
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let Some(closer) = self.closer.take() else {
            return;
        };
        let id = self.id;
        warn!(%id, label = %self.label, "subscription dropped without close");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = closer.unsubscribe(id).await {
                        warn!(%id, error = %e, "deferred unsubscribe failed");
                    }
                });
            }
            Err(_) => warn!(%id, "no runtime available; subscription leaked"),
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("open", &self.closer.is_some())
            .finish()
    }
}

type Admit<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

struct Listener<T> {
    label: String,
    admit: Admit<T>,
    tx: mpsc::UnboundedSender<T>,
}

/// In-process fan-out of events to registered subscriptions.
///
/// Used by both backends to deliver locally originated events (auth-state
/// changes after a sign-in, row changes in the memory backend).
pub struct ListenerHub<T> {
    listeners: Mutex<HashMap<SubscriptionId, Listener<T>>>,
    closed: AtomicUsize,
}

impl<T> ListenerHub<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(HashMap::new()),
            closed: AtomicUsize::new(0),
        })
    }

    /// Register a listener receiving every published event `admit` accepts.
    pub fn register<F>(self: &Arc<Self>, label: impl Into<String>, admit: F) -> Subscription<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        let label = label.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().insert(
            id,
            Listener {
                label: label.clone(),
                admit: Box::new(admit),
                tx,
            },
        );
        debug!(%id, %label, "listener registered");
        let closer: Arc<dyn Unsubscribe> = self.clone();
        Subscription::new(id, label, rx, closer)
    }

    /// Deliver `event` to every admitting listener; returns the delivery count.
    pub fn publish(&self, event: &T) -> usize {
        let listeners = self.listeners.lock();
        let mut delivered = 0;
        for (id, listener) in listeners.iter() {
            if !(listener.admit)(event) {
                continue;
            }
            if listener.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                trace!(%id, label = %listener.label, "listener receiver gone");
            }
        }
        delivered
    }

    pub fn open_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Labels of the currently open listeners, sorted.
    pub fn open_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .listeners
            .lock()
            .values()
            .map(|l| l.label.clone())
            .collect();
        labels.sort();
        labels
    }

    pub fn is_open(&self, id: SubscriptionId) -> bool {
        self.listeners.lock().contains_key(&id)
    }

    /// Listeners removed since the hub was created. A listener can only be
    /// removed once, so this is also the number of successful closes.
    pub fn closed_total(&self) -> usize {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<T> Unsubscribe for ListenerHub<T>
where
    T: Send + 'static,
{
    async fn unsubscribe(&self, id: SubscriptionId) -> BackendResult<()> {
        let removed = self.listeners.lock().remove(&id);
        match removed {
            Some(listener) => {
                self.closed.fetch_add(1, Ordering::Relaxed);
                debug!(%id, label = %listener.label, "listener removed");
                Ok(())
            }
            None => Err(BackendError::SubscriptionClosed(id.to_string())),
        }
    }
}

impl<T> fmt::Debug for ListenerHub<T>
where
    T: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHub")
            .field("open", &self.listeners.lock().len())
            .field("closed", &self.closed_total())
            .finish()
    }
}
