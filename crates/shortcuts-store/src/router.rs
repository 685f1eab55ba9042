use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

use shortcuts_types::{Base, Category, CategoryId, PendingExecution, Shortcut, ShortcutId, Variable, VariableId};

use crate::state::StoreState;

/// Subscription identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

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

/// Something that can be observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Base,
    Categories,
    Category(CategoryId),
    /// `ShortcutId::TEMPORARY` observes the staged shadow.
    Shortcut(ShortcutId),
    Variables,
    Variable(VariableId),
    PendingExecutions,
    AppLock,
}

/// Value delivered to an `EntityRef` observer.
#[derive(Clone, Debug, PartialEq)]
pub enum Observed {
    Base(Option<Base>),
    Categories(Vec<Category>),
    Category(Option<Category>),
    Shortcut(Option<Shortcut>),
    Variables(Vec<Variable>),
    Variable(Option<Variable>),
    PendingExecutions(Vec<PendingExecution>),
    /// Whether the app is locked.
    AppLock(bool),
}

impl EntityRef {
    pub fn project(&self, state: &StoreState) -> Observed {
        match *self {
            EntityRef::Base => Observed::Base(state.base().cloned()),
            EntityRef::Categories => {
                Observed::Categories(state.categories().into_iter().cloned().collect())
            }
            EntityRef::Category(id) => Observed::Category(state.category(id).cloned()),
            EntityRef::Shortcut(id) => Observed::Shortcut(state.shortcut(id).cloned()),
            EntityRef::Variables => {
                Observed::Variables(state.variables().into_iter().cloned().collect())
            }
            EntityRef::Variable(id) => Observed::Variable(state.variable(id).cloned()),
            EntityRef::PendingExecutions => Observed::PendingExecutions(
                state.pending_executions().into_iter().cloned().collect(),
            ),
            EntityRef::AppLock => Observed::AppLock(state.is_locked()),
        }
    }
}

/// Newest value that did not fit in an observer's channel.
type Overflow<T> = Arc<StdMutex<Option<T>>>;

fn take_overflow<T>(overflow: &Overflow<T>) -> Option<T> {
    overflow.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Receiving end of a subscription. Dropping it unsubscribes.
///
/// Values arrive in commit order. When the channel is full the newest value
/// is parked and handed out once the buffered ones are consumed, so an
/// observer that falls behind still ends on the final state.
pub struct Observer<T> {
    id: SubscriptionId,
    receiver: mpsc::Receiver<T>,
    overflow: Overflow<T>,
}

impl<T> Observer<T> {
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    /// Wait for the next value. `None` once the store has shut down.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(value) = self.try_recv() {
            return Some(value);
        }
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        if let Ok(value) = self.receiver.try_recv() {
            return Some(value);
        }
        take_overflow(&self.overflow)
    }

    /// Skip to the newest available value.
    pub fn latest(&mut self) -> Option<T> {
        let mut newest = None;
        while let Some(value) = self.try_recv() {
            newest = Some(value);
        }
        newest
    }
}

enum DeliveryStatus {
    Delivered,
    Unchanged,
    Parked,
    Closed,
}

trait Delivery: Send {
    fn id(&self) -> &SubscriptionId;
    fn deliver(&mut self, state: &StoreState) -> DeliveryStatus;
}

type Projection<T> = Box<dyn Fn(&StoreState) -> T + Send + Sync>;

struct Subscription<T> {
    id: SubscriptionId,
    project: Projection<T>,
    /// Last value handed to the observer.
    last: T,
    sender: mpsc::Sender<T>,
    overflow: Overflow<T>,
}

impl<T: Clone + PartialEq + Send + 'static> Delivery for Subscription<T> {
    fn id(&self) -> &SubscriptionId {
        &self.id
    }

    fn deliver(&mut self, state: &StoreState) -> DeliveryStatus {
        if self.sender.is_closed() {
            return DeliveryStatus::Closed;
        }
        let value = (self.project)(state);
        if value == self.last {
            return DeliveryStatus::Unchanged;
        }
        self.last = value.clone();

        // Once a value is parked, newer ones replace it so nothing overtakes it.
        let mut parked = self.overflow.lock().unwrap_or_else(PoisonError::into_inner);
        if parked.is_some() {
            *parked = Some(value);
            return DeliveryStatus::Parked;
        }
        match self.sender.try_send(value) {
            Ok(()) => DeliveryStatus::Delivered,
            Err(mpsc::error::TrySendError::Full(value)) => {
                debug!(
                    subscription_id = ?self.id.0,
                    "Observer channel full, parking latest value"
                );
                *parked = Some(value);
                DeliveryStatus::Parked
            }
            Err(mpsc::error::TrySendError::Closed(_)) => DeliveryStatus::Closed,
        }
    }
}

struct RouterInner {
    sequence: u64,
    state: Arc<StoreState>,
    subscriptions: Vec<Box<dyn Delivery>>,
}

/// Fans committed state out to observers.
///
/// Publication and subscription serialize on one lock, so a new observer's
/// initial value and its first notification are never out of order, and every
/// observer sees commits in commit order.
pub struct ObserverRouter {
    inner: Mutex<RouterInner>,
    buffer: usize,
}

impl ObserverRouter {
    pub fn new(state: Arc<StoreState>, sequence: u64, buffer: usize) -> Self {
        Self {
            inner: Mutex::new(RouterInner {
                sequence,
                state,
                subscriptions: Vec::new(),
            }),
            buffer: buffer.max(1),
        }
    }

    /// Register a projection. Its current value is delivered immediately,
    /// after that only when a commit changes it.
    pub async fn subscribe<T, F>(&self, project: F) -> Observer<T>
    where
        T: Clone + PartialEq + Send + 'static,
        F: Fn(&StoreState) -> T + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let overflow: Overflow<T> = Arc::new(StdMutex::new(None));
        let id = SubscriptionId::new();

        let mut inner = self.inner.lock().await;
        let initial = project(&inner.state);
        // A fresh channel always has room for one value.
        let _ = sender.try_send(initial.clone());
        inner.subscriptions.push(Box::new(Subscription {
            id: id.clone(),
            project: Box::new(project),
            last: initial,
            sender,
            overflow: overflow.clone(),
        }));
        debug!(subscription_id = ?id.0, sequence = inner.sequence, "New observer registered");

        Observer {
            id,
            receiver,
            overflow,
        }
    }

    pub async fn subscribe_ref(&self, entity: EntityRef) -> Observer<Observed> {
        self.subscribe(move |state| entity.project(state)).await
    }

    /// Deliver a committed state to every observer whose value changed.
    /// Returns the number of observers notified.
    pub async fn publish(&self, sequence: u64, state: Arc<StoreState>) -> usize {
        let mut inner = self.inner.lock().await;
        inner.sequence = sequence;
        inner.state = state.clone();

        let mut delivered = 0;
        let before = inner.subscriptions.len();
        inner
            .subscriptions
            .retain_mut(|sub| match sub.deliver(&state) {
                DeliveryStatus::Delivered => {
                    delivered += 1;
                    true
                }
                DeliveryStatus::Parked => {
                    delivered += 1;
                    true
                }
                DeliveryStatus::Unchanged => true,
                DeliveryStatus::Closed => false,
            });

        let removed = before - inner.subscriptions.len();
        if removed > 0 {
            debug!(removed, "Cleaned up closed observers");
        }
        delivered
    }

    pub async fn unsubscribe(&self, id: &SubscriptionId) {
        let mut inner = self.inner.lock().await;
        inner.subscriptions.retain(|s| s.id() != id);
        debug!(subscription_id = ?id.0, "Observer removed");
    }

    pub async fn subscription_count(&self) -> usize {
        self.inner.lock().await.subscriptions.len()
    }
}
