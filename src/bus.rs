//! Topic-keyed publish/subscribe bus.
//!
//! ```text
//! Publishers (many):              Subscribers (per topic):
//!   Launcher ──┐                    ┌──► Subscription (dashboard, task)
//!   Tally    ──┼──► EventBus ──────┼──► Subscription (dashboard, dag)
//!   ...      ──┘   (topic map)      └──► Subscription (headless, task)
//! ```
//!
//! Each subscription owns a bounded tokio mpsc receiver; the bus keeps the
//! matching senders in a per-topic slot.
//!
//! ## Rules
//! - **Per-topic order**: delivery happens under the topic's lock, so every
//!   subscriber of a topic sees publishes in the same order.
//! - **Drop-newest**: when a subscriber's buffer is full the new event is
//!   dropped for that subscriber only and counted in [`Subscription::dropped`].
//!   Publishers never wait.
//! - **Isolation**: topics have separate slots; publishing to one topic only
//!   touches the shared map long enough to find its slot.
//! - **Close**: drops every sender so all subscriptions terminate after
//!   draining what they already hold. Later publishes and subscribes are
//!   no-ops.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

use crate::event::{Event, Topic};
use crate::{olog_debug, olog_trace};

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one subscription, unique across every bus in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

#[derive(Default)]
struct TopicSlot {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl TopicSlot {
    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct EventBus {
    topics: RwLock<HashMap<Topic, Arc<TopicSlot>>>,
    closed: AtomicBool,
    capacity: usize,
}

impl EventBus {
    /// Create a bus whose subscriptions each buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register interest in `topic`.
    ///
    /// The subscription receives every event published to `topic` after this
    /// call returns. On a closed bus the subscription is already terminated.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let id = SubscriberId(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let subscription = Subscription {
            id,
            topic,
            rx,
            dropped: dropped.clone(),
        };

        let Some(slot) = self.slot_for_subscribe(topic) else {
            olog_debug!("EventBus::subscribe on closed bus topic={}", topic);
            return subscription;
        };
        slot.lock().push(Subscriber { id, tx, dropped });
        olog_debug!("EventBus::subscribe topic={} id={}", topic, id.0);
        subscription
    }

    /// Deliver `event` to every current subscriber of `topic`.
    pub fn publish(&self, topic: Topic, event: Event) {
        if self.is_closed() {
            return;
        }
        let Some(slot) = self.read_topics().get(&topic).cloned() else {
            return;
        };

        let mut subscribers = slot.lock();
        subscribers.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let total = sub.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                olog_debug!(
                    "EventBus: subscriber {} on {} is full, dropped event ({} total)",
                    sub.id.0,
                    topic,
                    total
                );
                true
            }
            Err(TrySendError::Closed(_)) => {
                olog_debug!("EventBus: pruning closed subscriber {} on {}", sub.id.0, topic);
                false
            }
        });
        olog_trace!(
            "EventBus::publish topic={} subscribers={}",
            topic,
            subscribers.len()
        );
    }

    /// Publish on the event's own topic.
    pub fn emit(&self, event: impl Into<Event>) {
        let event = event.into();
        self.publish(event.topic(), event);
    }

    /// Remove one subscriber. Unknown or already-removed subscriptions are ignored.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        let Some(slot) = self.read_topics().get(&subscription.topic).cloned() else {
            return;
        };
        let mut subscribers = slot.lock();
        let before = subscribers.len();
        subscribers.retain(|sub| sub.id != subscription.id);
        if subscribers.len() != before {
            olog_debug!(
                "EventBus::unsubscribe topic={} id={}",
                subscription.topic,
                subscription.id.0
            );
        }
    }

    /// Terminate every subscription. Safe to call more than once.
    pub fn close(&self) {
        let mut topics = self.write_topics();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for (topic, slot) in topics.drain() {
            let mut subscribers = slot.lock();
            olog_debug!(
                "EventBus::close topic={} closing {} subscribers",
                topic,
                subscribers.len()
            );
            subscribers.clear();
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.read_topics()
            .get(&topic)
            .map(|slot| slot.lock().len())
            .unwrap_or(0)
    }

    fn slot_for_subscribe(&self, topic: Topic) -> Option<Arc<TopicSlot>> {
        {
            let topics = self.read_topics();
            if self.is_closed() {
                return None;
            }
            if let Some(slot) = topics.get(&topic) {
                return Some(slot.clone());
            }
        }
        let mut topics = self.write_topics();
        if self.is_closed() {
            return None;
        }
        Some(topics.entry(topic).or_default().clone())
    }

    fn read_topics(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Topic, Arc<TopicSlot>>> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_topics(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Topic, Arc<TopicSlot>>> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_BUFFER)
    }
}

/// One consumer's ordered view of a topic.
///
/// Yields `None` once the bus is closed or the subscription was removed and
/// every buffered event has been read.
pub struct Subscription {
    id: SubscriberId,
    topic: Topic,
    rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Wait for the next event.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking receive, usable from plain threads.
    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.rx.try_recv()
    }

    /// Number of events dropped because this subscription's buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("dropped", &self.dropped())
            .finish()
    }
}
