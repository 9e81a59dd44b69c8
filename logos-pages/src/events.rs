//! Fan-out of server-pushed and derived client events.
//!
//! Delivery is synchronous: [`EventBus::emit`] calls every handler registered
//! for the event's kind, in registration order, before returning. Nothing is
//! buffered on the bus itself, so a subscriber registered after an emission
//! never sees it. [`EventBus::stream`] bridges to an async receiver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::changes::Cursor;
use crate::registry::PageMeta;

/// Events delivered to application subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Transport reported a (re)connect
    Connected,
    /// Transport went away; pending requests have been failed
    Disconnected,
    CursorSnapshot {
        page: String,
        cursors: HashMap<String, Cursor>,
    },
    PageCreated(PageMeta),
    PageChanged(PageMeta),
    PageDeleted(String),
    /// Derived: the registry membership changed
    PageListUpdated(Vec<PageMeta>),
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::CursorSnapshot { .. } => EventKind::CursorSnapshot,
            Self::PageCreated(_) => EventKind::PageCreated,
            Self::PageChanged(_) => EventKind::PageChanged,
            Self::PageDeleted(_) => EventKind::PageDeleted,
            Self::PageListUpdated(_) => EventKind::PageListUpdated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    CursorSnapshot,
    PageCreated,
    PageChanged,
    PageDeleted,
    PageListUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        Self::Connected,
        Self::Disconnected,
        Self::CursorSnapshot,
        Self::PageCreated,
        Self::PageChanged,
        Self::PageDeleted,
        Self::PageListUpdated,
    ];

    /// Page lifecycle events plus the derived list update.
    pub const PAGE_LIFECYCLE: [EventKind; 4] = [
        Self::PageCreated,
        Self::PageChanged,
        Self::PageDeleted,
        Self::PageListUpdated,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

#[derive(Clone)]
enum Sink {
    Callback(Callback),
    Channel(mpsc::UnboundedSender<ClientEvent>),
}

struct Subscriber {
    id: SubscriptionId,
    kinds: Vec<EventKind>,
    sink: Sink,
}

/// Typed publish/subscribe hub.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    emitted: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            emitted: AtomicU64::new(0),
        }
    }

    /// Register a handler for one event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.on_many(&[kind], handler)
    }

    /// Register one handler for several event kinds at once.
    pub fn on_many<F>(&self, kinds: &[EventKind], handler: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.register(kinds, Sink::Callback(Arc::new(handler)))
    }

    /// Async receiver for the given kinds. Dropping it unsubscribes on the next emission.
    pub fn stream(&self, kinds: &[EventKind]) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(kinds, Sink::Channel(tx));
        rx
    }

    fn register(&self, kinds: &[EventKind], sink: Sink) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber {
            id,
            kinds: kinds.to_vec(),
            sink,
        });
        id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Deliver `event` to every matching subscriber. Returns how many received it.
    pub fn emit(&self, event: &ClientEvent) -> usize {
        let kind = event.kind();
        // Handlers run outside the lock so they may subscribe or unsubscribe.
        let sinks: Vec<(SubscriptionId, Sink)> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.kinds.contains(&kind))
            .map(|s| (s.id, s.sink.clone()))
            .collect();

        self.emitted.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sink) in sinks {
            match sink {
                Sink::Callback(handler) => {
                    handler(event);
                    delivered += 1;
                }
                Sink::Channel(tx) => {
                    if tx.send(event.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        dead.push(id);
                    }
                }
            }
        }

        if !dead.is_empty() {
            self.subscribers.write().retain(|s| !dead.contains(&s.id));
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Total number of events emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_delivery_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let log = log.clone();
            bus.on(EventKind::Connected, move |_| log.lock().push(tag));
        }

        assert_eq!(bus.emit(&ClientEvent::Connected), 3);
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_only_matching_kind_fires() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let h = hits.clone();
        bus.on(EventKind::PageDeleted, move |_| {
            h.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(&ClientEvent::Connected);
        bus.emit(&ClientEvent::PageDeleted("a".into()));
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_emission() {
        let bus = EventBus::new();
        bus.emit(&ClientEvent::Connected);

        let hits = Arc::new(AtomicU64::new(0));
        let h = hits.clone();
        bus.on(EventKind::Connected, move |_| {
            h.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        assert_eq!(bus.emitted(), 1);
    }

    #[test]
    fn test_on_many_and_off() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let id = bus.on_many(&EventKind::PAGE_LIFECYCLE, move |e| s.lock().push(e.kind()));

        bus.emit(&ClientEvent::PageCreated(PageMeta::new("a")));
        bus.emit(&ClientEvent::PageListUpdated(vec![]));
        bus.emit(&ClientEvent::Connected);
        assert_eq!(
            *seen.lock(),
            vec![EventKind::PageCreated, EventKind::PageListUpdated]
        );

        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(&ClientEvent::PageDeleted("a".into()));
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.on(EventKind::Connected, move |_| {
            inner.on(EventKind::Disconnected, |_| {});
        });

        bus.emit(&ClientEvent::Connected);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_stream_receives_and_prunes_when_dropped() {
        let bus = EventBus::new();
        let mut rx = bus.stream(&[EventKind::PageDeleted]);

        bus.emit(&ClientEvent::PageDeleted("gone".into()));
        assert_eq!(rx.recv().await, Some(ClientEvent::PageDeleted("gone".into())));

        drop(rx);
        assert_eq!(bus.emit(&ClientEvent::PageDeleted("again".into())), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
