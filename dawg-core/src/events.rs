//! Typed publish/subscribe for transport notifications.
//!
//! Listeners for a kind are called in subscription order. A listener that
//! returns an error or panics is logged and skipped; the others still run.

use std::panic::{self, AssertUnwindSafe};

use dawg_types::{SubscriptionId, TransportEvent, TransportEventKind};

pub type Listener = Box<dyn FnMut(&TransportEvent) -> Result<(), String> + Send>;

struct Subscription {
    id: SubscriptionId,
    kind: TransportEventKind,
    listener: Listener,
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: TransportEventKind, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription { id, kind, listener });
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn has_listeners(&self, kind: TransportEventKind) -> bool {
        self.subscriptions.iter().any(|s| s.kind == kind)
    }

    pub fn listener_count(&self, kind: TransportEventKind) -> usize {
        self.subscriptions.iter().filter(|s| s.kind == kind).count()
    }

    /// Deliver `event` to every listener of its kind. Returns how many
    /// listeners completed without error.
    pub fn emit(&mut self, event: &TransportEvent) -> usize {
        let kind = event.kind();
        let mut delivered = 0;
        for sub in self.subscriptions.iter_mut().filter(|s| s.kind == kind) {
            let listener = &mut sub.listener;
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    log::warn!(target: "events", "{} listener {} failed: {}", kind.as_str(), sub.id.get(), e);
                }
                Err(_) => {
                    log::warn!(target: "events", "{} listener {} panicked", kind.as_str(), sub.id.get());
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Listener {
        let log = Arc::clone(log);
        Box::new(move |event| {
            log.lock().unwrap().push(format!("{}:{}", tag, event.kind().as_str()));
            Ok(())
        })
    }

    #[test]
    fn delivers_in_subscription_order_by_kind() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe(TransportEventKind::Stop, recorder(&log, "a"));
        bus.subscribe(TransportEventKind::Loop, recorder(&log, "x"));
        bus.subscribe(TransportEventKind::Stop, recorder(&log, "b"));

        assert_eq!(bus.emit(&TransportEvent::Stop), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a:stop", "b:stop"]);
    }

    #[test]
    fn failing_listener_is_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe(TransportEventKind::Stop, Box::new(|_| Err("nope".into())));
        bus.subscribe(TransportEventKind::Stop, Box::new(|_| panic!("listener bug")));
        bus.subscribe(TransportEventKind::Stop, recorder(&log, "ok"));

        assert_eq!(bus.emit(&TransportEvent::Stop), 1);
        assert_eq!(*log.lock().unwrap(), vec!["ok:stop"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        let id = bus.subscribe(TransportEventKind::Stop, recorder(&log, "a"));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.emit(&TransportEvent::Stop), 0);
        assert!(log.lock().unwrap().is_empty());
        assert!(!bus.has_listeners(TransportEventKind::Stop));
    }
}
