use std::sync::{Arc, Mutex, Weak};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync + 'static>;

struct BusInner<E> {
    next_id: u64,
    subscribers: Vec<(u64, Handler<E>)>,
}

/// In-process publish/subscribe channel with synchronous delivery in
/// subscription order.
///
/// `subscribe` returns a [`Subscription`] guard; dropping the guard removes
/// the subscriber, so release is tied to scope instead of a remembered
/// unsubscribe call.
pub struct EventBus<E> {
    inner: Arc<Mutex<BusInner<E>>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    #[must_use = "dropping the subscription immediately unsubscribes the handler"]
    pub fn subscribe(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> Subscription<E> {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(handler)));

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn publish(&self, event: &E) {
        // Snapshot the handler list so re-entrant subscribe/unsubscribe from a
        // handler cannot deadlock; delivery order stays the subscription order.
        let handlers = {
            let inner = match self.inner.lock() {
                Ok(inner) => inner,
                Err(poisoned) => poisoned.into_inner(),
            };
            inner
                .subscribers
                .iter()
                .map(|(_, handler)| Arc::clone(handler))
                .collect::<Vec<_>>()
        };

        for handler in handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.subscribers.len(),
            Err(poisoned) => poisoned.into_inner().subscribers.len(),
        }
    }
}

/// Scoped subscription handle; unsubscribes on drop.
pub struct Subscription<E> {
    id: u64,
    bus: Weak<Mutex<BusInner<E>>>,
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            let mut inner = match inner.lock() {
                Ok(inner) => inner,
                Err(poisoned) => poisoned.into_inner(),
            };
            inner.subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_in_subscription_order() {
        let bus: EventBus<u32> = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first_log = Arc::clone(&log);
        let _first = bus.subscribe(move |value| {
            first_log.lock().expect("lock").push(("first", *value));
        });
        let second_log = Arc::clone(&log);
        let _second = bus.subscribe(move |value| {
            second_log.lock().expect("lock").push(("second", *value));
        });

        bus.publish(&7);

        assert_eq!(
            log.lock().expect("lock").as_slice(),
            &[("first", 7), ("second", 7)]
        );
    }

    #[test]
    fn dropping_the_guard_unsubscribes() {
        let bus: EventBus<u32> = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counting = Arc::clone(&count);
        let subscription = bus.subscribe(move |_| {
            counting.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&1);
        drop(subscription);
        bus.publish(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
