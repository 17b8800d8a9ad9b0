//! Notification bus for keep-synced relations.
//!
//! A typed observer seam: subscribers register per entity type and event
//! kind, and saves/deletes fire structured payloads. Everything is
//! single-threaded and request-scoped, so callbacks run synchronously
//! inside the firing call. The bus is optional; relations simply skip
//! cache mirroring when the context carries none.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use loam_sql_core::SqlValue;

/// Event kinds a subscriber can listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Subject was saved.
    Saved,
    /// Subject was deleted.
    Deleted,
}

/// A fired notification.
pub enum Notification {
    /// Subject was saved.
    Saved {
        /// The saved object, downcast by typed subscribers.
        subject: Rc<dyn Any>,
        /// The subject's primary key.
        pk: SqlValue,
        /// Attribute names that changed in this save.
        changed: Vec<String>,
        /// Association table name to parent keys the subject was added under.
        attached: HashMap<String, Vec<SqlValue>>,
        /// Association table name to parent keys the subject was removed from.
        detached: HashMap<String, Vec<SqlValue>>,
    },
    /// Subject was deleted.
    Deleted {
        /// The deleted subject's primary key.
        pk: SqlValue,
    },
}

impl Notification {
    /// Returns the event kind of this notification.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Saved { .. } => EventKind::Saved,
            Self::Deleted { .. } => EventKind::Deleted,
        }
    }
}

/// Handle for removing a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Rc<dyn Fn(&Notification)>;

/// Subscribe/fire registry keyed by entity type name and event kind.
#[derive(Default)]
pub struct NotificationBus {
    next_id: Cell<u64>,
    subscribers: RefCell<HashMap<(String, EventKind), Vec<(SubscriptionId, Callback)>>>,
}

impl NotificationBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for `type_name` events of `kind`.
    pub fn subscribe(
        &self,
        type_name: &str,
        kind: EventKind,
        callback: impl Fn(&Notification) + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.subscribers
            .borrow_mut()
            .entry((type_name.to_string(), kind))
            .or_default()
            .push((id, Rc::new(callback)));
        id
    }

    /// Removes a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        for subs in self.subscribers.borrow_mut().values_mut() {
            subs.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Fires a notification to every subscriber of its type and kind.
    ///
    /// Callbacks run synchronously, in registration order.
    pub fn fire(&self, type_name: &str, notification: &Notification) {
        let callbacks: Vec<Callback> = self
            .subscribers
            .borrow()
            .get(&(type_name.to_string(), notification.kind()))
            .map(|subs| subs.iter().map(|(_, cb)| Rc::clone(cb)).collect())
            .unwrap_or_default();
        // Callbacks may subscribe/unsubscribe, hence the snapshot above
        for cb in callbacks {
            cb(notification);
        }
    }
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscriptions", &self.subscribers.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deleted(pk: i64) -> Notification {
        Notification::Deleted {
            pk: SqlValue::Int(pk),
        }
    }

    #[test]
    fn fire_reaches_matching_subscribers_only() {
        let bus = NotificationBus::new();
        let hits = Rc::new(Cell::new(0));

        let h = Rc::clone(&hits);
        bus.subscribe("books", EventKind::Deleted, move |_| h.set(h.get() + 1));
        let h = Rc::clone(&hits);
        bus.subscribe("books", EventKind::Saved, move |_| h.set(h.get() + 10));

        bus.fire("books", &deleted(1));
        bus.fire("authors", &deleted(2));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = NotificationBus::new();
        let hits = Rc::new(Cell::new(0));

        let h = Rc::clone(&hits);
        let id = bus.subscribe("books", EventKind::Deleted, move |_| h.set(h.get() + 1));
        bus.fire("books", &deleted(1));
        bus.unsubscribe(id);
        bus.fire("books", &deleted(1));
        assert_eq!(hits.get(), 1);
    }
}
