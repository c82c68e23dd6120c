#![forbid(unsafe_code)]

//! Per-provider subscription registry and change broadcast.
//!
//! # Design
//!
//! Subscriptions are keyed by [`CallbackId`], so a callback is registered
//! at most once per notifier no matter how many times its request reaches
//! the same provider — this is the structural dedupe that bounds
//! re-parenting recursion. Registering an already-present callback reuses
//! the existing entry *and its [`Unsubscribe`] handle*, so a request that
//! bubbles back to the provider already serving it is not mistaken for a
//! provider hand-off by the consumer.
//!
//! The registry lives behind an `Rc<RefCell<..>>` shared with the
//! teardown closures. Handles hold a `Weak` reference: once the notifier
//! is dropped, outstanding unsubscribes become inert.
//!
//! # Invariants
//!
//! 1. At most one live entry per [`CallbackId`].
//! 2. `register` returns the same handle (same token) for an already
//!    registered callback.
//! 3. `broadcast` iterates a snapshot: callbacks may unsubscribe or
//!    re-register mid-broadcast without skipping or double-delivering.
//! 4. An invoked handle removes exactly its own entry; a second
//!    invocation is a no-op.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use arbor_tree::ElementId;
use tracing::trace;

use crate::event::{CallbackId, Delivery, Payload, Unsubscribe};

struct Entry {
    host: ElementId,
    subscribe: bool,
    delivery: Delivery,
    unsubscribe: Unsubscribe,
}

/// Subscription registry plus current value for one provider.
pub struct ValueNotifier {
    value: RefCell<Option<Payload>>,
    entries: Rc<RefCell<AHashMap<CallbackId, Entry>>>,
}

impl ValueNotifier {
    /// Create a notifier, optionally seeded with an initial value.
    #[must_use]
    pub fn new(initial: Option<Payload>) -> Self {
        Self {
            value: RefCell::new(initial),
            entries: Rc::new(RefCell::new(AHashMap::new())),
        }
    }

    /// Current value, if one has been set.
    #[must_use]
    pub fn value(&self) -> Option<Payload> {
        self.value.borrow().clone()
    }

    /// Store a new value and broadcast it to every live subscription.
    pub fn set_value(&self, value: Payload) {
        *self.value.borrow_mut() = Some(value);
        self.broadcast();
    }

    /// Register a delivery callback for `host`.
    ///
    /// `subscribe` is the request's flag; a pending one-shot registration
    /// (valueless provider) records `false` so the re-parenting pass can
    /// tell it apart from a live subscription.
    ///
    /// Idempotent on [`CallbackId`]: a repeat registration refreshes the
    /// recorded host and flag and returns the existing handle unchanged.
    pub fn register(&self, delivery: Delivery, host: ElementId, subscribe: bool) -> Unsubscribe {
        let mut entries = self.entries.borrow_mut();
        let key = delivery.id();
        if let Some(existing) = entries.get_mut(&key) {
            existing.host = host;
            existing.subscribe = subscribe;
            return existing.unsubscribe.clone();
        }

        let weak = Rc::downgrade(&self.entries);
        let unsubscribe = Unsubscribe::new(move || {
            if let Some(entries) = weak.upgrade() {
                entries.borrow_mut().remove(&key);
            }
        });
        trace!(callback = key.raw(), host = ?host, "subscription registered");
        entries.insert(
            key,
            Entry {
                host,
                subscribe,
                delivery,
                unsubscribe: unsubscribe.clone(),
            },
        );
        unsubscribe
    }

    /// Drop the registration for `id`, if present.
    pub(crate) fn remove(&self, id: CallbackId) {
        self.entries.borrow_mut().remove(&id);
    }

    /// Deliver the current value to every live subscription.
    ///
    /// No-op until a value has been set. Entries are snapshotted first;
    /// teardown or re-registration triggered by a callback affects later
    /// broadcasts, not this one.
    pub fn broadcast(&self) {
        let Some(value) = self.value() else { return };
        let snapshot: Vec<(Delivery, Unsubscribe)> = self
            .entries
            .borrow()
            .values()
            .map(|entry| (entry.delivery.clone(), entry.unsubscribe.clone()))
            .collect();
        trace!(subscriptions = snapshot.len(), "broadcasting value change");
        for (delivery, unsubscribe) in snapshot {
            delivery.invoke(Rc::clone(&value), Some(unsubscribe));
        }
    }

    /// Snapshot of the current registrations, one per unique callback,
    /// for the re-parenting pass. The `bool` is each request's original
    /// subscribe flag.
    #[must_use]
    pub fn registrations(&self) -> Vec<(Delivery, ElementId, bool)> {
        self.entries
            .borrow()
            .values()
            .map(|entry| (entry.delivery.clone(), entry.host, entry.subscribe))
            .collect()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether there are no live subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl std::fmt::Debug for ValueNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueNotifier")
            .field("has_value", &self.value.borrow().is_some())
            .field("subscriptions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_tree::Tree;
    use std::cell::RefCell as StdRefCell;

    fn counting_delivery(seen: &Rc<StdRefCell<Vec<u32>>>) -> Delivery {
        let seen = Rc::clone(seen);
        Delivery::new(move |value, _| {
            if let Ok(v) = value.downcast::<u32>() {
                seen.borrow_mut().push(*v);
            }
        })
    }

    #[test]
    fn broadcast_reaches_all_entries() {
        let tree = Tree::new();
        let notifier = ValueNotifier::new(None);
        let a = Rc::new(StdRefCell::new(Vec::new()));
        let b = Rc::new(StdRefCell::new(Vec::new()));
        notifier.register(counting_delivery(&a), tree.root(), true);
        notifier.register(counting_delivery(&b), tree.root(), true);

        notifier.set_value(Rc::new(7u32));
        assert_eq!(a.borrow().as_slice(), [7]);
        assert_eq!(b.borrow().as_slice(), [7]);
    }

    #[test]
    fn no_broadcast_without_value() {
        let tree = Tree::new();
        let notifier = ValueNotifier::new(None);
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        notifier.register(counting_delivery(&seen), tree.root(), true);
        notifier.broadcast();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn repeat_registration_reuses_handle() {
        let tree = Tree::new();
        let notifier = ValueNotifier::new(None);
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let delivery = counting_delivery(&seen);

        let first = notifier.register(delivery.clone(), tree.root(), true);
        let second = notifier.register(delivery, tree.root(), true);
        assert!(first.same_registration(&second));
        assert_eq!(notifier.len(), 1);
    }

    #[test]
    fn unsubscribe_removes_only_its_entry() {
        let tree = Tree::new();
        let notifier = ValueNotifier::new(None);
        let a = Rc::new(StdRefCell::new(Vec::new()));
        let b = Rc::new(StdRefCell::new(Vec::new()));
        let unsub_a = notifier.register(counting_delivery(&a), tree.root(), true);
        notifier.register(counting_delivery(&b), tree.root(), true);

        unsub_a.invoke();
        assert_eq!(notifier.len(), 1);
        unsub_a.invoke(); // second invocation: no-op
        assert_eq!(notifier.len(), 1);

        notifier.set_value(Rc::new(1u32));
        assert!(a.borrow().is_empty());
        assert_eq!(b.borrow().as_slice(), [1]);
    }

    #[test]
    fn callback_may_unsubscribe_mid_broadcast() {
        let tree = Tree::new();
        let notifier = ValueNotifier::new(None);
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen_in = Rc::clone(&seen);
        let one_shot = Delivery::new(move |value, unsubscribe| {
            if let Ok(v) = value.downcast::<u32>() {
                seen_in.borrow_mut().push(*v);
            }
            if let Some(unsubscribe) = unsubscribe {
                unsubscribe.invoke();
            }
        });
        notifier.register(one_shot, tree.root(), false);

        notifier.set_value(Rc::new(1u32));
        notifier.set_value(Rc::new(2u32));
        assert_eq!(seen.borrow().as_slice(), [1]);
        assert!(notifier.is_empty());
    }

    #[test]
    fn handle_outlives_notifier_inertly() {
        let tree = Tree::new();
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let handle = {
            let notifier = ValueNotifier::new(None);
            notifier.register(counting_delivery(&seen), tree.root(), true)
        };
        // Notifier dropped; the handle must not panic or leak.
        handle.invoke();
    }

    #[test]
    fn registrations_snapshot_is_deduped() {
        let tree = Tree::new();
        let notifier = ValueNotifier::new(None);
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let delivery = counting_delivery(&seen);
        notifier.register(delivery.clone(), tree.root(), true);
        notifier.register(delivery.clone(), tree.root(), false);

        let snapshot = notifier.registrations();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0.id(), delivery.id());
        // The repeat registration refreshed the flag.
        assert!(!snapshot[0].2);
    }

    #[test]
    fn remove_drops_the_entry() {
        let tree = Tree::new();
        let notifier = ValueNotifier::new(None);
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let delivery = counting_delivery(&seen);
        notifier.register(delivery.clone(), tree.root(), false);
        assert_eq!(notifier.len(), 1);

        notifier.remove(delivery.id());
        assert!(notifier.is_empty());
        notifier.set_value(Rc::new(1u32));
        assert!(seen.borrow().is_empty());
    }
}
