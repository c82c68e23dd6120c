#![forbid(unsafe_code)]

//! Consumer side of the context protocol.
//!
//! # Design
//!
//! A [`ContextConsumer`] is a behavior attached to the requesting
//! element. On connect it dispatches one [`ContextRequest`] from its host
//! carrying a *stable-identity* [`Delivery`] — the same [`CallbackId`]
//! across every dispatch by this instance, which is what lets providers
//! deduplicate it during re-parenting. On disconnect it invokes and
//! clears any held teardown handle, so detaching never leaves a live
//! subscription behind.
//!
//! # Delivery handling
//!
//! When a provider invokes the callback:
//!
//! 1. If a teardown handle is already held and the incoming one belongs
//!    to a different registration, a closer provider has taken over:
//!    the first-delivery marker is reset and the *old* handle is invoked
//!    to detach from the previous provider.
//! 2. A non-subscribing consumer immediately invokes the incoming handle
//!    — one-shot delivery never holds a live subscription, even
//!    transiently.
//! 3. The value is stored unconditionally, repeat deliveries included,
//!    so downstream reactivity re-fires.
//! 4. The user callback runs only on the first-ever delivery or when the
//!    consumer subscribed.
//! 5. The incoming handle becomes the current one.
//!
//! # Failure Modes
//!
//! - No provider ever claims the request: `value()` stays `None`
//!   indefinitely. This is the normal pending state, not an error; a
//!   [`ContextRoot`](crate::ContextRoot) installed above can replay the
//!   request once a provider appears.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use arbor_tree::{Behavior, ElementId, Tree};
use tracing::{debug, trace};

use crate::event::{ContextRequest, Delivery, Payload, Unsubscribe};
use crate::key::ContextKey;

/// Requests a context value on behalf of its host element.
///
/// Create with [`ContextConsumer::new`] (one-shot) or
/// [`ContextConsumer::subscribed`] (live updates), then attach to the
/// host via [`Tree::attach_behavior`].
pub struct ContextConsumer<T: 'static> {
    context: ContextKey<T>,
    subscribe: bool,
    host: Cell<Option<ElementId>>,
    value: RefCell<Option<Rc<T>>>,
    provided: Cell<bool>,
    unsubscribe: RefCell<Option<Unsubscribe>>,
    callback: Option<Box<dyn Fn(&T)>>,
    delivery: Delivery,
}

impl<T: 'static> ContextConsumer<T> {
    /// One-shot consumer: receives the value once and declines updates.
    #[must_use]
    pub fn new(context: ContextKey<T>) -> Rc<Self> {
        Self::build(context, false, None)
    }

    /// Subscribed consumer: receives the value and every later change.
    #[must_use]
    pub fn subscribed(context: ContextKey<T>) -> Rc<Self> {
        Self::build(context, true, None)
    }

    /// Consumer with a user callback invoked per the delivery rules.
    #[must_use]
    pub fn with_callback(
        context: ContextKey<T>,
        subscribe: bool,
        callback: impl Fn(&T) + 'static,
    ) -> Rc<Self> {
        Self::build(context, subscribe, Some(Box::new(callback)))
    }

    fn build(
        context: ContextKey<T>,
        subscribe: bool,
        callback: Option<Box<dyn Fn(&T)>>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let delivery = Delivery::new(move |payload, unsubscribe| {
                if let Some(consumer) = weak.upgrade() {
                    consumer.deliver(payload, unsubscribe);
                }
            });
            Self {
                context,
                subscribe,
                host: Cell::new(None),
                value: RefCell::new(None),
                provided: Cell::new(false),
                unsubscribe: RefCell::new(None),
                callback,
                delivery,
            }
        })
    }

    /// The requested channel.
    #[must_use]
    pub fn context(&self) -> ContextKey<T> {
        self.context
    }

    /// Whether live updates were requested.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscribe
    }

    /// Whether at least one delivery has occurred from the current
    /// provider.
    #[must_use]
    pub fn provided(&self) -> bool {
        self.provided.get()
    }

    /// Last delivered value, cloned.
    #[must_use]
    pub fn value(&self) -> Option<T>
    where
        T: Clone,
    {
        self.value.borrow().as_deref().cloned()
    }

    /// Access the last delivered value by reference.
    pub fn with_value<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        f(self.value.borrow().as_deref())
    }

    fn stable_delivery(&self) -> Delivery {
        self.delivery.clone()
    }

    fn deliver(&self, payload: Payload, unsubscribe: Option<Unsubscribe>) {
        let Ok(value) = payload.downcast::<T>() else {
            // A different value type under the same key id cannot happen
            // through the typed API; drop the delivery rather than panic.
            return;
        };

        // Step 1: a handle from a different registration means a closer
        // provider has taken over. Detach from the previous one.
        let stale = {
            let held = self.unsubscribe.borrow();
            match (held.as_ref(), unsubscribe.as_ref()) {
                (Some(old), Some(new)) if !old.same_registration(new) => Some(old.clone()),
                (Some(old), None) => Some(old.clone()),
                _ => None,
            }
        };
        if let Some(old) = stale {
            trace!(callback = self.delivery.id().raw(), "provider hand-off");
            self.provided.set(false);
            *self.unsubscribe.borrow_mut() = None;
            old.invoke();
        }

        // Step 2: one-shot consumers decline future updates immediately.
        if !self.subscribe {
            if let Some(incoming) = &unsubscribe {
                incoming.invoke();
            }
        }

        // Step 3: always store, so repeat deliveries still re-trigger
        // anything watching this consumer.
        let first = !self.provided.get();
        *self.value.borrow_mut() = Some(value);
        self.provided.set(true);

        // Step 4.
        if first || self.subscribe {
            if let Some(callback) = &self.callback {
                let current = self.value.borrow().clone();
                if let Some(current) = current {
                    callback(&*current);
                }
            }
        }

        // Step 5.
        *self.unsubscribe.borrow_mut() = unsubscribe;
    }
}

impl<T: 'static> Behavior for ContextConsumer<T> {
    fn bind(&self, host: ElementId) {
        self.host.set(Some(host));
    }

    fn unbind(&self) {
        self.host.set(None);
    }

    fn on_connect(&self, tree: &Tree, host: ElementId) {
        self.host.set(Some(host));
        debug!(
            context = self.context.name(),
            host = ?host,
            subscribe = self.subscribe,
            "consumer requesting context"
        );
        let request = ContextRequest::new(self.context.id(), self.stable_delivery(), self.subscribe);
        let _ = tree.dispatch(host, request);
    }

    fn on_disconnect(&self, _tree: &Tree, _host: ElementId) {
        if let Some(unsubscribe) = self.unsubscribe.borrow_mut().take() {
            unsubscribe.invoke();
        }
    }
}

impl<T: 'static> std::fmt::Debug for ContextConsumer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextConsumer")
            .field("context", &self.context)
            .field("subscribe", &self.subscribe)
            .field("provided", &self.provided.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deliver_u32(consumer: &ContextConsumer<u32>, value: u32, unsubscribe: Option<Unsubscribe>) {
        consumer.deliver(Rc::new(value), unsubscribe);
    }

    #[test]
    fn first_delivery_sets_value_and_provided() {
        let key = ContextKey::new("n");
        let consumer = ContextConsumer::subscribed(key);
        assert!(!consumer.provided());
        assert_eq!(consumer.value(), None);

        deliver_u32(&consumer, 10, Some(Unsubscribe::new(|| {})));
        assert!(consumer.provided());
        assert_eq!(consumer.value(), Some(10));
    }

    #[test]
    fn one_shot_immediately_unsubscribes() {
        use std::cell::Cell as StdCell;
        let key = ContextKey::new("n");
        let consumer = ContextConsumer::new(key);
        let released = Rc::new(StdCell::new(false));
        let released_in = Rc::clone(&released);

        deliver_u32(
            &consumer,
            10,
            Some(Unsubscribe::new(move || released_in.set(true))),
        );
        assert!(released.get());
        assert_eq!(consumer.value(), Some(10));
    }

    #[test]
    fn callback_runs_once_for_one_shot() {
        use std::cell::Cell as StdCell;
        let key = ContextKey::new("n");
        let calls = Rc::new(StdCell::new(0u32));
        let calls_in = Rc::clone(&calls);
        let consumer =
            ContextConsumer::with_callback(key, false, move |_| calls_in.set(calls_in.get() + 1));

        let unsub = Unsubscribe::new(|| {});
        deliver_u32(&consumer, 1, Some(unsub.clone()));
        // Repeat delivery from the same registration.
        deliver_u32(&consumer, 2, Some(unsub));
        assert_eq!(calls.get(), 1);
        // The value still updates (step 3).
        assert_eq!(consumer.value(), Some(2));
    }

    #[test]
    fn callback_runs_per_delivery_when_subscribed() {
        use std::cell::RefCell as StdRefCell;
        let key = ContextKey::new("n");
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen_in = Rc::clone(&seen);
        let consumer =
            ContextConsumer::with_callback(key, true, move |v: &u32| seen_in.borrow_mut().push(*v));

        let unsub = Unsubscribe::new(|| {});
        deliver_u32(&consumer, 1, Some(unsub.clone()));
        deliver_u32(&consumer, 2, Some(unsub));
        assert_eq!(seen.borrow().as_slice(), [1, 2]);
    }

    #[test]
    fn hand_off_releases_old_registration() {
        use std::cell::Cell as StdCell;
        let key = ContextKey::new("n");
        let consumer = ContextConsumer::subscribed(key);

        let old_released = Rc::new(StdCell::new(false));
        let old_in = Rc::clone(&old_released);
        deliver_u32(
            &consumer,
            1,
            Some(Unsubscribe::new(move || old_in.set(true))),
        );
        assert!(!old_released.get());

        // Delivery from a different registration: hand-off.
        deliver_u32(&consumer, 2, Some(Unsubscribe::new(|| {})));
        assert!(old_released.get());
        assert_eq!(consumer.value(), Some(2));
        assert!(consumer.provided());
    }

    #[test]
    fn same_registration_is_not_a_hand_off() {
        use std::cell::Cell as StdCell;
        let key = ContextKey::new("n");
        let consumer = ContextConsumer::subscribed(key);

        let released = Rc::new(StdCell::new(false));
        let released_in = Rc::clone(&released);
        let unsub = Unsubscribe::new(move || released_in.set(true));
        deliver_u32(&consumer, 1, Some(unsub.clone()));
        deliver_u32(&consumer, 2, Some(unsub));
        assert!(!released.get());
        assert_eq!(consumer.value(), Some(2));
    }

    #[test]
    fn mismatched_payload_type_is_dropped() {
        let key: ContextKey<u32> = ContextKey::new("n");
        let consumer = ContextConsumer::subscribed(key);
        consumer.deliver(Rc::new("not a u32"), None);
        assert!(!consumer.provided());
        assert_eq!(consumer.value(), None);
    }
}
