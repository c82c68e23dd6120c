#![forbid(unsafe_code)]

//! Observable wiring: connect host reactivity to providers and consumers.
//!
//! This is glue above the protocol core, not part of it. It provides:
//!
//! - [`Observable`]: a shared, version-tracked value cell with change
//!   notification via subscriber callbacks and an RAII [`Watch`] guard.
//! - [`provide_observable`]: forward every observable change into a
//!   [`ContextProvider::set_value`] broadcast.
//! - [`consume_into`]: a subscribed consumer that writes each delivered
//!   value into an observable, re-triggering the host's own reactivity.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per mutation that changes the value.
//! 2. Subscribers are notified in registration order.
//! 3. Setting a value equal to the current one is a no-op (no version
//!    bump, no notifications).
//! 4. Dropping a [`Watch`] removes the callback before the next
//!    notification cycle.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::consumer::ContextConsumer;
use crate::key::ContextKey;
use crate::provider::ContextProvider;

static NEXT_WATCH_ID: AtomicU64 = AtomicU64::new(1);

type Subscriber<T> = Rc<dyn Fn(&T)>;

struct ObservableInner<T> {
    value: T,
    version: u64,
    subscribers: Vec<(u64, Subscriber<T>)>,
}

/// Shared single-threaded value cell with change subscriptions.
///
/// Cloning an `Observable` creates a new handle to the same inner state.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create an observable holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Current value, cloned.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Access the current value by reference.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Store a new value and notify subscribers. Equal values are a
    /// no-op.
    pub fn set(&self, value: T) {
        let (current, subscribers) = {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.value = value;
            inner.version += 1;
            let subscribers = inner
                .subscribers
                .iter()
                .map(|(_, sub)| Rc::clone(sub))
                .collect::<Vec<_>>();
            (inner.value.clone(), subscribers)
        };
        // No borrow held: subscribers may read or even set re-entrantly
        // (the equal-value no-op breaks update cycles).
        for subscriber in subscribers {
            subscriber(&current);
        }
    }

    /// Register a change subscriber; it fires on every future change
    /// until the returned [`Watch`] is dropped.
    #[must_use]
    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> Watch {
        let id = NEXT_WATCH_ID.fetch_add(1, Ordering::Relaxed);
        self.inner
            .borrow_mut()
            .subscribers
            .push((id, Rc::new(f)));

        let weak = Rc::downgrade(&self.inner);
        Watch {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .borrow_mut()
                        .subscribers
                        .retain(|(sub_id, _)| *sub_id != id);
                }
            })),
        }
    }

    /// Mutation count since creation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }
}

/// RAII guard for an [`Observable::subscribe`] registration.
///
/// Dropping the guard unsubscribes; [`Watch::forget`] leaks the
/// subscription for the observable's lifetime.
pub struct Watch {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Watch {
    /// Keep the subscription alive for the observable's whole life.
    pub fn forget(mut self) {
        self.cancel = None;
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Forward `source` into `provider`: the provider takes the observable's
/// current value immediately and re-broadcasts every later change.
///
/// The returned [`Watch`] owns the wiring; the provider is held weakly,
/// so dropping it makes the wiring inert.
#[must_use]
pub fn provide_observable<T: Clone + PartialEq + 'static>(
    provider: &Rc<ContextProvider<T>>,
    source: &Observable<T>,
) -> Watch {
    provider.set_value(source.get());
    let weak: Weak<ContextProvider<T>> = Rc::downgrade(provider);
    source.subscribe(move |value| {
        if let Some(provider) = weak.upgrade() {
            provider.set_value(value.clone());
        }
    })
}

/// Build a subscribed consumer that writes every delivered value into
/// `target`, re-triggering whatever reactivity hangs off it.
#[must_use]
pub fn consume_into<T: Clone + PartialEq + 'static>(
    context: ContextKey<T>,
    target: &Observable<T>,
) -> Rc<ContextConsumer<T>> {
    let target = target.clone();
    ContextConsumer::with_callback(context, true, move |value: &T| {
        target.set(value.clone());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_tree::Tree;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn set_notifies_in_registration_order() {
        let obs = Observable::new(0u32);
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let log_a = Rc::clone(&log);
        let log_b = Rc::clone(&log);
        let _wa = obs.subscribe(move |v| log_a.borrow_mut().push(format!("a{v}")));
        let _wb = obs.subscribe(move |v| log_b.borrow_mut().push(format!("b{v}")));

        obs.set(1);
        assert_eq!(log.borrow().as_slice(), ["a1", "b1"]);
        assert_eq!(obs.version(), 1);
    }

    #[test]
    fn equal_set_is_a_no_op() {
        let obs = Observable::new(5u32);
        let hits = Rc::new(StdRefCell::new(0u32));
        let hits_in = Rc::clone(&hits);
        let _watch = obs.subscribe(move |_| *hits_in.borrow_mut() += 1);

        obs.set(5);
        assert_eq!(*hits.borrow(), 0);
        assert_eq!(obs.version(), 0);
    }

    #[test]
    fn dropping_watch_unsubscribes() {
        let obs = Observable::new(0u32);
        let hits = Rc::new(StdRefCell::new(0u32));
        let hits_in = Rc::clone(&hits);
        let watch = obs.subscribe(move |_| *hits_in.borrow_mut() += 1);
        assert_eq!(obs.subscriber_count(), 1);

        drop(watch);
        assert_eq!(obs.subscriber_count(), 0);
        obs.set(1);
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn forget_keeps_subscription() {
        let obs = Observable::new(0u32);
        let hits = Rc::new(StdRefCell::new(0u32));
        let hits_in = Rc::clone(&hits);
        obs.subscribe(move |_| *hits_in.borrow_mut() += 1).forget();

        obs.set(1);
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn observable_feeds_provider() {
        let tree = Tree::new();
        let outer = tree.create_element();
        let inner = tree.create_element();
        tree.append(tree.root(), outer).unwrap();
        tree.append(outer, inner).unwrap();

        let key = ContextKey::new("n");
        let provider = ContextProvider::new(key);
        tree.attach_behavior(outer, provider.clone()).unwrap();

        let source = Observable::new(1u32);
        let _wiring = provide_observable(&provider, &source);
        assert_eq!(provider.value(), Some(1));

        let consumer = ContextConsumer::subscribed(key);
        tree.attach_behavior(inner, consumer.clone()).unwrap();
        assert_eq!(consumer.value(), Some(1));

        source.set(2);
        assert_eq!(consumer.value(), Some(2));
    }

    #[test]
    fn delivered_values_flow_into_observable() {
        let tree = Tree::new();
        let outer = tree.create_element();
        let inner = tree.create_element();
        tree.append(tree.root(), outer).unwrap();
        tree.append(outer, inner).unwrap();

        let key = ContextKey::new("n");
        let provider = ContextProvider::with_value(key, 10u32);
        tree.attach_behavior(outer, provider.clone()).unwrap();

        let target = Observable::new(0u32);
        let hits = Rc::new(StdRefCell::new(Vec::new()));
        let hits_in = Rc::clone(&hits);
        let _watch = target.subscribe(move |v| hits_in.borrow_mut().push(*v));

        let consumer = consume_into(key, &target);
        tree.attach_behavior(inner, consumer).unwrap();
        assert_eq!(target.get(), 10);

        provider.set_value(20);
        assert_eq!(target.get(), 20);
        assert_eq!(hits.borrow().as_slice(), [10, 20]);
    }

    #[test]
    fn wiring_goes_inert_when_provider_drops() {
        let key: ContextKey<u32> = ContextKey::new("n");
        let source = Observable::new(1u32);
        let wiring = {
            let provider = ContextProvider::new(key);
            provide_observable(&provider, &source)
        };
        // Provider dropped; setting must not panic.
        source.set(2);
        drop(wiring);
    }
}
