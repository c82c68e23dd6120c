#![forbid(unsafe_code)]

//! Provider side of the context protocol.
//!
//! # Design
//!
//! A [`ContextProvider`] is a behavior attached to the supplying element.
//! It owns a [`ValueNotifier`] and intercepts two events bubbling through
//! its host:
//!
//! - [`ContextRequest`]: claimed when the channel matches and the request
//!   did not originate on the provider's own host. The callback is
//!   registered and invoked once with the current value.
//! - [`ProviderAnnounce`]: a matching announcement from below means a
//!   closer provider now exists. For each unique registered callback, a
//!   fresh request carrying its original subscribe flag is re-dispatched
//!   from that consumer's host, giving the closer provider first claim;
//!   the announcement is then stopped, since providers further up have
//!   none of *our* subscribers to re-parent. Pending one-shot
//!   registrations (deferred by a valueless provider) are removed before
//!   the re-dispatch so they cannot be delivered twice; an unclaimed
//!   bubble-back re-registers them afresh.
//!
//! On connect the provider announces itself once, so an enclosing
//! provider can re-parent pre-existing subscriptions down to it.
//!
//! # Self-service exclusion
//!
//! An element that both provides and consumes the same context never
//! serves itself: requests and announcements originating on the
//! provider's own host are ignored and continue bubbling. This matches
//! the upstream protocol and is load-bearing; do not "fix" it.
//!
//! # Re-entrancy
//!
//! `set_value` synchronously invokes every subscriber, which may in turn
//! dispatch further requests or announcements. The recursion is bounded
//! by the notifier's per-callback dedupe and by snapshot-then-invoke
//! iteration; see [`ValueNotifier`].

use std::cell::Cell;
use std::rc::Rc;

use arbor_tree::{Behavior, ElementId, Event, Propagation, Tree};
use tracing::{debug, trace};

use crate::event::{ContextRequest, ProviderAnnounce};
use crate::key::ContextKey;
use crate::notifier::ValueNotifier;

/// Supplies a context value to descendants of its host element.
///
/// Create with [`ContextProvider::new`] or
/// [`ContextProvider::with_value`], attach via
/// [`Tree::attach_behavior`], and push updates with
/// [`set_value`](ContextProvider::set_value).
pub struct ContextProvider<T: 'static> {
    context: ContextKey<T>,
    host: Cell<Option<ElementId>>,
    notifier: ValueNotifier,
}

impl<T: 'static> ContextProvider<T> {
    /// Provider with no value yet. Requests are claimed and registered,
    /// but nothing is delivered until the first
    /// [`set_value`](ContextProvider::set_value).
    #[must_use]
    pub fn new(context: ContextKey<T>) -> Rc<Self> {
        Rc::new(Self {
            context,
            host: Cell::new(None),
            notifier: ValueNotifier::new(None),
        })
    }

    /// Provider seeded with an initial value.
    #[must_use]
    pub fn with_value(context: ContextKey<T>, initial: T) -> Rc<Self> {
        Rc::new(Self {
            context,
            host: Cell::new(None),
            notifier: ValueNotifier::new(Some(Rc::new(initial))),
        })
    }

    /// The provided channel.
    #[must_use]
    pub fn context(&self) -> ContextKey<T> {
        self.context
    }

    /// Store a new value and broadcast it to every live subscription.
    pub fn set_value(&self, value: T) {
        debug!(context = self.context.name(), "provider value changed");
        self.notifier.set_value(Rc::new(value));
    }

    /// Current value, cloned, if one has been set.
    #[must_use]
    pub fn value(&self) -> Option<T>
    where
        T: Clone,
    {
        self.notifier
            .value()
            .and_then(|payload| payload.downcast::<T>().ok())
            .map(|rc| (*rc).clone())
    }

    /// Number of live subscriptions, for diagnostics and tests.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.notifier.len()
    }

    /// Re-announce this provider from its host.
    ///
    /// Normally unnecessary — connecting announces automatically — but
    /// available when descendant providers must be re-evaluated
    /// explicitly.
    pub fn announce(&self, tree: &Tree) {
        if let Some(host) = self.host.get() {
            let _ = tree.dispatch(host, ProviderAnnounce::new(self.context.id()));
        }
    }

    /// Give every registered consumer's request back to the tree so a
    /// newly announced, closer provider can claim it first. Unclaimed
    /// requests bubble back here and re-register idempotently.
    fn reparent_subscriptions(&self, tree: &Tree) {
        // The snapshot is keyed per callback, so each unique callback is
        // visited exactly once per pass even if handlers re-register it
        // mid-pass; that bound is what keeps announce storms finite.
        let snapshot = self.notifier.registrations();
        trace!(
            context = self.context.name(),
            subscriptions = snapshot.len(),
            "re-parenting subscriptions"
        );
        for (delivery, host, subscribe) in snapshot {
            if !tree.is_connected(host) {
                continue;
            }
            // A pending one-shot must not stay registered here once a
            // closer provider delivers it; drop it first. If nothing
            // below claims, the bubble-back re-registers it afresh.
            if !subscribe {
                self.notifier.remove(delivery.id());
            }
            let request = ContextRequest::new(self.context.id(), delivery, subscribe);
            let _ = tree.dispatch(host, request);
        }
    }
}

impl<T: 'static> Behavior for ContextProvider<T> {
    fn bind(&self, host: ElementId) {
        self.host.set(Some(host));
    }

    fn unbind(&self) {
        self.host.set(None);
    }

    fn on_connect(&self, tree: &Tree, host: ElementId) {
        self.host.set(Some(host));
        debug!(context = self.context.name(), host = ?host, "provider announcing");
        let _ = tree.dispatch(host, ProviderAnnounce::new(self.context.id()));
    }

    fn handle_event(&self, tree: &Tree, event: &Event) -> Propagation {
        let Some(host) = self.host.get() else {
            return Propagation::Continue;
        };

        if let Some(request) = event.downcast::<ContextRequest>() {
            if request.context() != self.context.id() || event.origin() == host {
                return Propagation::Continue;
            }
            let unsubscribe = self.notifier.register(
                request.delivery().clone(),
                event.origin(),
                request.subscribe(),
            );
            if let Some(value) = self.notifier.value() {
                request.delivery().invoke(value, Some(unsubscribe));
            }
            trace!(
                context = self.context.name(),
                consumer = ?event.origin(),
                "request claimed"
            );
            return Propagation::Stop;
        }

        if let Some(announce) = event.downcast::<ProviderAnnounce>() {
            if announce.context() != self.context.id() || event.origin() == host {
                return Propagation::Continue;
            }
            self.reparent_subscriptions(tree);
            return Propagation::Stop;
        }

        Propagation::Continue
    }
}

impl<T: 'static> std::fmt::Debug for ContextProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextProvider")
            .field("context", &self.context)
            .field("subscriptions", &self.notifier.len())
            .finish()
    }
}
