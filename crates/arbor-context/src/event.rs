#![forbid(unsafe_code)]

//! Wire types of the context protocol: the request and announcement
//! events plus the callback and teardown handles they carry.
//!
//! # Identity, not closures
//!
//! The protocol needs two kinds of identity comparison that closures
//! cannot provide in Rust:
//!
//! - Providers deduplicate registrations by *callback identity* so a
//!   consumer re-requesting (or being re-parented) never registers twice.
//!   [`Delivery`] therefore pairs its closure with a [`CallbackId`] token
//!   minted once per consumer instance; tokens are compared, closures
//!   never are.
//! - Consumers detect a provider hand-off by comparing *unsubscribe
//!   identity*. [`Unsubscribe`] carries a token that is stable for the
//!   life of one registration and differs across providers and across
//!   registrations.
//!
//! # Invariants
//!
//! 1. A [`ContextRequest`] is immutable once dispatched and is claimed by
//!    at most one provider (the nearest one on the ancestor path).
//! 2. Cloning a [`Delivery`] preserves its [`CallbackId`].
//! 3. Two [`Unsubscribe`] handles satisfy `same_registration` iff they
//!    were cloned from the same registration.

use std::any::Any;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::key::KeyId;

/// Type-erased context value, shared by reference count.
///
/// Consumers clone the `Rc`; ownership of the value never transfers away
/// from the provider.
pub type Payload = Rc<dyn Any>;

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity token for a consumer's delivery callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw token value, for diagnostics.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A consumer's delivery callback with stable identity.
///
/// The same `Delivery` (same [`CallbackId`]) is re-dispatched by a
/// consumer across its whole life, which is what lets providers recognize
/// it during re-parenting.
#[derive(Clone)]
pub struct Delivery {
    id: CallbackId,
    run: Rc<dyn Fn(Payload, Option<Unsubscribe>)>,
}

impl Delivery {
    /// Wrap a delivery closure, minting a fresh identity token.
    pub fn new(run: impl Fn(Payload, Option<Unsubscribe>) + 'static) -> Self {
        Self {
            id: CallbackId::next(),
            run: Rc::new(run),
        }
    }

    /// Identity token; stable across clones.
    #[must_use]
    pub fn id(&self) -> CallbackId {
        self.id
    }

    /// Invoke the callback with a value and the registration's teardown
    /// handle.
    pub fn invoke(&self, value: Payload, unsubscribe: Option<Unsubscribe>) {
        (self.run)(value, unsubscribe);
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery").field("id", &self.id).finish()
    }
}

static NEXT_UNSUBSCRIBE_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Teardown handle for one subscription registration.
///
/// Invoking it removes the registration from its notifier; invoking it
/// again is a no-op. Clones share the token, so a consumer can compare an
/// incoming handle against the one it holds to detect that a different
/// provider (or a fresh registration) is now serving it.
#[derive(Clone)]
pub struct Unsubscribe {
    token: u64,
    run: Rc<dyn Fn()>,
}

impl Unsubscribe {
    pub(crate) fn new(run: impl Fn() + 'static) -> Self {
        Self {
            token: NEXT_UNSUBSCRIBE_TOKEN.fetch_add(1, Ordering::Relaxed),
            run: Rc::new(run),
        }
    }

    /// Registration identity token.
    #[must_use]
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Whether `other` belongs to the same registration as `self`.
    #[must_use]
    pub fn same_registration(&self, other: &Unsubscribe) -> bool {
        self.token == other.token
    }

    /// Tear the registration down.
    pub fn invoke(&self) {
        (self.run)();
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("token", &self.token)
            .finish()
    }
}

/// A consumer's request for a context value, dispatched from its host and
/// bubbling toward the document root.
#[derive(Debug, Clone)]
pub struct ContextRequest {
    context: KeyId,
    delivery: Delivery,
    subscribe: bool,
}

impl ContextRequest {
    /// Build a request for `context`. `subscribe` asks the claiming
    /// provider to keep delivering on every value change.
    #[must_use]
    pub fn new(context: KeyId, delivery: Delivery, subscribe: bool) -> Self {
        Self {
            context,
            delivery,
            subscribe,
        }
    }

    /// The requested channel.
    #[must_use]
    pub fn context(&self) -> KeyId {
        self.context
    }

    /// The consumer's delivery callback.
    #[must_use]
    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    /// Whether live updates were requested.
    #[must_use]
    pub fn subscribe(&self) -> bool {
        self.subscribe
    }
}

/// A provider's announcement that it now serves `context`, dispatched
/// from its host when it connects.
///
/// Enclosing providers react by re-dispatching requests for their
/// existing subscribers, giving the newly announced (closer) provider
/// first claim.
#[derive(Debug, Clone, Copy)]
pub struct ProviderAnnounce {
    context: KeyId,
}

impl ProviderAnnounce {
    /// Build an announcement for `context`.
    #[must_use]
    pub fn new(context: KeyId) -> Self {
        Self { context }
    }

    /// The announced channel.
    #[must_use]
    pub fn context(&self) -> KeyId {
        self.context
    }
}
