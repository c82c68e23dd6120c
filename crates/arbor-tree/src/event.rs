#![forbid(unsafe_code)]

//! Behavior trait and the event envelope for bubbling dispatch.
//!
//! Events in arbor are plain values wrapped in an [`Event`] envelope and
//! walked up the ancestor chain by [`Tree::dispatch`](crate::Tree::dispatch)
//! rather than routed through a browser-style event system. A behavior
//! claims an event by returning [`Propagation::Stop`]; the walk visits the
//! origin element first, then each ancestor in order, so the innermost
//! interested behavior always wins.
//!
//! # Invariants
//!
//! 1. An event is claimed by at most one behavior per dispatch.
//! 2. The walk order is origin first, then parent, up to the document root.
//! 3. Within one element, behaviors run in attachment order.
//! 4. The dispatch path is snapshotted before any handler runs; structural
//!    mutations made by handlers never redirect the in-flight walk.

use std::any::Any;

use crate::tree::{ElementId, Tree};

/// Whether a behavior claimed an event or let it continue bubbling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Pass the event to the next behavior / ancestor.
    Continue,
    /// Claim the event; no further behavior sees it.
    Stop,
}

/// Result of a full dispatch walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Some behavior on the path returned [`Propagation::Stop`].
    Claimed,
    /// The event bubbled past the document root unclaimed.
    Unclaimed,
}

/// Envelope handed to [`Behavior::handle_event`].
///
/// `origin` is the element the event was dispatched from — the deepest
/// entry of the path. Handlers use it to recognize events they raised on
/// their own host.
pub struct Event {
    origin: ElementId,
    payload: Box<dyn Any>,
}

impl Event {
    pub(crate) fn new(origin: ElementId, payload: Box<dyn Any>) -> Self {
        Self { origin, payload }
    }

    /// The element this event was dispatched from.
    #[must_use]
    pub fn origin(&self) -> ElementId {
        self.origin
    }

    /// Downcast the payload to a concrete event type.
    ///
    /// Returns `None` when the payload is some other type; handlers are
    /// expected to probe for each type they understand and otherwise
    /// return [`Propagation::Continue`].
    #[must_use]
    pub fn downcast<P: Any>(&self) -> Option<&P> {
        self.payload.downcast_ref::<P>()
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// A unit of behavior attachable to a tree element.
///
/// Behaviors are held as `Rc<dyn Behavior>` and driven entirely by the
/// tree: `bind`/`unbind` bracket attachment to a host, `on_connect`/
/// `on_disconnect` track the host entering and leaving the live document,
/// and `handle_event` participates in bubbling dispatch. All methods take
/// `&self`; behaviors use interior mutability for their own state.
///
/// Lifecycle callbacks run *after* the structural mutation that triggered
/// them has completed, so a handler may freely re-enter the tree (dispatch
/// further events, append or detach elements).
pub trait Behavior {
    /// The behavior has been attached to `host`.
    fn bind(&self, host: ElementId) {
        let _ = host;
    }

    /// The behavior has been detached from its host.
    fn unbind(&self) {}

    /// `host` became reachable from the document root.
    fn on_connect(&self, tree: &Tree, host: ElementId) {
        let _ = (tree, host);
    }

    /// `host` is no longer reachable from the document root.
    fn on_disconnect(&self, tree: &Tree, host: ElementId) {
        let _ = (tree, host);
    }

    /// Inspect a bubbling event; return [`Propagation::Stop`] to claim it.
    fn handle_event(&self, tree: &Tree, event: &Event) -> Propagation {
        let _ = (tree, event);
        Propagation::Continue
    }
}
