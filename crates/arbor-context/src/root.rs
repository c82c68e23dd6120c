#![forbid(unsafe_code)]

//! Fallback collector for requests dispatched before any provider exists.
//!
//! # Design
//!
//! A provider attached late (the analogue of a custom element upgrading
//! after its descendants connected) misses every request its descendants
//! already dispatched. A [`ContextRoot`] installed above — typically on
//! the document root — retains each request that bubbles to it, and when
//! a provider announcement for the same channel arrives, replays the
//! retained requests from their original elements so the new provider
//! gets a chance to claim them.
//!
//! Retained entries record the originating [`ElementId`], a generational
//! handle: the root keeps nothing alive, and an entry whose element was
//! removed or disconnected is dropped opportunistically during the next
//! replay. A replayed request that some provider claims is satisfied and
//! dropped as well — the root holds *unsatisfied* requests only, so a
//! later announcement elsewhere in the tree cannot re-deliver to a
//! consumer that was already served. Entries are deduped by callback
//! identity so repeated request/announce churn cannot grow the list
//! without bound.
//!
//! The root never claims anything — requests and announcements continue
//! bubbling past it.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use arbor_tree::{Behavior, DispatchOutcome, ElementId, Event, Propagation, Tree};
use tracing::{debug, trace};

use crate::event::{ContextRequest, Delivery, ProviderAnnounce};
use crate::key::KeyId;

struct Retained {
    origin: ElementId,
    delivery: Delivery,
    subscribe: bool,
}

/// Retains unsatisfied context requests and replays them when a matching
/// provider announces itself.
pub struct ContextRoot {
    retained: RefCell<AHashMap<KeyId, Vec<Retained>>>,
}

impl ContextRoot {
    /// Create a root collector; attach it with
    /// [`Tree::attach_behavior`], normally to the tree's document root.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            retained: RefCell::new(AHashMap::new()),
        })
    }

    /// Number of retained requests across all channels, for diagnostics
    /// and leak tests.
    #[must_use]
    pub fn retained_count(&self) -> usize {
        self.retained.borrow().values().map(Vec::len).sum()
    }

    fn retain(&self, event: &Event, request: &ContextRequest) {
        let mut retained = self.retained.borrow_mut();
        let list = retained.entry(request.context()).or_default();
        let id = request.delivery().id();
        if list.iter().any(|entry| entry.delivery.id() == id) {
            return;
        }
        trace!(origin = ?event.origin(), "retaining unsatisfied context request");
        list.push(Retained {
            origin: event.origin(),
            delivery: request.delivery().clone(),
            subscribe: request.subscribe(),
        });
    }

    fn replay(&self, tree: &Tree, context: KeyId) {
        // Take the list out so replayed requests that bubble back here
        // re-enter a fresh list instead of a held borrow.
        let Some(entries) = self.retained.borrow_mut().remove(&context) else {
            return;
        };
        debug!(retained = entries.len(), "replaying retained requests");

        let mut kept = Vec::new();
        for entry in entries {
            if !tree.is_connected(entry.origin) {
                // Element removed or detached since retention: drop.
                continue;
            }
            let request =
                ContextRequest::new(context, entry.delivery.clone(), entry.subscribe);
            // A claimed request is satisfied; only still-unclaimed ones
            // stay retained for the next announcement.
            if tree.dispatch(entry.origin, request) == Ok(DispatchOutcome::Unclaimed) {
                kept.push(entry);
            }
        }

        // Merge survivors back, keeping anything retained during replay.
        let mut retained = self.retained.borrow_mut();
        let list = retained.entry(context).or_default();
        for entry in kept {
            if !list
                .iter()
                .any(|existing| existing.delivery.id() == entry.delivery.id())
            {
                list.push(entry);
            }
        }
        if list.is_empty() {
            retained.remove(&context);
        }
    }
}

impl Behavior for ContextRoot {
    fn handle_event(&self, tree: &Tree, event: &Event) -> Propagation {
        if let Some(request) = event.downcast::<ContextRequest>() {
            self.retain(event, request);
        } else if let Some(announce) = event.downcast::<ProviderAnnounce>() {
            self.replay(tree, announce.context());
        }
        Propagation::Continue
    }
}

impl std::fmt::Debug for ContextRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRoot")
            .field("retained", &self.retained_count())
            .finish()
    }
}
