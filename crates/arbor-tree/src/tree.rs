#![forbid(unsafe_code)]

//! Generational element arena with parent/child links, connectivity
//! tracking, and behavior lifecycle.
//!
//! # Design
//!
//! Elements live in a slot arena and are addressed by [`ElementId`], a
//! `(index, generation)` pair. Freeing a slot bumps its generation, so a
//! handle held across a removal resolves to nothing instead of to an
//! unrelated element. This is the explicit replacement for weak
//! references: anything retaining an `ElementId` (notably the context
//! root's orphan list) extends no lifetime and observes staleness cleanly.
//!
//! [`Tree`] is a cheap-clone handle over `Rc<RefCell<..>>`. Every entry
//! point takes `&self` and releases all interior borrows before invoking
//! behavior callbacks, so callbacks may re-enter the tree (dispatch
//! events, append, detach) without panicking.
//!
//! # Invariants
//!
//! 1. The document root exists for the tree's whole life, is always
//!    connected, and cannot be moved or removed.
//! 2. An element is connected iff it is reachable from the document root.
//! 3. Connect and disconnect notifications fire top-down (parent before
//!    children) after the structural mutation completes.
//! 4. Moving a connected element fires disconnect then connect over the
//!    whole moved subtree, exactly like a detach followed by an append.
//! 5. Parent/child links are symmetric: `parent(c) == Some(p)` iff `c` is
//!    in `children(p)`.
//!
//! # Failure Modes
//!
//! - Stale handle: every public operation returns
//!   [`TreeError::Dangling`] instead of touching a recycled slot.
//! - Cycle: `append` refuses to place an element under its own
//!   descendant ([`TreeError::WouldCycle`]).

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use crate::error::TreeError;
use crate::event::{Behavior, DispatchOutcome, Event, Propagation};

/// Generational handle to an element in a [`Tree`].
///
/// `Copy` and cheap to compare; resolving a handle after its element was
/// removed fails cleanly (generation mismatch) rather than aliasing a
/// recycled slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId {
    index: u32,
    generation: u32,
}

impl ElementId {
    /// Slot index within the arena.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation the slot had when this handle was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

struct Node {
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    connected: bool,
    behaviors: Vec<Rc<dyn Behavior>>,
}

impl Node {
    fn detached() -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            connected: false,
            behaviors: Vec::new(),
        }
    }
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

struct TreeInner {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: ElementId,
}

impl TreeInner {
    fn node(&self, id: ElementId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: ElementId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    fn alloc(&mut self) -> ElementId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(Node::detached());
            ElementId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(Node::detached()),
            });
            ElementId {
                index,
                generation: 0,
            }
        }
    }

    fn release(&mut self, id: ElementId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.node.is_some() {
                slot.node = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
            }
        }
    }

    /// Preorder (parent before children) walk of the subtree rooted at `id`.
    fn subtree(&self, id: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(node) = self.node(current) {
                // Reverse so the leftmost child is visited first.
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    fn is_in_subtree_of(&self, id: ElementId, ancestor: ElementId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.node(current).and_then(|node| node.parent);
        }
        false
    }

    /// Flip connectivity over a subtree and return the top-down
    /// notification list `(id, behaviors)`.
    fn set_connected(
        &mut self,
        top: ElementId,
        connected: bool,
    ) -> Vec<(ElementId, Vec<Rc<dyn Behavior>>)> {
        let order = self.subtree(top);
        let mut notify = Vec::with_capacity(order.len());
        for id in order {
            if let Some(node) = self.node_mut(id) {
                node.connected = connected;
                if !node.behaviors.is_empty() {
                    notify.push((id, node.behaviors.clone()));
                }
            }
        }
        notify
    }
}

/// Cheap-clone handle to a shared element tree.
///
/// All clones refer to the same arena. Single-threaded by construction
/// (`Rc` inside); mutations and behavior callbacks all run synchronously
/// inside the call that triggers them.
#[derive(Clone)]
pub struct Tree {
    inner: Rc<RefCell<TreeInner>>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        let live = inner.slots.len() - inner.free.len();
        f.debug_struct("Tree")
            .field("root", &inner.root)
            .field("live_elements", &live)
            .finish()
    }
}

impl Tree {
    /// Create a tree containing only the document root.
    #[must_use]
    pub fn new() -> Self {
        let mut inner = TreeInner {
            slots: Vec::new(),
            free: Vec::new(),
            root: ElementId {
                index: 0,
                generation: 0,
            },
        };
        let root = inner.alloc();
        inner
            .node_mut(root)
            .expect("root slot was just allocated")
            .connected = true;
        inner.root = root;
        Self {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    /// The document root. Always connected.
    #[must_use]
    pub fn root(&self) -> ElementId {
        self.inner.borrow().root
    }

    /// Allocate a new detached element.
    #[must_use]
    pub fn create_element(&self) -> ElementId {
        self.inner.borrow_mut().alloc()
    }

    /// Whether `id` resolves to a live element.
    #[must_use]
    pub fn contains(&self, id: ElementId) -> bool {
        self.inner.borrow().node(id).is_some()
    }

    /// Whether `id` is reachable from the document root.
    ///
    /// Returns `false` for stale handles.
    #[must_use]
    pub fn is_connected(&self, id: ElementId) -> bool {
        self.inner
            .borrow()
            .node(id)
            .is_some_and(|node| node.connected)
    }

    /// Parent of `id`, or `None` for the root and detached elements.
    pub fn parent(&self, id: ElementId) -> Result<Option<ElementId>, TreeError> {
        self.inner
            .borrow()
            .node(id)
            .map(|node| node.parent)
            .ok_or(TreeError::Dangling(id))
    }

    /// Children of `id`, in insertion order.
    pub fn children(&self, id: ElementId) -> Result<Vec<ElementId>, TreeError> {
        self.inner
            .borrow()
            .node(id)
            .map(|node| node.children.clone())
            .ok_or(TreeError::Dangling(id))
    }

    /// Append `child` (and its subtree) under `parent`.
    ///
    /// A connected child is first disconnected from its old position, so a
    /// move fires `on_disconnect` then `on_connect` over the whole moved
    /// subtree. Notifications run after the structure has settled.
    pub fn append(&self, parent: ElementId, child: ElementId) -> Result<(), TreeError> {
        let (disconnects, connects) = {
            let mut inner = self.inner.borrow_mut();
            inner.node(parent).ok_or(TreeError::Dangling(parent))?;
            inner.node(child).ok_or(TreeError::Dangling(child))?;
            if child == inner.root {
                return Err(TreeError::RootImmovable);
            }
            if inner.is_in_subtree_of(parent, child) {
                return Err(TreeError::WouldCycle { parent, child });
            }

            let was_connected = inner
                .node(child)
                .is_some_and(|node| node.connected);
            let disconnects = if was_connected {
                inner.set_connected(child, false)
            } else {
                Vec::new()
            };

            // Unlink from the previous parent, if any.
            let old_parent = inner.node(child).and_then(|node| node.parent);
            if let Some(old) = old_parent {
                if let Some(node) = inner.node_mut(old) {
                    node.children.retain(|c| *c != child);
                }
            }

            inner
                .node_mut(parent)
                .expect("parent validated above")
                .children
                .push(child);
            inner
                .node_mut(child)
                .expect("child validated above")
                .parent = Some(parent);

            let parent_connected = inner
                .node(parent)
                .is_some_and(|node| node.connected);
            let connects = if parent_connected {
                inner.set_connected(child, true)
            } else {
                Vec::new()
            };
            (disconnects, connects)
        };

        self.notify_disconnects(&disconnects);
        self.notify_connects(&connects);
        Ok(())
    }

    /// Detach `child` (and its subtree) from its parent.
    ///
    /// No-op for an already-detached element. The subtree stays alive and
    /// can be re-appended later.
    pub fn detach(&self, child: ElementId) -> Result<(), TreeError> {
        let disconnects = {
            let mut inner = self.inner.borrow_mut();
            inner.node(child).ok_or(TreeError::Dangling(child))?;
            if child == inner.root {
                return Err(TreeError::RootImmovable);
            }
            let parent = inner.node(child).and_then(|node| node.parent);
            let Some(parent) = parent else {
                return Ok(());
            };
            if let Some(node) = inner.node_mut(parent) {
                node.children.retain(|c| *c != child);
            }
            inner
                .node_mut(child)
                .expect("child validated above")
                .parent = None;

            let was_connected = inner
                .node(child)
                .is_some_and(|node| node.connected);
            if was_connected {
                inner.set_connected(child, false)
            } else {
                Vec::new()
            }
        };

        self.notify_disconnects(&disconnects);
        Ok(())
    }

    /// Detach `id` and free its whole subtree.
    ///
    /// Every handle into the removed subtree goes stale (generation bump).
    pub fn remove(&self, id: ElementId) -> Result<(), TreeError> {
        self.detach(id)?;
        let mut inner = self.inner.borrow_mut();
        for doomed in inner.subtree(id) {
            inner.release(doomed);
        }
        Ok(())
    }

    /// Attach a behavior to `id`.
    ///
    /// Calls `bind`, then `on_connect` immediately if the element is
    /// already connected — late attachment behaves like a late custom
    /// element upgrade.
    pub fn attach_behavior(
        &self,
        id: ElementId,
        behavior: Rc<dyn Behavior>,
    ) -> Result<(), TreeError> {
        let connected = {
            let mut inner = self.inner.borrow_mut();
            let node = inner.node_mut(id).ok_or(TreeError::Dangling(id))?;
            if node
                .behaviors
                .iter()
                .any(|existing| Rc::ptr_eq(existing, &behavior))
            {
                return Err(TreeError::AlreadyAttached(id));
            }
            node.behaviors.push(Rc::clone(&behavior));
            node.connected
        };

        behavior.bind(id);
        if connected {
            behavior.on_connect(self, id);
        }
        Ok(())
    }

    /// Detach a behavior from `id`.
    ///
    /// Fires `on_disconnect` (when the host is connected) and then
    /// `unbind`, so behaviors tear down exactly as if the host had left
    /// the document. Returns `false` when the behavior was not attached.
    pub fn detach_behavior(
        &self,
        id: ElementId,
        behavior: &Rc<dyn Behavior>,
    ) -> Result<bool, TreeError> {
        let (found, connected) = {
            let mut inner = self.inner.borrow_mut();
            let node = inner.node_mut(id).ok_or(TreeError::Dangling(id))?;
            let before = node.behaviors.len();
            node.behaviors
                .retain(|existing| !Rc::ptr_eq(existing, behavior));
            (node.behaviors.len() != before, node.connected)
        };

        if found {
            if connected {
                behavior.on_disconnect(self, id);
            }
            behavior.unbind();
        }
        Ok(found)
    }

    /// Dispatch an event from `origin`, bubbling toward the document root.
    ///
    /// The ancestor path is snapshotted up front; behaviors then run
    /// innermost-first (attachment order within an element) with no
    /// interior borrow held, so handlers may re-enter the tree. The first
    /// [`Propagation::Stop`] claims the event and ends the walk.
    pub fn dispatch<P: Any>(
        &self,
        origin: ElementId,
        payload: P,
    ) -> Result<DispatchOutcome, TreeError> {
        let path: Vec<(ElementId, Vec<Rc<dyn Behavior>>)> = {
            let inner = self.inner.borrow();
            inner.node(origin).ok_or(TreeError::Dangling(origin))?;
            let mut path = Vec::new();
            let mut cursor = Some(origin);
            while let Some(id) = cursor {
                let Some(node) = inner.node(id) else { break };
                if !node.behaviors.is_empty() {
                    path.push((id, node.behaviors.clone()));
                }
                cursor = node.parent;
            }
            path
        };

        let event = Event::new(origin, Box::new(payload));
        for (id, behaviors) in &path {
            for behavior in behaviors {
                if behavior.handle_event(self, &event) == Propagation::Stop {
                    trace!(origin = ?origin, claimed_at = ?id, "event claimed");
                    return Ok(DispatchOutcome::Claimed);
                }
            }
        }
        trace!(origin = ?origin, "event bubbled out unclaimed");
        Ok(DispatchOutcome::Unclaimed)
    }

    fn notify_connects(&self, list: &[(ElementId, Vec<Rc<dyn Behavior>>)]) {
        for (id, behaviors) in list {
            for behavior in behaviors {
                behavior.on_connect(self, *id);
            }
        }
    }

    fn notify_disconnects(&self, list: &[(ElementId, Vec<Rc<dyn Behavior>>)]) {
        for (id, behaviors) in list {
            for behavior in behaviors {
                behavior.on_disconnect(self, *id);
            }
        }
    }
}
