#![forbid(unsafe_code)]

//! Element tree substrate for tree-scoped protocols.
//!
//! `arbor-tree` provides the host model that [`arbor-context`] runs on:
//!
//! - [`Tree`]: a generational arena of elements with parent/child links
//!   and connectivity tracking rooted at a document root.
//! - [`Behavior`]: attachable units of behavior with `bind`/`unbind` and
//!   `on_connect`/`on_disconnect` lifecycle notifications.
//! - [`Tree::dispatch`]: bubbling event dispatch as an explicit
//!   ancestor-chain walk — innermost behaviors see an event first, and the
//!   first one returning [`Propagation::Stop`] claims it.
//!
//! Everything is single-threaded and synchronous; behavior callbacks run
//! inside the tree call that triggers them and may re-enter the tree.
//!
//! [`arbor-context`]: https://docs.rs/arbor-context

pub mod error;
pub mod event;
pub mod tree;

pub use error::TreeError;
pub use event::{Behavior, DispatchOutcome, Event, Propagation};
pub use tree::{ElementId, Tree};
