#![forbid(unsafe_code)]

//! Structural error type for tree mutations.

use thiserror::Error;

use crate::tree::ElementId;

/// Errors returned by structural operations on a [`Tree`](crate::Tree).
///
/// The event protocol itself never errors; only misuse of the tree
/// structure (stale handles, cycles, double attachment) is reported.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TreeError {
    /// The element handle is stale (its slot was freed) or was never
    /// allocated by this tree.
    #[error("element handle {0:?} is stale or unknown")]
    Dangling(ElementId),

    /// Appending `child` under `parent` would make an element its own
    /// ancestor.
    #[error("appending {child:?} under {parent:?} would create a cycle")]
    WouldCycle {
        /// The prospective parent.
        parent: ElementId,
        /// The element being appended.
        child: ElementId,
    },

    /// The behavior instance is already attached to this element.
    #[error("behavior is already attached to {0:?}")]
    AlreadyAttached(ElementId),

    /// The document root cannot be appended elsewhere, detached, or
    /// removed.
    #[error("the document root cannot be moved or removed")]
    RootImmovable,
}
