#![forbid(unsafe_code)]

//! Context identifiers.
//!
//! A context is named by identity, never by structure: two keys are the
//! same context iff they carry the same [`KeyId`], a token minted once
//! per [`ContextKey::new`] call. The value type parameter exists for
//! static checking only and has no runtime representation.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

/// Runtime identity of a context channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(u64);

impl KeyId {
    fn next() -> Self {
        Self(NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw token value, for diagnostics.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Typed handle naming a context channel.
///
/// Create one per channel, usually in a shared module, and hand copies to
/// both providers and consumers:
///
/// ```
/// use arbor_context::ContextKey;
///
/// let theme: ContextKey<String> = ContextKey::new("theme");
/// let also_theme = theme; // Copy: same channel
/// assert_eq!(theme.id(), also_theme.id());
///
/// // A second key with the same label is a *different* channel.
/// let other: ContextKey<String> = ContextKey::new("theme");
/// assert_ne!(theme.id(), other.id());
/// ```
pub struct ContextKey<T> {
    id: KeyId,
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    /// Mint a new context channel. `name` labels logs and debug output
    /// only; identity comes from the minted [`KeyId`].
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            id: KeyId::next(),
            name,
            _value: PhantomData,
        }
    }

    /// The channel's identity token.
    #[must_use]
    pub fn id(&self) -> KeyId {
        self.id
    }

    /// Human-readable label.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> PartialEq for ContextKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for ContextKey<T> {}

impl<T> std::fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextKey")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_not_structure() {
        let a: ContextKey<u32> = ContextKey::new("counter");
        let b: ContextKey<u32> = ContextKey::new("counter");
        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    #[test]
    fn copies_share_identity() {
        let a: ContextKey<u32> = ContextKey::new("counter");
        let b = a;
        assert_eq!(a.id(), b.id());
        assert_eq!(a, b);
    }

    #[test]
    fn debug_includes_label() {
        let key: ContextKey<()> = ContextKey::new("session");
        let dbg = format!("{key:?}");
        assert!(dbg.contains("session"));
    }
}
