#![forbid(unsafe_code)]

//! Nearest-ancestor context protocol over an [`arbor_tree::Tree`].
//!
//! A descendant element requests a named value (a *context*) and the
//! nearest ancestor providing that context supplies it, optionally with
//! live updates as the value changes. The protocol is carried by two
//! events bubbling through the tree:
//!
//! - [`ContextRequest`], dispatched by a [`ContextConsumer`] when its
//!   host connects; the nearest matching [`ContextProvider`] claims it,
//!   registers the callback in its [`ValueNotifier`], and delivers the
//!   current value.
//! - [`ProviderAnnounce`], dispatched by a provider when it connects;
//!   enclosing providers respond by re-dispatching their subscribers'
//!   requests so the new, closer provider can claim them
//!   (*re-parenting*).
//!
//! A [`ContextRoot`] catches requests that no provider claimed and
//! replays them once a matching provider announces itself — covering
//! providers that attach after their descendants already asked.
//!
//! # Example
//!
//! ```
//! use arbor_context::{ContextConsumer, ContextKey, ContextProvider};
//! use arbor_tree::Tree;
//!
//! let tree = Tree::new();
//! let app = tree.create_element();
//! let widget = tree.create_element();
//! tree.append(tree.root(), app).unwrap();
//! tree.append(app, widget).unwrap();
//!
//! let counter: ContextKey<u32> = ContextKey::new("counter");
//! let provider = ContextProvider::with_value(counter, 1000);
//! tree.attach_behavior(app, provider.clone()).unwrap();
//!
//! let consumer = ContextConsumer::subscribed(counter);
//! tree.attach_behavior(widget, consumer.clone()).unwrap();
//! assert_eq!(consumer.value(), Some(1000));
//!
//! provider.set_value(500);
//! assert_eq!(consumer.value(), Some(500));
//! ```
//!
//! # Model
//!
//! Single-threaded and synchronous throughout: dispatch, claim, delivery
//! and broadcast all run inside the call that triggers them. There is no
//! scheduling and no cancellation primitive beyond the per-registration
//! unsubscribe handle. "No provider available" is a normal pending
//! state, not an error.

pub mod consumer;
pub mod event;
pub mod key;
pub mod notifier;
pub mod provider;
pub mod reactive;
pub mod root;

pub use consumer::ContextConsumer;
pub use event::{CallbackId, ContextRequest, Delivery, Payload, ProviderAnnounce, Unsubscribe};
pub use key::{ContextKey, KeyId};
pub use notifier::ValueNotifier;
pub use provider::ContextProvider;
pub use reactive::{Observable, Watch, consume_into, provide_observable};
pub use root::ContextRoot;
