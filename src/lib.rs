//! A CoAP Observe (RFC 7641) notification engine for constrained-device
//! resources.
//!
//! The engine owns subscriber bookkeeping (a bounded pool plus the
//! intrusive unactive/pending lists that drive the notification
//! scheduler) but never touches a socket or parses a CoAP message itself.
//! An embedder provides three small collaborators — see
//! [`collaborators::ResourceHandler`], [`collaborators::TransactionLayer`],
//! and [`collaborators::NotificationTimer`] — and drives the engine from
//! its own event loop via [`ObserveEngine`].
//!
//! The engine targets a single-threaded, cooperative event loop and adds
//! no internal locking it doesn't need — see the crate's design notes for
//! why `ObserveEngine` is deliberately `!Sync`.

mod builder;
pub mod collaborators;
pub mod config;
mod engine;
mod observe_handler;
mod registry;
mod removal;
mod result;
mod scheduler;
mod subscriber;
mod token;

pub use collaborators::{Endpoint, ResourceMeta};
pub use config::EngineConfig;
pub use engine::ObserveEngine;
pub use result::{EngineError, EngineResult};
pub use subscriber::SubscriberHandle;
pub use token::Token;
