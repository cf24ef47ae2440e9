//! Internal error type for the engine's own programming-contract violations.
//!
//! Every externally-triggered condition (pool exhaustion, handler failure,
//! missing endpoint, oversize notification, transaction timeout, overlong
//! URL) is handled inline as an ordinary outcome and never reaches this
//! type — see [`crate::collaborators`] for those. `EngineError` exists
//! only for misuse of the registry's handle-based API, which the crate's
//! own code is responsible for never triggering.

use thiserror::Error;

use crate::subscriber::SubscriberHandle;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
  #[error("subscriber handle {0:?} refers to a freed or reused slot")]
  HandleStale(SubscriberHandle),

  #[error("subscriber handle index {0} is out of range for a pool of capacity {1}")]
  HandleOutOfRange(u32, usize),

  #[error("invalid list transition: {0}")]
  InvalidTransition(&'static str),
}

pub type EngineResult<T> = Result<T, EngineError>;
