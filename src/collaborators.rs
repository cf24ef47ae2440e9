//! Trait contracts and message value types standing in for the three
//! external collaborators described in the engine's interface contract:
//! the resource layer, the CoAP message layer, and the transaction layer.
//!
//! The engine never parses or serializes CoAP messages itself — that, and
//! the socket underneath it, belong to the embedder. These traits are the
//! seam.

use std::time::Duration;

use bytes::Bytes;
use num_derive::{FromPrimitive, ToPrimitive};

use crate::{subscriber::SubscriberHandle, token::Token};

/// 16-bit CoAP Message ID.
pub type Mid = u16;

/// Stands in for `EndpointEqual`/`coap_endpoint_cmp`: anything comparable
/// and cloneable can address a subscriber.
pub trait Endpoint: Clone + PartialEq {}
impl<T: Clone + PartialEq> Endpoint for T {}

/// CoAP message type, wire values per RFC 7252 §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum MessageType {
  Confirmable = 0,
  NonConfirmable = 1,
  Acknowledgement = 2,
  Reset = 3,
}

/// The handful of CoAP response codes the engine itself assigns. Message
/// content beyond these is the resource handler's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum MessageCode {
  Get = 0x01,
  Content = 0x45,          // 2.05
  BadRequest = 0x80,       // 4.00
  ServiceUnavailable = 0xA3, // 5.03
}

impl MessageCode {
  /// CoAP response codes with class >= 4 (the top 3 bits of the code byte)
  /// are errors.
  pub fn is_error(self) -> bool {
    (self as u8) >= 0x80
  }
}

/// RFC 7959 Block2, describing one block of an oversize notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block2 {
  pub block_number: u32,
  pub more: bool,
  pub size: usize,
}

/// The `new_offset` the resource handler reports back after filling the
/// payload buffer.
///
/// `Unknown` means the handler could not report its own position. Its
/// Block2 more-bit comes out `false` — treated as "delivered everything it
/// has" rather than "more data follows".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOffset {
  NoMore,
  More(usize),
  Unknown,
}

/// What a resource handler reports back from [`ResourceHandler::call`].
pub enum HandlerOutcome {
  Handled { new_offset: BlockOffset },
  NotHandled,
}

/// The synthetic GET built for a notification dispatch. Never transmitted;
/// it exists only so the resource handler can treat a notification the same
/// way it treats a real GET.
#[derive(Debug, Clone)]
pub struct SyntheticRequest {
  pub msg_type: MessageType,
  pub code: MessageCode,
  pub uri_path: String,
}

/// The response a resource handler fills in. Starts as a plain `2.05
/// Content` with an empty body; the handler may overwrite the code (e.g. to
/// signal its own failure) and appends to `payload`.
#[derive(Debug, Clone)]
pub struct NotificationResponse {
  pub code: MessageCode,
  pub payload: Bytes,
}

impl Default for NotificationResponse {
  fn default() -> Self {
    Self {
      code: MessageCode::Content,
      payload: Bytes::new(),
    }
  }
}

/// Replaces `coap_call_handlers`: invoke whatever resource handler(s) are
/// registered for `request.uri_path` and fill `response`.
pub trait ResourceHandler<E: Endpoint> {
  fn call(&mut self, request: &SyntheticRequest, response: &mut NotificationResponse) -> HandlerOutcome;
}

/// The fields of a resource the engine actually reads: its own URL and
/// whether it declares having sub-resources (which changes how
/// [`crate::ObserveEngine::notify_observers_sub`] matches subscribers).
#[derive(Debug, Clone)]
pub struct ResourceMeta {
  pub url: String,
  pub has_sub_resources: bool,
}

impl ResourceMeta {
  pub fn new(url: impl Into<String>, has_sub_resources: bool) -> Self {
    Self {
      url: url.into(),
      has_sub_resources,
    }
  }
}

/// An embedder-defined correlation id for an in-flight transaction,
/// threaded from `new_transaction` into `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHandle(pub u64);

/// A fully-built outgoing notification, ready for the transaction layer to
/// serialize and transmit. `subscriber` lets the transaction layer
/// correlate a later ACK/timeout/abort back to
/// [`crate::ObserveEngine::on_transaction_complete`].
#[derive(Debug, Clone)]
pub struct OutgoingMessage<E: Endpoint> {
  pub subscriber: SubscriberHandle,
  pub endpoint: E,
  pub mid: Mid,
  pub msg_type: MessageType,
  pub code: MessageCode,
  pub token: Token,
  pub observe: Option<u32>,
  pub block2: Option<Block2>,
  pub payload: Bytes,
}

/// Replaces `coap_new_transaction`/`coap_send_transaction`/`coap_get_mid`.
pub trait TransactionLayer<E: Endpoint> {
  fn next_mid(&mut self) -> Mid;
  fn new_transaction(&mut self, mid: Mid, endpoint: &E) -> Option<TransactionHandle>;
  /// `transaction` is `Some` for a confirmable notification (from a prior
  /// `new_transaction` call) and `None` for a non-confirmable one, which
  /// has no retransmission state to track.
  fn send(&mut self, transaction: Option<TransactionHandle>, message: OutgoingMessage<E>);
}

/// How a confirmable notification's exchange ended. The scheduler folds all
/// three into the same list bookkeeping (free if `Removed`, else return to
/// unactive) per the engine's cancellation semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionCompletion {
  Acked,
  TimedOut,
  Aborted,
}

/// The single shared deferred-work primitive the scheduler arms/disarms.
/// Modeled as a trait rather than a concrete OS timer so the engine stays
/// runtime-agnostic; the embedder calls
/// [`crate::ObserveEngine::on_timer_fire`] when it elapses.
pub trait NotificationTimer {
  fn arm(&mut self, after: Duration);
  fn disarm(&mut self);
}

/// The fields of an inbound GET the engine reads to interpret its Observe
/// option.
#[derive(Debug, Clone)]
pub struct InboundRequest<E> {
  pub endpoint: Option<E>,
  pub token: Token,
  pub uri_path: String,
  /// `None` if no Observe option is present; `Some(0)` register, `Some(1)`
  /// deregister, any other value ignored.
  pub observe: Option<u32>,
}

/// The outgoing response fields [`crate::ObserveEngine::observe_handler`]
/// may set.
#[derive(Debug, Clone)]
pub struct ObserveReply {
  pub code: MessageCode,
  pub observe: Option<u32>,
  pub payload: Bytes,
}

impl Default for ObserveReply {
  fn default() -> Self {
    Self {
      code: MessageCode::Content,
      observe: None,
      payload: Bytes::new(),
    }
  }
}
