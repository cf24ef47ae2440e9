//! Notification construction: turns one pending subscriber into an outgoing
//! CoAP message in nine steps (decide CON/NON, obtain a MID and
//! transaction, build the synthetic request, call the resource handler,
//! apply Block2, set the Observe option, send).

use log::{debug, warn};

use crate::{
  collaborators::{
    Block2, BlockOffset, HandlerOutcome, MessageCode, MessageType, NotificationResponse,
    OutgoingMessage, ResourceHandler, SyntheticRequest, TransactionLayer,
  },
  config::EngineConfig,
  registry::SubscriberRegistry,
  subscriber::SubscriberHandle,
  Endpoint,
};

/// What happened when the scheduler tried to dispatch one pending
/// subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
  /// A confirmable notification was handed to the transaction layer. The
  /// subscriber stays detached until
  /// [`crate::ObserveEngine::on_transaction_complete`] is called for it —
  /// this branch does not re-arm the shared timer either, since the
  /// transaction layer's own retransmission timer is now responsible for
  /// this subscriber.
  SentCon,
  /// A non-confirmable notification was sent and the subscriber returned
  /// immediately to the unactive list.
  SentNon,
  /// The transaction layer had no room for a new transaction; the
  /// subscriber was returned to pending for the scheduler to retry after
  /// [`EngineConfig::notification_retry_period_ms`].
  Retry,
}

/// Builds and sends one notification for `handle`, which must currently be
/// in the pending list. Returns the outcome without touching list
/// membership — the caller (the scheduler) applies the corresponding
/// transition.
pub fn dispatch_one<E: Endpoint>(
  handle: SubscriberHandle,
  registry: &mut SubscriberRegistry<E>,
  config: &EngineConfig,
  resource_handler: &mut impl ResourceHandler<E>,
  transactions: &mut impl TransactionLayer<E>,
) -> DispatchOutcome {
  // Step 1: decide CON vs NON up front — every `observe_refresh_interval`-th
  // notification is a confirmable reachability probe.
  let counter_preview = registry.get(handle).expect("pending handle is valid").obs_counter.value();
  let force_confirmable =
    config.observe_refresh_interval > 0 && counter_preview % config.observe_refresh_interval == 0;
  let msg_type = if force_confirmable {
    MessageType::Confirmable
  } else {
    MessageType::NonConfirmable
  };

  // Step 2: obtain a MID and, if confirmable, a transaction up front so a
  // pool-exhausted transaction layer can be retried without having already
  // mutated the subscriber's counter or invoked the resource handler. The
  // MID is recorded on the subscriber unconditionally, even if the handler
  // or the transaction layer later fails this attempt, so a RST the client
  // sends in response to *this* MID can still be matched by RemoveByMid.
  let mid = transactions.next_mid();
  registry.get_mut(handle).expect("pending handle is valid").last_mid = mid;
  let endpoint = registry.get(handle).expect("pending handle is valid").endpoint.clone();
  let transaction = if msg_type == MessageType::Confirmable {
    match transactions.new_transaction(mid, &endpoint) {
      Some(t) => Some(t),
      None => {
        debug!("transaction layer exhausted, deferring dispatch to {:?}", handle);
        return DispatchOutcome::Retry;
      }
    }
  } else {
    None
  };

  // Step 3: build the synthetic GET the resource handler sees.
  let uri_path = registry.get(handle).expect("pending handle is valid").url.clone();
  let request = SyntheticRequest {
    msg_type,
    code: MessageCode::Get,
    uri_path,
  };

  // Step 4: call the resource handler to fill the payload.
  let mut response = NotificationResponse::default();
  let outcome = resource_handler.call(&request, &mut response);
  let new_offset = match outcome {
    HandlerOutcome::Handled { new_offset } => new_offset,
    HandlerOutcome::NotHandled => {
      warn!("no resource handler claimed {:?}, sending 4.00", handle);
      response.code = MessageCode::BadRequest;
      BlockOffset::Unknown
    }
  };

  // Step 5: apply the resource handler's own failure code, if any, without
  // further truncation or Block2 accounting — an error body is sent as-is.
  if response.code.is_error() {
    return send(
      handle,
      registry,
      transactions,
      transaction,
      mid,
      msg_type,
      response.code,
      None,
      None,
      response.payload,
    );
  }

  // Step 6: truncate to the configured block size and compute Block2. An
  // unknown offset reports no more blocks rather than being treated as
  // "continue".
  let (payload, block2) = truncate_payload(response.payload, new_offset, config.max_block_size);

  // Step 7: advance the Observe counter — only now, after a successful
  // build, so a handler failure or retry never skips a sequence number.
  let observe_value = registry
    .get_mut(handle)
    .expect("pending handle is valid")
    .obs_counter
    .advance();

  // Step 8: `last_mid` was already recorded in Step 2 — it covers this path
  // too, not just the success path.

  // Step 9: hand the finished message to the transaction layer.
  send(
    handle,
    registry,
    transactions,
    transaction,
    mid,
    msg_type,
    response.code,
    Some(observe_value),
    block2,
    payload,
  )
}

/// Slices `payload` down to `max_block_size` bytes and derives the Block2
/// option to attach, if any slicing was needed.
///
/// `BlockOffset::Unknown` always yields `more: false`: a resource handler
/// that can't report its own position is treated as having delivered
/// everything it has, not as an open-ended stream, even though a more
/// conservative reading could assume more data follows.
fn truncate_payload(
  payload: bytes::Bytes,
  offset: BlockOffset,
  max_block_size: usize,
) -> (bytes::Bytes, Option<Block2>) {
  if payload.len() <= max_block_size {
    return (payload, None);
  }
  let more = match offset {
    BlockOffset::More(_) => true,
    BlockOffset::NoMore | BlockOffset::Unknown => false,
  };
  let truncated = payload.slice(0..max_block_size);
  let block2 = Block2 {
    block_number: 0,
    more,
    size: max_block_size,
  };
  (truncated, Some(block2))
}

#[allow(clippy::too_many_arguments)]
fn send<E: Endpoint>(
  handle: SubscriberHandle,
  registry: &SubscriberRegistry<E>,
  transactions: &mut impl TransactionLayer<E>,
  transaction: Option<crate::collaborators::TransactionHandle>,
  mid: crate::collaborators::Mid,
  msg_type: MessageType,
  code: MessageCode,
  observe: Option<u32>,
  block2: Option<Block2>,
  payload: bytes::Bytes,
) -> DispatchOutcome {
  let sub = registry.get(handle).expect("pending handle is valid");
  let message = OutgoingMessage {
    subscriber: handle,
    endpoint: sub.endpoint.clone(),
    mid,
    msg_type,
    code,
    token: sub.token,
    observe,
    block2,
    payload,
  };
  let is_con = transaction.is_some();
  transactions.send(transaction, message);
  if is_con {
    DispatchOutcome::SentCon
  } else {
    DispatchOutcome::SentNon
  }
}
