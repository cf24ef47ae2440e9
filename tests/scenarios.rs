//! End-to-end scenarios driving [`ObserveEngine`] through fake in-memory
//! collaborators, covering the six scenarios the engine's design notes
//! call out plus boundary-value checks on the pool and counter.

use std::{cell::RefCell, rc::Rc, time::Duration};

use anyhow::Context;
use hex_literal::hex;

use coap_observe_engine::{
  collaborators::{
    Block2, HandlerOutcome, InboundRequest, MessageCode, MessageType, NotificationResponse,
    NotificationTimer, OutgoingMessage, ResourceHandler, SyntheticRequest, TransactionCompletion,
    TransactionHandle, TransactionLayer,
  },
  EngineConfig, ObserveEngine, ResourceMeta, SubscriberHandle, Token,
};

/// A resource handler that always succeeds with a fixed body and reports
/// no further Block2 continuation.
struct EchoHandler {
  body: &'static [u8],
}

impl ResourceHandler<u32> for EchoHandler {
  fn call(&mut self, _request: &SyntheticRequest, response: &mut NotificationResponse) -> HandlerOutcome {
    response.payload = bytes::Bytes::from_static(self.body);
    HandlerOutcome::Handled {
      new_offset: coap_observe_engine::collaborators::BlockOffset::NoMore,
    }
  }
}

/// A handler that always reports `NotHandled`, simulating a resource that
/// vanished between registration and notification.
struct GoneHandler;

impl ResourceHandler<u32> for GoneHandler {
  fn call(&mut self, _request: &SyntheticRequest, _response: &mut NotificationResponse) -> HandlerOutcome {
    HandlerOutcome::NotHandled
  }
}

struct RecordedMessage {
  endpoint: u32,
  mid: u16,
  msg_type: MessageType,
  code: MessageCode,
  observe: Option<u32>,
  block2: Option<Block2>,
  subscriber: SubscriberHandle,
}

/// An in-memory transaction layer: every confirmable send is granted a
/// transaction unless `transaction_capacity` is exhausted; every send is
/// recorded for the test to inspect.
struct FakeTransactions {
  next_mid: u16,
  transaction_capacity: usize,
  in_flight: usize,
  sent: Vec<RecordedMessage>,
}

impl FakeTransactions {
  fn new(transaction_capacity: usize) -> Self {
    Self {
      next_mid: 1,
      transaction_capacity,
      in_flight: 0,
      sent: Vec::new(),
    }
  }
}

impl TransactionLayer<u32> for FakeTransactions {
  fn next_mid(&mut self) -> u16 {
    let mid = self.next_mid;
    self.next_mid = self.next_mid.wrapping_add(1);
    mid
  }

  fn new_transaction(&mut self, _mid: u16, _endpoint: &u32) -> Option<TransactionHandle> {
    if self.in_flight >= self.transaction_capacity {
      return None;
    }
    self.in_flight += 1;
    Some(TransactionHandle(self.in_flight as u64))
  }

  fn send(&mut self, _transaction: Option<TransactionHandle>, message: OutgoingMessage<u32>) {
    self.sent.push(RecordedMessage {
      endpoint: message.endpoint,
      mid: message.mid,
      msg_type: message.msg_type,
      code: message.code,
      observe: message.observe,
      block2: message.block2,
      subscriber: message.subscriber,
    });
  }
}

#[derive(Default, Clone)]
struct FakeTimer {
  armed: Rc<RefCell<Option<Duration>>>,
}

impl NotificationTimer for FakeTimer {
  fn arm(&mut self, after: Duration) {
    *self.armed.borrow_mut() = Some(after);
  }

  fn disarm(&mut self) {
    *self.armed.borrow_mut() = None;
  }
}

fn register(engine: &mut ObserveEngine<u32>, endpoint: u32, token: &[u8], uri: &str) {
  let request = InboundRequest {
    endpoint: Some(endpoint),
    token: Token::new(token),
    uri_path: uri.to_string(),
    observe: Some(0),
  };
  let reply = engine.observe_handler(&request).expect("observe option present");
  assert_eq!(reply.code, MessageCode::Content);
}

#[test_log::test]
fn register_notify_deregister_round_trip() {
  let mut engine = ObserveEngine::new(EngineConfig::default());
  register(&mut engine, 1, &hex!("AA"), "/sensors/temp");
  assert!(engine.has_observers("/sensors/temp"));

  let mut handler = EchoHandler { body: b"21.5" };
  let mut transactions = FakeTransactions::new(4);
  let mut timer = FakeTimer::default();
  engine.notify_observers(&mut timer, &ResourceMeta::new("/sensors/temp", false));
  assert!(timer.armed.borrow().is_some());

  engine.on_timer_fire(&mut handler, &mut transactions, &mut timer);
  assert_eq!(transactions.sent.len(), 1);
  // Registration itself consumed counter 0 (returned in the registration
  // reply), so the scheduler's first notification carries counter 1 and,
  // with the default refresh interval of 10, is non-confirmable.
  assert_eq!(transactions.sent[0].msg_type, MessageType::NonConfirmable);
  assert_eq!(transactions.sent[0].observe, Some(1));
  assert!(timer.armed.borrow().is_none());

  let deregister = InboundRequest {
    endpoint: Some(1u32),
    token: Token::new(&hex!("AA")),
    uri_path: "/sensors/temp".to_string(),
    observe: Some(1),
  };
  engine.observe_handler(&deregister);
  assert!(!engine.has_observers("/sensors/temp"));
  assert_eq!(engine.observer_count(), 0);
}

#[test]
fn every_refresh_interval_th_notification_is_confirmable() {
  let mut config = EngineConfig::default();
  config.observe_refresh_interval = 4;
  let mut engine = ObserveEngine::new(config);
  register(&mut engine, 1, &[0x01], "/r");

  let mut handler = EchoHandler { body: b"x" };
  let mut transactions = FakeTransactions::new(4);
  let mut timer = FakeTimer::default();

  // Registration already consumed counter 0 (returned in the registration
  // reply), so the scheduler's own notifications start at counter 1: the
  // next three (counters 1, 2, 3) are non-confirmable, and the fourth
  // (counter 4) is the confirmable refresh probe.
  for expected_counter in 1..4 {
    transactions.sent.clear();
    engine.notify_observers(&mut timer, &ResourceMeta::new("/r", false));
    engine.on_timer_fire(&mut handler, &mut transactions, &mut timer);
    assert_eq!(transactions.sent[0].msg_type, MessageType::NonConfirmable);
    assert_eq!(transactions.sent[0].observe, Some(expected_counter));
  }

  transactions.sent.clear();
  engine.notify_observers(&mut timer, &ResourceMeta::new("/r", false));
  engine.on_timer_fire(&mut handler, &mut transactions, &mut timer);
  assert_eq!(transactions.sent[0].msg_type, MessageType::Confirmable);
  assert_eq!(transactions.sent[0].observe, Some(4));
  engine.on_transaction_complete(transactions.sent[0].subscriber, TransactionCompletion::Acked);
}

#[test]
fn pool_exhaustion_rejects_registration_past_capacity() -> anyhow::Result<()> {
  let mut config = EngineConfig::default();
  config.max_observers = 2;
  let mut engine = ObserveEngine::new(config);
  register(&mut engine, 1, &[0x01], "/a");
  register(&mut engine, 2, &[0x02], "/b");
  anyhow::ensure!(engine.observer_count() == 2, "both registrations should have been admitted");

  let request = InboundRequest {
    endpoint: Some(3u32),
    token: Token::new(&[0x03]),
    uri_path: "/c".to_string(),
    observe: Some(0),
  };
  let reply = engine
    .observe_handler(&request)
    .context("a request carrying Observe: 0 always yields a reply")?;
  assert_eq!(reply.code, MessageCode::ServiceUnavailable);
  assert_eq!(reply.payload.as_ref(), b"TooManyObservers");
  assert_eq!(engine.observer_count(), 2);
  Ok(())
}

#[test]
fn duplicate_registration_from_same_endpoint_and_uri_supersedes() {
  let mut engine = ObserveEngine::new(EngineConfig::default());
  register(&mut engine, 1, &[0x01], "/a");
  register(&mut engine, 1, &[0x02], "/a");
  assert_eq!(engine.observer_count(), 1);
}

#[test]
fn reset_removes_subscriber_by_mid() {
  let mut config = EngineConfig::default();
  config.observe_refresh_interval = 1; // every notification is confirmable
  let mut engine = ObserveEngine::new(config);
  register(&mut engine, 1, &[0xAA], "/r");

  let mut handler = EchoHandler { body: b"x" };
  let mut transactions = FakeTransactions::new(4);
  let mut timer = FakeTimer::default();
  engine.notify_observers(&mut timer, &ResourceMeta::new("/r", false));
  engine.on_timer_fire(&mut handler, &mut transactions, &mut timer);
  let mid = transactions.sent[0].mid;
  let handle = transactions.sent[0].subscriber;

  // Every notification here is confirmable, so the subscriber is still
  // mid-transaction: an RST's by-MID removal is deferred until the
  // exchange the RST itself terminates is reported complete, mirroring a
  // real RST both aborting the transaction and triggering removal.
  assert_eq!(engine.remove_by_mid(&1, mid), 1);
  assert_eq!(engine.observer_count(), 1);
  engine.on_transaction_complete(handle, TransactionCompletion::Aborted);
  assert_eq!(engine.observer_count(), 0);
}

#[test]
fn sub_resource_flag_controls_prefix_matching_at_notify_time() {
  let mut engine = ObserveEngine::new(EngineConfig::default());
  register(&mut engine, 1, &[0x01], "/sensors/3");

  let mut handler = EchoHandler { body: b"x" };
  let mut transactions = FakeTransactions::new(4);
  let mut timer = FakeTimer::default();

  // Without has_sub_resources, a notification on the parent resource does
  // not reach a subscriber registered on a child path.
  engine.notify_observers(&mut timer, &ResourceMeta::new("/sensors", false));
  engine.on_timer_fire(&mut handler, &mut transactions, &mut timer);
  assert_eq!(transactions.sent.len(), 0);

  engine.notify_observers(&mut timer, &ResourceMeta::new("/sensors", true));
  engine.on_timer_fire(&mut handler, &mut transactions, &mut timer);
  assert_eq!(transactions.sent.len(), 1);
}

#[test]
fn notify_observers_sub_concatenates_subpath_before_matching() {
  let mut engine = ObserveEngine::new(EngineConfig::default());
  register(&mut engine, 1, &[0x01], "/p/child");

  let mut handler = EchoHandler { body: b"x" };
  let mut transactions = FakeTransactions::new(4);
  let mut timer = FakeTimer::default();

  let resource = ResourceMeta::new("/p", true);
  engine.notify_observers_sub(&mut timer, &resource, "/child");
  engine.on_timer_fire(&mut handler, &mut transactions, &mut timer);
  assert_eq!(transactions.sent.len(), 1);
}

#[test]
fn resource_handler_failure_sends_bad_request_without_observe_option() {
  let mut engine = ObserveEngine::new(EngineConfig::default());
  register(&mut engine, 1, &[0x01], "/gone");

  let mut handler = GoneHandler;
  let mut transactions = FakeTransactions::new(4);
  let mut timer = FakeTimer::default();
  engine.notify_observers(&mut timer, &ResourceMeta::new("/gone", false));
  engine.on_timer_fire(&mut handler, &mut transactions, &mut timer);

  assert_eq!(transactions.sent.len(), 1);
  assert_eq!(transactions.sent[0].code, MessageCode::BadRequest);
  assert_eq!(transactions.sent[0].observe, None);
}

#[test]
fn con_transaction_retry_when_transaction_layer_is_exhausted() {
  let mut config = EngineConfig::default();
  config.observe_refresh_interval = 1; // every notification is confirmable
  let mut engine = ObserveEngine::new(config);
  register(&mut engine, 1, &[0x01], "/r");

  let mut handler = EchoHandler { body: b"x" };
  let mut transactions = FakeTransactions::new(0); // no transaction capacity
  let mut timer = FakeTimer::default();

  engine.notify_observers(&mut timer, &ResourceMeta::new("/r", false));
  engine.on_timer_fire(&mut handler, &mut transactions, &mut timer);

  assert_eq!(transactions.sent.len(), 0);
  // still pending: the timer re-armed for a retry rather than disarming.
  assert!(timer.armed.borrow().is_some());
  assert_eq!(
    *timer.armed.borrow(),
    Some(Duration::from_millis(engine.config().notification_retry_period_ms))
  );
}

#[test]
fn transaction_complete_honors_removal_requested_mid_transaction() {
  let mut config = EngineConfig::default();
  config.observe_refresh_interval = 1;
  let mut engine = ObserveEngine::new(config);
  register(&mut engine, 1, &[0x01], "/r");

  let mut handler = EchoHandler { body: b"x" };
  let mut transactions = FakeTransactions::new(4);
  let mut timer = FakeTimer::default();
  engine.notify_observers(&mut timer, &ResourceMeta::new("/r", false));
  engine.on_timer_fire(&mut handler, &mut transactions, &mut timer);
  assert_eq!(transactions.sent.len(), 1);

  // A deregister arrives while the confirmable exchange is still pending.
  let deregister = InboundRequest {
    endpoint: Some(1u32),
    token: Token::new(&[0x01]),
    uri_path: "/r".to_string(),
    observe: Some(1),
  };
  engine.observe_handler(&deregister);
  // Still counted: the removal is deferred until the transaction settles.
  assert_eq!(engine.observer_count(), 1);

  let handle = transactions.sent[0].subscriber;
  engine.on_transaction_complete(handle, TransactionCompletion::Acked);
  assert_eq!(engine.observer_count(), 0);
}
