//! [`ObserveEngine`]: the public facade tying the registry, scheduler,
//! builder, and removal modules into the single object an embedder holds.

use crate::{
  collaborators::{
    InboundRequest, Mid, NotificationTimer, ObserveReply, ResourceHandler, ResourceMeta, TransactionCompletion,
    TransactionLayer,
  },
  config::EngineConfig,
  observe_handler,
  registry::{ListKind, SubscriberRegistry},
  removal,
  scheduler,
  subscriber::SubscriberHandle,
  token::Token,
  Endpoint,
};

/// A single resource's CoAP Observe bookkeeping: subscriber pool, the two
/// intrusive lists, and the shared-timer scheduling logic over them.
///
/// Not `Sync`: the engine assumes a single-threaded, cooperative call
/// pattern (an embedder invoking it from one event loop) and carries no
/// internal locking. An embedder crossing a thread boundary is expected to
/// guard its own `ObserveEngine` instance itself.
pub struct ObserveEngine<E> {
  registry: SubscriberRegistry<E>,
  config: EngineConfig,
}

impl<E: Endpoint> ObserveEngine<E> {
  pub fn new(config: EngineConfig) -> Self {
    Self {
      registry: SubscriberRegistry::new(config.max_observers),
      config,
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn observer_count(&self) -> usize {
    self.registry.in_use()
  }

  /// Interprets an inbound request's Observe option, registering or
  /// deregistering a subscriber as appropriate. Returns `None` when the
  /// request carries no Observe option (or an option value the engine
  /// doesn't recognize) — the caller's normal GET handling applies.
  pub fn observe_handler(&mut self, request: &InboundRequest<E>) -> Option<ObserveReply> {
    observe_handler::observe_handler(&mut self.registry, &self.config, request)
  }

  /// Whether any subscriber's URL has `uri_path` as a plain string prefix.
  /// This is a looser test than [`Self::notify_observers`]'s matching rule
  /// — see [`scheduler::has_observers_prefix_match`].
  ///
  /// Checked over the unactive and pending lists only, not the whole pool:
  /// a subscriber currently detached mid-transaction is neither unactive
  /// nor pending, and the original `coap_has_observers` never sees it
  /// either.
  pub fn has_observers(&self, uri_path: &str) -> bool {
    let matches = |handle: &SubscriberHandle| {
      self
        .registry
        .get(*handle)
        .map(|sub| scheduler::has_observers_prefix_match(&sub.url, uri_path))
        .unwrap_or(false)
    };
    self.registry.snapshot(ListKind::Unactive).iter().any(matches)
      || self.registry.snapshot(ListKind::Pending).iter().any(matches)
  }

  /// Queues a notification to every subscriber matching `resource` and
  /// arms the shared timer. Equivalent to `NotifyObserversSub(resource, "")`.
  pub fn notify_observers(&mut self, timer: &mut impl NotificationTimer, resource: &ResourceMeta) {
    self.notify_observers_sub(timer, resource, "")
  }

  /// Queues a notification to every subscriber matching `resource`
  /// concatenated with `subpath` (honoring the sub-resource-prefix rule
  /// when `resource.has_sub_resources` is set) and arms the shared timer.
  pub fn notify_observers_sub(
    &mut self,
    timer: &mut impl NotificationTimer,
    resource: &ResourceMeta,
    subpath: &str,
  ) {
    scheduler::notify_observers_sub(&mut self.registry, &self.config, timer, resource, subpath);
  }

  /// Dispatches one tick's worth of pending notifications. Call when the
  /// timer armed by [`Self::notify_observers`] or a prior call to this
  /// method fires.
  pub fn on_timer_fire(
    &mut self,
    resource_handler: &mut impl ResourceHandler<E>,
    transactions: &mut impl TransactionLayer<E>,
    timer: &mut impl NotificationTimer,
  ) {
    scheduler::on_timer_fire(&mut self.registry, &self.config, resource_handler, transactions, timer);
  }

  /// Reports that a confirmable notification's transaction has reached a
  /// terminal state (ACKed, timed out, or aborted).
  pub fn on_transaction_complete(&mut self, handle: SubscriberHandle, completion: TransactionCompletion) {
    scheduler::on_transaction_complete(&mut self.registry, handle, completion);
  }

  pub fn remove_all(&mut self) -> usize {
    removal::remove_all(&mut self.registry)
  }

  pub fn remove_by_client(&mut self, endpoint: &E) -> usize {
    removal::remove_by_client(&mut self.registry, endpoint)
  }

  pub fn remove_by_token(&mut self, endpoint: &E, token: &Token) -> usize {
    removal::remove_by_token(&mut self.registry, endpoint, token)
  }

  pub fn remove_by_uri(&mut self, endpoint: Option<&E>, uri: &str) -> usize {
    removal::remove_by_uri(&mut self.registry, endpoint, uri)
  }

  pub fn remove_by_mid(&mut self, endpoint: &E, mid: Mid) -> usize {
    removal::remove_by_mid(&mut self.registry, endpoint, mid)
  }
}
