//! The safe-removal discipline: a subscriber mid-transaction can't be freed
//! outright (the transaction layer still references it), so removal
//! defers to the [`SubscriberState::Removed`] flag and lets
//! [`crate::scheduler::on_transaction_complete`] finish the job.

use log::debug;

use crate::{
  registry::SubscriberRegistry,
  subscriber::{Subscriber, SubscriberHandle, SubscriberState},
  token::Token,
  Endpoint,
};

/// Frees `handle` immediately if no transaction is outstanding for it, or
/// marks it for deferred removal if one is. Returns `true` if a removal
/// (immediate or deferred) was applied.
fn remove_subscriber<E: Endpoint>(registry: &mut SubscriberRegistry<E>, handle: SubscriberHandle) -> bool {
  let Ok(sub) = registry.get_mut(handle) else {
    return false;
  };
  if sub.state.contains(SubscriberState::Transaction) {
    debug!("deferring removal of {:?}: transaction in flight", handle);
    sub.state.insert(SubscriberState::Removed);
    true
  } else {
    registry.free(handle).is_ok()
  }
}

/// Snapshots both lists plus a predicate-based search so a subscriber
/// currently detached mid-transaction is still found, then applies
/// [`remove_subscriber`] to every match. Snapshotting first means freeing
/// one match never disturbs the walk over the rest.
fn remove_where<E: Endpoint>(
  registry: &mut SubscriberRegistry<E>,
  mut pred: impl FnMut(&Subscriber<E>) -> bool,
) -> usize {
  let matches = registry.find_all(&mut pred);
  let mut removed = 0;
  for handle in matches {
    if remove_subscriber(registry, handle) {
      removed += 1;
    }
  }
  removed
}

/// Removes every subscriber, regardless of endpoint, URL, or token — used
/// when a resource is deleted or the engine is shut down.
pub fn remove_all<E: Endpoint>(registry: &mut SubscriberRegistry<E>) -> usize {
  remove_where(registry, |_| true)
}

/// Removes every subscriber registered from `endpoint`.
pub fn remove_by_client<E: Endpoint>(registry: &mut SubscriberRegistry<E>, endpoint: &E) -> usize {
  remove_where(registry, |sub| &sub.endpoint == endpoint)
}

/// Removes the (at most one, per the superseding rule in
/// [`crate::observe_handler`]) subscriber matching `endpoint` and `token` —
/// the path a Deregister (Observe: 1) request takes.
pub fn remove_by_token<E: Endpoint>(registry: &mut SubscriberRegistry<E>, endpoint: &E, token: &Token) -> usize {
  remove_where(registry, |sub| sub.matches_token(endpoint, token))
}

/// Removes every subscriber registered on exactly `uri`, optionally
/// restricted to `endpoint`. Unlike notify-time matching, this is an exact
/// match on the URI, not a prefix test.
pub fn remove_by_uri<E: Endpoint>(registry: &mut SubscriberRegistry<E>, endpoint: Option<&E>, uri: &str) -> usize {
  remove_where(registry, |sub| sub.matches_uri(endpoint, uri))
}

/// Removes the subscriber whose last-sent notification carried `mid` — the
/// path a CoAP Reset (RST) response takes, since an RST carries no token.
pub fn remove_by_mid<E: Endpoint>(registry: &mut SubscriberRegistry<E>, endpoint: &E, mid: crate::collaborators::Mid) -> usize {
  remove_where(registry, |sub| sub.matches_mid(endpoint, mid))
}
