//! The notification scheduler: drives pending subscribers through
//! [`crate::builder::dispatch_one`] and owns the single shared timer's
//! arm/disarm decisions.

use std::time::Duration;

use log::{debug, info};

use crate::{
  builder::{dispatch_one, DispatchOutcome},
  collaborators::{NotificationTimer, ResourceHandler, ResourceMeta, TransactionCompletion, TransactionLayer},
  config::EngineConfig,
  registry::{ListKind, SubscriberRegistry},
  subscriber::{ListMembership, SubscriberHandle, SubscriberState},
  Endpoint,
};

/// Computes the URL a subscriber is matched against for a given
/// notification: `resource_url` concatenated with `subpath` when `subpath`
/// is non-empty and the result fits within `url_max` bytes; `resource_url`
/// alone otherwise.
pub fn effective_url(resource_url: &str, subpath: &str, url_max: usize) -> String {
  if subpath.is_empty() {
    return resource_url.to_string();
  }
  let mut combined = String::with_capacity(resource_url.len() + subpath.len());
  combined.push_str(resource_url);
  combined.push_str(subpath);
  if combined.len() >= url_max {
    resource_url.to_string()
  } else {
    combined
  }
}

/// The notify-time matching rule: a subscriber matches iff its URL is
/// byte-equal to the effective URL, or the resource declares sub-resources
/// and the subscriber's URL begins with the effective URL followed by `/`.
/// Matching is case-sensitive and anchored at the start.
pub fn notify_matches(sub_url: &str, effective: &str, has_sub_resources: bool) -> bool {
  if sub_url == effective {
    return true;
  }
  if !has_sub_resources {
    return false;
  }
  sub_url
    .strip_prefix(effective)
    .map(|rest| rest.starts_with('/'))
    .unwrap_or(false)
}

/// The looser prefix test `HasObservers` uses: a plain `starts_with`, with
/// no `/`-boundary check, so `has_observers("/a")` also reports a
/// subscriber registered on `/abc`. Kept as a deliberately-preserved quirk
/// distinct from [`notify_matches`]; see the crate's design notes.
pub fn has_observers_prefix_match(sub_url: &str, path: &str) -> bool {
  sub_url.starts_with(path)
}

/// Marks every unactive subscriber matching `resource` (optionally plus
/// `subpath`, per [`effective_url`]/[`notify_matches`]) as pending, and
/// arms the shared timer if it wasn't already.
pub fn notify_observers_sub<E: Endpoint>(
  registry: &mut SubscriberRegistry<E>,
  config: &EngineConfig,
  timer: &mut impl NotificationTimer,
  resource: &ResourceMeta,
  subpath: &str,
) {
  let effective = effective_url(&resource.url, subpath, config.url_max);
  let candidates = registry.snapshot(ListKind::Unactive);
  let mut matched_any = false;
  for handle in candidates {
    let sub = match registry.get(handle) {
      Ok(s) => s,
      Err(_) => continue,
    };
    if notify_matches(&sub.url, &effective, resource.has_sub_resources) {
      debug!("marking subscriber on {:?} pending for {effective}", handle);
      registry.move_to_pending(handle).expect("handle just read is valid");
      matched_any = true;
    }
  }
  if matched_any {
    info!(
      "armed notification timer for {effective} ({} pending)",
      registry.pending_len()
    );
    timer.arm(Duration::from_millis(config.pending_dispatch_delay_ms));
  }
}

/// Drains the pending list by one tick: dispatches *at most one* pending
/// subscriber (the head of the pending list), then re-arms the timer to
/// drain any remainder, or disarms it once the pending list is empty.
/// Dispatching the whole snapshot in one call would turn a single timer
/// callback into a synchronous burst sized to however many subscribers
/// happen to be pending, defeating the stack-depth/fairness rationale
/// behind using a timer to begin with — see §5/§9.
///
/// Invariant: the timer is armed iff `pending_len() > 0` or a retry is
/// outstanding — never armed unconditionally "just in case".
pub fn on_timer_fire<E: Endpoint>(
  registry: &mut SubscriberRegistry<E>,
  config: &EngineConfig,
  resource_handler: &mut impl ResourceHandler<E>,
  transactions: &mut impl TransactionLayer<E>,
  timer: &mut impl NotificationTimer,
) {
  let mut retry_pending = false;
  if let Some(handle) = registry.pending_head() {
    match dispatch_one(handle, registry, config, resource_handler, transactions) {
      DispatchOutcome::SentNon => {
        registry
          .move_to_unactive(handle)
          .expect("handle just dispatched is valid");
      }
      DispatchOutcome::SentCon => {
        registry.detach(handle).expect("handle just dispatched is valid");
        let sub = registry
          .get_mut(handle)
          .expect("handle just detached is valid");
        sub.state.insert(SubscriberState::Transaction);
      }
      DispatchOutcome::Retry => {
        retry_pending = true;
      }
    }
  }
  if registry.pending_len() > 0 || retry_pending {
    let delay = if retry_pending {
      Duration::from_millis(config.notification_retry_period_ms)
    } else {
      Duration::from_millis(config.pending_dispatch_delay_ms)
    };
    debug!("re-arming timer for {delay:?} ({} still pending)", registry.pending_len());
    timer.arm(delay);
  } else {
    timer.disarm();
  }
}

/// A confirmable notification's transaction has finished. Honors a removal
/// that raced with it (the subscriber is freed instead of being returned to
/// a list), otherwise returns it to unactive and lets the next
/// `notify_observers` sweep pick it back up.
pub fn on_transaction_complete<E: Endpoint>(
  registry: &mut SubscriberRegistry<E>,
  handle: SubscriberHandle,
  _completion: TransactionCompletion,
) {
  let Ok(sub) = registry.get_mut(handle) else {
    return;
  };
  sub.state.remove(SubscriberState::Transaction);
  let removed = sub.state.contains(SubscriberState::Removed);
  if removed {
    info!("freeing subscriber {:?}: removal raced with its transaction", handle);
    let _ = registry.free(handle);
    return;
  }
  if registry.get(handle).map(|s| s.membership()) == Ok(ListMembership::Detached) {
    registry
      .move_to_unactive(handle)
      .expect("handle is valid here");
  }
}
