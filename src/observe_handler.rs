//! The Observe option entry point: interprets an inbound GET's Observe
//! option and registers or deregisters a subscriber accordingly. Invoked
//! from the resource-handling path whenever a request carries an Observe
//! option.

use log::{debug, info, warn};

use crate::{
  collaborators::{InboundRequest, MessageCode, ObserveReply},
  config::EngineConfig,
  registry::SubscriberRegistry,
  removal::remove_by_token,
  subscriber::SubscriberHandle,
  token::Token,
  Endpoint,
};

/// Truncates `url` to at most `url_max - 1` bytes on a UTF-8 char
/// boundary, as if copied into a fixed `url_max`-byte buffer with a null
/// terminator, without risking a split multi-byte character.
pub fn truncate_url(url: &str, url_max: usize) -> &str {
  let limit = url_max.saturating_sub(1);
  if url.len() <= limit {
    return url;
  }
  warn!("uri_path of {} bytes exceeds url_max {url_max}, truncating", url.len());
  let mut end = limit;
  while end > 0 && !url.is_char_boundary(end) {
    end -= 1;
  }
  &url[..end]
}

/// Registers a new subscriber, or refreshes an existing one with the same
/// (endpoint, url) — re-registering the same resource supersedes the
/// previous registration — returning the pool's exhaustion as a plain
/// `ObserveReply` error rather than an internal error, since a constrained
/// pool filling up is an expected runtime condition, not a programming
/// mistake.
fn add_subscriber<E: Endpoint>(
  registry: &mut SubscriberRegistry<E>,
  config: &EngineConfig,
  endpoint: E,
  token: Token,
  url: &str,
) -> Result<SubscriberHandle, ObserveReply> {
  let url = truncate_url(url, config.url_max).to_owned();

  // Superseding: an existing registration for the same endpoint+url is
  // dropped before allocating the new one, so a client that re-GETs with
  // Observe:0 on a resource it already watches doesn't consume two slots.
  let existing = registry.find_all(|sub| sub.endpoint == endpoint && sub.url == url);
  if !existing.is_empty() {
    debug!("registration on {url} supersedes {} prior subscription(s)", existing.len());
  }
  for handle in existing {
    let _ = registry.free(handle);
  }

  registry.allocate(endpoint, token, url).ok_or_else(|| {
    warn!("subscriber pool exhausted, rejecting registration");
    ObserveReply {
      code: MessageCode::ServiceUnavailable,
      observe: None,
      payload: bytes::Bytes::from_static(b"TooManyObservers"),
    }
  })
}

/// The engine-facing entry point: reads `request.observe`, registers or
/// deregisters as appropriate, and fills `reply`'s Observe-related fields.
/// A request without an Observe option, or with a value other than 0/1, is
/// left untouched — the caller's ordinary GET handling applies.
pub fn observe_handler<E: Endpoint>(
  registry: &mut SubscriberRegistry<E>,
  config: &EngineConfig,
  request: &InboundRequest<E>,
) -> Option<ObserveReply> {
  let observe = request.observe?;
  let Some(endpoint) = request.endpoint.clone() else {
    warn!("Observe option present on {} but request has no source endpoint, ignoring", request.uri_path);
    return None;
  };

  match observe {
    0 => match add_subscriber(registry, config, endpoint, request.token, &request.uri_path) {
      Ok(handle) => {
        let observe_value = registry
          .get_mut(handle)
          .expect("just-allocated handle is valid")
          .obs_counter
          .advance();
        info!("registered observer on {}", request.uri_path);
        Some(ObserveReply {
          code: MessageCode::Content,
          observe: Some(observe_value),
          payload: bytes::Bytes::new(),
        })
      }
      Err(reply) => Some(reply),
    },
    1 => {
      let removed = remove_by_token(registry, &endpoint, &request.token);
      info!("deregistered {removed} observer(s) on {}", request.uri_path);
      Some(ObserveReply {
        code: MessageCode::Content,
        observe: None,
        payload: bytes::Bytes::new(),
      })
    }
    other => {
      debug!("ignoring unrecognized Observe value {other} on {}", request.uri_path);
      None
    }
  }
}
