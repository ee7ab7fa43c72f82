//! Background task retiring idle connections past their bounds.

use std::sync::Weak;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::connector::Connector;
use crate::pool::PoolInner;

/// Shortest interval the reaper will run at.
pub const MIN_REAPER_INTERVAL: Duration = Duration::from_millis(250);

/// How often the reaper runs for `config`, or `None` when nothing can expire.
///
/// An explicit `reaper_interval` wins. Otherwise the reaper runs at half the
/// smaller non-zero bound, so an idle connection outlives its bound by at
/// most half of it.
#[must_use]
pub fn interval_for(config: &PoolConfig) -> Option<Duration> {
    if let Some(interval) = config.reaper_interval {
        return Some(interval.max(MIN_REAPER_INTERVAL));
    }

    [config.max_lifetime, config.idle_timeout]
        .into_iter()
        .filter(|bound| !bound.is_zero())
        .min()
        .map(|bound| (bound / 2).max(MIN_REAPER_INTERVAL))
}

/// Spawn the reaper. It holds only a weak reference, so dropping every pool
/// handle ends it as well as cancelling `stop`.
pub(crate) fn spawn<C: Connector>(
    pool: Weak<PoolInner<C>>,
    interval: Duration,
    stop: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(pool) = pool.upgrade() else {
                break;
            };
            pool.reap().await;
        }

        tracing::trace!("reaper stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(lifetime: u64, idle: u64) -> PoolConfig {
        PoolConfig::new()
            .max_lifetime(Duration::from_secs(lifetime))
            .idle_timeout(Duration::from_secs(idle))
    }

    #[test]
    fn test_interval_from_smaller_bound() {
        assert_eq!(interval_for(&config(1800, 600)), Some(Duration::from_secs(300)));
        assert_eq!(interval_for(&config(60, 0)), Some(Duration::from_secs(30)));
        assert_eq!(interval_for(&config(0, 20)), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_no_reaper_when_unbounded() {
        assert_eq!(interval_for(&config(0, 0)), None);
    }

    #[test]
    fn test_interval_floor() {
        let cfg = PoolConfig::new()
            .max_lifetime(Duration::ZERO)
            .idle_timeout(Duration::from_millis(100));
        assert_eq!(interval_for(&cfg), Some(MIN_REAPER_INTERVAL));

        let cfg = config(0, 0).reaper_interval(Duration::from_millis(10));
        assert_eq!(interval_for(&cfg), Some(MIN_REAPER_INTERVAL));
    }

    #[test]
    fn test_explicit_interval_wins() {
        let cfg = config(1800, 600).reaper_interval(Duration::from_secs(5));
        assert_eq!(interval_for(&cfg), Some(Duration::from_secs(5)));
    }
}
