use std::sync::Arc;
use std::time::Duration;

use keyproxy_core::service::Service;

use crate::pool::KeyPool;

/// `hashOf(hostname) mod 7` turned into an hour offset (spec.md §4.3: "Global
/// cron hooks ... phase-shifted by `hashOf(hostname) mod 7` hours to avoid
/// fleet-wide synchronization").
fn phase_shift(hostname: &str) -> Duration {
    let digest = keyproxy_common::stable_hash(hostname, "recheck-phase");
    let n = u64::from_str_radix(&digest[0..8], 16).unwrap_or(0);
    Duration::from_secs((n % 7) * 3600)
}

/// Spawns the two global recheck-cron tasks (spec.md §4.3): a forced full
/// recheck of OpenAI every 8h and Google AI daily, each staggered by the same
/// per-host phase offset so a fleet of instances doesn't hammer every
/// provider's API in lockstep. Coexists with, and never replaces, each
/// provider's own continuous per-credential checker.
pub fn spawn_recheck_cron(pool: Arc<KeyPool>, hostname: &str) -> Vec<tokio::task::JoinHandle<()>> {
    let offset = phase_shift(hostname);
    vec![
        spawn_one(Arc::clone(&pool), Service::OpenAI, Duration::from_secs(8 * 3600), offset),
        spawn_one(pool, Service::GoogleAI, Duration::from_secs(24 * 3600), offset),
    ]
}

fn spawn_one(
    pool: Arc<KeyPool>,
    service: Service,
    period: Duration,
    offset: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(offset).await;
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(err) = pool.recheck(service).await {
                tracing::warn!(%service, %err, "recheck cron tick failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_shift_is_stable_and_bounded() {
        let a = phase_shift("host-a");
        let b = phase_shift("host-a");
        assert_eq!(a, b);
        assert!(a < Duration::from_secs(7 * 3600));
    }

    #[test]
    fn phase_shift_varies_across_hosts() {
        let a = phase_shift("host-a");
        let b = phase_shift("host-totally-different");
        assert_ne!(a, b);
    }
}
