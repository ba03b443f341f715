use std::future::Future;
use std::time::Duration;

use time::OffsetDateTime;

/// Per-provider scheduling parameters (spec.md §4.2 cadence).
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Minimum time between two probes of the same credential.
    pub min_interval: Duration,
    /// Target period for a full pass over every credential.
    pub full_cycle: Duration,
}

impl SchedulerConfig {
    pub const fn new(min_interval: Duration, full_cycle: Duration) -> Self {
        Self {
            min_interval,
            full_cycle,
        }
    }
}

/// Pick the credential with the oldest `last_checked` that has respected
/// `min_interval` since its last probe (spec.md §4.2: "a scheduler picks the
/// credential with the oldest `lastChecked` respecting the minimum
/// interval"). Never-checked credentials (`None`) sort oldest.
pub fn pick_due<'a, I>(entries: I, config: &SchedulerConfig, now: OffsetDateTime) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, Option<OffsetDateTime>)>,
{
    entries
        .into_iter()
        .filter(|(_, last)| match last {
            Some(t) => now - *t >= config.min_interval,
            None => true,
        })
        .min_by_key(|(_, last)| last.unwrap_or(OffsetDateTime::UNIX_EPOCH))
        .map(|(hash, _)| hash)
}

/// Drives a recurring probe cycle on a fixed tick, independent of any
/// particular provider's storage. The provider crate owns its credential
/// list and `RwLock`; this just supplies the "every `tick`, do a unit of
/// work" loop, the same shape as the teacher's background recovery tasks
/// but driven by an interval instead of a heap of deadlines (there is no
/// single deadline here — every tick a new "oldest due" candidate may have
/// emerged).
pub struct CredentialScheduler;

impl CredentialScheduler {
    pub fn spawn<F, Fut>(tick: Duration, mut on_tick: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                on_tick().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_checked_beats_recently_checked() {
        let now = OffsetDateTime::now_utc();
        let config = SchedulerConfig::new(Duration::from_secs(3), Duration::from_secs(86400));
        let entries = vec![("a", Some(now)), ("b", None)];
        assert_eq!(pick_due(entries, &config, now), Some("b"));
    }

    #[test]
    fn respects_minimum_interval() {
        let now = OffsetDateTime::now_utc();
        let config = SchedulerConfig::new(Duration::from_secs(3), Duration::from_secs(86400));
        let entries = vec![("a", Some(now))];
        assert_eq!(pick_due(entries, &config, now), None, "too soon since last check");

        let later = now + Duration::from_secs(5);
        let entries = vec![("a", Some(now))];
        assert_eq!(pick_due(entries, &config, later), Some("a"));
    }

    #[test]
    fn picks_oldest_among_multiple_due() {
        let now = OffsetDateTime::now_utc();
        let config = SchedulerConfig::new(Duration::from_secs(3), Duration::from_secs(86400));
        let older = now - Duration::from_secs(100);
        let newer = now - Duration::from_secs(10);
        let entries = vec![("newer", Some(newer)), ("older", Some(older))];
        assert_eq!(pick_due(entries, &config, now), Some("older"));
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_ticks_on_schedule() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let handle = CredentialScheduler::spawn(Duration::from_secs(3), move || {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(count.load(Ordering::SeqCst) >= 2);
        handle.abort();
    }
}
