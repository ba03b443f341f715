use std::collections::HashMap;
use std::time::Duration;

use time::OffsetDateTime;

/// Consecutive-failure counters keyed by credential hash (spec.md §4.2:
/// "retry counters are keyed by credential hash and are reset by any
/// successful probe").
///
/// Counters decay to zero once `decay_after` has elapsed since the last
/// recorded failure, so a credential that failed once months ago isn't one
/// probe away from exhausting its retry budget today (spec.md §9 open
/// question, resolved to a bounded 1h decay window).
pub struct ProbeRetryLedger {
    entries: HashMap<String, (u32, OffsetDateTime)>,
    decay_after: Duration,
}

impl ProbeRetryLedger {
    pub fn new(decay_after: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            decay_after,
        }
    }

    /// Record a failure at `now`, applying decay first, and return the new
    /// consecutive-failure count.
    pub fn record_failure(&mut self, hash: &str, now: OffsetDateTime) -> u32 {
        let entry = self.entries.entry(hash.to_string()).or_insert((0, now));
        if now - entry.1 > self.decay_after {
            entry.0 = 0;
        }
        entry.0 += 1;
        entry.1 = now;
        entry.0
    }

    pub fn clear(&mut self, hash: &str) {
        self.entries.remove(hash);
    }

    pub fn count(&self, hash: &str) -> u32 {
        self.entries.get(hash).map(|(c, _)| *c).unwrap_or(0)
    }
}
