use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::service::Service;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn add(&mut self, input: u64, output: u64) {
        self.input += input;
        self.output += output;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableReason {
    Quota,
    Revoked,
}

/// Health state as the checker's `{unchecked -> live, pozzed, rate-limited,
/// over-quota, revoked}` lifecycle (spec.md §3) is actually observed from the
/// outside. This is a *view*, computed from the flag fields below — the
/// flags (not this enum) are the source of truth, since several flags can be
/// true at once (e.g. pozzed + rate-limited).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unchecked,
    Revoked,
    OverQuota,
    Disabled,
    RateLimited,
    Live,
}

/// Fields common to every credential (spec.md §3 table), embedded in every
/// `CredentialKind` variant's struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialMeta {
    pub hash: String,
    pub service: Service,
    pub model_families: HashSet<String>,
    pub model_ids: HashSet<String>,
    pub is_disabled: bool,
    pub is_revoked: bool,
    pub is_over_quota: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub rate_limited_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub rate_limited_until: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_used: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_checked: Option<OffsetDateTime>,
    pub prompt_count: u64,
    pub token_usage: HashMap<String, TokenUsage>,
}

impl CredentialMeta {
    pub fn new(service: Service, secret: &str, salt: &str) -> Self {
        Self {
            hash: keyproxy_common::stable_hash(secret, salt),
            service,
            model_families: HashSet::new(),
            model_ids: HashSet::new(),
            is_disabled: false,
            is_revoked: false,
            is_over_quota: false,
            rate_limited_at: None,
            rate_limited_until: None,
            last_used: None,
            last_checked: None,
            prompt_count: 0,
            token_usage: HashMap::new(),
        }
    }

    /// Whether `now` falls inside this credential's rate-limit/throttle
    /// window (spec.md §4.1 `select` filter: `now >= rateLimitedUntil`).
    pub fn is_locked_out(&self, now: OffsetDateTime) -> bool {
        match self.rate_limited_until {
            Some(until) => now < until,
            None => false,
        }
    }

    pub fn lockout_remaining(&self, now: OffsetDateTime) -> Duration {
        match self.rate_limited_until {
            Some(until) if until > now => (until - now)
                .try_into()
                .unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }

    /// spec.md §4.1 `select` base filter, minus provider-specific extras.
    pub fn is_base_eligible(&self, now: OffsetDateTime) -> bool {
        !self.is_disabled && !self.is_over_quota && !self.is_locked_out(now)
    }

    pub fn observed_health(&self, now: OffsetDateTime) -> HealthState {
        if self.is_revoked {
            return HealthState::Revoked;
        }
        if self.is_over_quota {
            return HealthState::OverQuota;
        }
        if self.is_disabled {
            return HealthState::Disabled;
        }
        if self.is_locked_out(now) {
            return HealthState::RateLimited;
        }
        if self.last_checked.is_none() {
            return HealthState::Unchecked;
        }
        HealthState::Live
    }

    /// spec.md §4.1 `disable(hash, reason)`. Idempotent; `isRevoked ⇒
    /// isDisabled` and revocation is sticky (spec.md §8 round-trip test:
    /// `disable(revoked); disable(quota)` leaves `is_revoked == true`).
    pub fn disable(&mut self, reason: DisableReason) {
        self.is_disabled = true;
        match reason {
            DisableReason::Revoked => self.is_revoked = true,
            DisableReason::Quota => self.is_over_quota = true,
        }
    }

    /// spec.md §4.1 `recheck()`: clears `isOverQuota`/`isDisabled` (never
    /// `isRevoked`) and resets `lastChecked` so the scheduler probes it next.
    pub fn recheck(&mut self) {
        self.is_over_quota = false;
        if !self.is_revoked {
            self.is_disabled = false;
        }
        self.last_checked = None;
    }

    /// spec.md §4.1 `incrementUsage`: additive per model family.
    pub fn increment_usage(&mut self, family: &str, input: u64, output: u64) {
        self.token_usage.entry(family.to_string()).or_default().add(input, output);
        self.prompt_count += 1;
    }

    /// spec.md §4.1 `markRateLimited`: `rateLimitedAt = now`,
    /// `rateLimitedUntil = now + lockout`.
    pub fn mark_rate_limited(&mut self, now: OffsetDateTime, lockout: Duration) {
        self.rate_limited_at = Some(now);
        self.rate_limited_until = Some(now + lockout);
    }

    /// spec.md §4.1 throttle rule: `rateLimitedUntil <- max(rateLimitedUntil,
    /// now + reuse_delay)`, never shortening an existing, longer lockout.
    pub fn apply_reuse_throttle(&mut self, now: OffsetDateTime, reuse_delay: Duration) {
        let candidate = now + reuse_delay;
        self.rate_limited_until = Some(match self.rate_limited_until {
            Some(existing) if existing > candidate => existing,
            _ => candidate,
        });
    }

    /// Direct rate-limit-window write driven by parsed response headers
    /// (spec.md §4.1 `updateRateLimits`, OpenAI-specific). Unlike
    /// `mark_rate_limited`, the caller computes the absolute instant.
    pub fn set_rate_limited_until(&mut self, until: OffsetDateTime) {
        self.rate_limited_until = Some(match self.rate_limited_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    pub fn touch_used(&mut self, now: OffsetDateTime) {
        self.last_used = Some(now);
    }

    pub fn touch_checked(&mut self, now: OffsetDateTime) {
        self.last_checked = Some(now);
    }
}
