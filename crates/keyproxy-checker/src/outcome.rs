use std::time::Duration;

use time::OffsetDateTime;

use keyproxy_core::credential::DisableReason;
use keyproxy_core::CredentialMeta;

use crate::retry_ledger::ProbeRetryLedger;

/// Classification of a single probe result, per the status → transition
/// table in spec.md §4.2. Carries only what's common across providers;
/// provider-specific capability writes (model ids, tier, pozzed flag, ...)
/// travel in [`ProbeOutcome::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeClass {
    Success,
    /// 401 / 403 / "invalid API key".
    InvalidKey,
    /// 402 / insufficient funds / billing blocked.
    BillingBlocked,
    /// 429 rate-limit window: stays selectable, just re-probed sooner.
    RateLimited,
    /// 429 hard quota (`quota_limit_value:0`, project suspended).
    HardQuota,
    /// 5xx or network-level failure.
    ServerError,
    /// Prompt-injection detection matched (Anthropic). Not disabling.
    Pozzed,
}

/// The result of one [`crate::HealthProbe::probe`] call.
pub struct ProbeOutcome<T> {
    pub class: ProbeClass,
    /// Provider-specific capability mutation (model ids/families, tier,
    /// billing flags, ...), applied after the common transition.
    pub apply: Option<Box<dyn FnOnce(&mut T) + Send>>,
}

impl<T> ProbeOutcome<T> {
    pub fn new(class: ProbeClass) -> Self {
        Self { class, apply: None }
    }

    pub fn with_apply(class: ProbeClass, apply: impl FnOnce(&mut T) + Send + 'static) -> Self {
        Self {
            class,
            apply: Some(Box::new(apply)),
        }
    }
}

/// Common part of the status → transition table, operating purely on
/// `CredentialMeta`. Provider-specific fields are written separately via
/// `ProbeOutcome::apply` before or after this call.
///
/// `full_cycle` is the provider's full recheck period, used by the
/// `RateLimited` branch to pull `last_checked` back so the scheduler revisits
/// the credential sooner instead of waiting a full cycle.
pub fn apply_transition(
    meta: &mut CredentialMeta,
    class: ProbeClass,
    now: OffsetDateTime,
    full_cycle: Duration,
    ledger: &mut ProbeRetryLedger,
    max_server_error_retries: u32,
) {
    match class {
        ProbeClass::Success => {
            ledger.clear(&meta.hash);
            meta.touch_checked(now);
            tracing::debug!(hash = %meta.hash, "probe succeeded");
        }
        ProbeClass::InvalidKey => {
            meta.disable(DisableReason::Revoked);
            meta.touch_checked(now);
            tracing::warn!(hash = %meta.hash, "credential disabled: invalid key");
        }
        ProbeClass::BillingBlocked | ProbeClass::HardQuota => {
            meta.disable(DisableReason::Quota);
            meta.touch_checked(now);
            tracing::warn!(hash = %meta.hash, ?class, "credential disabled: over quota");
        }
        ProbeClass::RateLimited => {
            let soon = full_cycle.saturating_sub(Duration::from_secs(5 * 60));
            meta.last_checked = Some(now - soon);
            tracing::debug!(hash = %meta.hash, "credential rate limited, rechecking sooner");
        }
        ProbeClass::ServerError => {
            let failures = ledger.record_failure(&meta.hash, now);
            if failures > max_server_error_retries {
                meta.disable(DisableReason::Revoked);
                meta.touch_checked(now);
                ledger.clear(&meta.hash);
                tracing::error!(hash = %meta.hash, failures, "credential disabled: exhausted server error retries");
            } else {
                tracing::debug!(hash = %meta.hash, failures, "probe server error, will retry");
            }
        }
        ProbeClass::Pozzed => {
            meta.touch_checked(now);
            tracing::warn!(hash = %meta.hash, "probe flagged prompt-injection match");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyproxy_core::service::Service;

    fn meta() -> CredentialMeta {
        CredentialMeta::new(Service::Deepseek, "sk-probe", "")
    }

    #[test]
    fn server_error_disables_after_exhausting_retries() {
        let mut m = meta();
        let mut ledger = ProbeRetryLedger::new(Duration::from_secs(3600));
        let now = OffsetDateTime::now_utc();

        apply_transition(&mut m, ProbeClass::ServerError, now, Duration::from_secs(86400), &mut ledger, 2);
        assert!(!m.is_disabled);
        apply_transition(&mut m, ProbeClass::ServerError, now, Duration::from_secs(86400), &mut ledger, 2);
        assert!(!m.is_disabled);
        apply_transition(&mut m, ProbeClass::ServerError, now, Duration::from_secs(86400), &mut ledger, 2);
        assert!(m.is_disabled);
        assert!(m.is_revoked);
    }

    #[test]
    fn success_resets_retry_ledger() {
        let mut m = meta();
        let mut ledger = ProbeRetryLedger::new(Duration::from_secs(3600));
        let now = OffsetDateTime::now_utc();
        apply_transition(&mut m, ProbeClass::ServerError, now, Duration::from_secs(86400), &mut ledger, 5);
        assert_eq!(ledger.count(&m.hash), 1);
        apply_transition(&mut m, ProbeClass::Success, now, Duration::from_secs(86400), &mut ledger, 5);
        assert_eq!(ledger.count(&m.hash), 0);
    }

    #[test]
    fn billing_blocked_sets_over_quota_not_revoked() {
        let mut m = meta();
        let mut ledger = ProbeRetryLedger::new(Duration::from_secs(3600));
        let now = OffsetDateTime::now_utc();
        apply_transition(&mut m, ProbeClass::BillingBlocked, now, Duration::from_secs(86400), &mut ledger, 2);
        assert!(m.is_disabled);
        assert!(m.is_over_quota);
        assert!(!m.is_revoked);
    }

    #[test]
    fn rate_limited_pulls_last_checked_back_but_stays_enabled() {
        let mut m = meta();
        let mut ledger = ProbeRetryLedger::new(Duration::from_secs(3600));
        let now = OffsetDateTime::now_utc();
        apply_transition(&mut m, ProbeClass::RateLimited, now, Duration::from_secs(86400), &mut ledger, 2);
        assert!(!m.is_disabled);
        assert!(m.last_checked.unwrap() < now);
    }
}
