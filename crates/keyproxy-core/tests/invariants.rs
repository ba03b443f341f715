use std::time::Duration;

use keyproxy_core::credential::{AnthropicCredential, DisableReason, OpenAiCredential};
use keyproxy_core::CredentialMeta;
use keyproxy_core::service::Service;

fn meta() -> CredentialMeta {
    CredentialMeta::new(Service::Deepseek, "sk-probe", "")
}

/// Property 1: `isRevoked ⇒ isDisabled`, for every way a credential can reach
/// revoked state.
#[test]
fn revoked_always_implies_disabled() {
    let mut m = meta();
    m.disable(DisableReason::Revoked);
    assert!(m.is_revoked);
    assert!(m.is_disabled);
}

/// Property 2: `rateLimitedUntil >= rateLimitedAt` for any sequence of
/// `mark_rate_limited`/`apply_reuse_throttle` calls.
#[test]
fn rate_limited_until_never_precedes_rate_limited_at() {
    let mut m = meta();
    let t0 = time::OffsetDateTime::now_utc();
    m.mark_rate_limited(t0, Duration::from_secs(5));
    assert!(m.rate_limited_until.unwrap() >= m.rate_limited_at.unwrap());

    m.apply_reuse_throttle(t0 + Duration::from_secs(1), Duration::from_millis(200));
    assert!(m.rate_limited_until.unwrap() >= m.rate_limited_at.unwrap());
}

/// Round-trip: `recheck(); recheck()` converges to the same observable state
/// as a single `recheck()`.
#[test]
fn double_recheck_converges_to_single_recheck() {
    let mut once = meta();
    once.disable(DisableReason::Quota);
    once.recheck();

    let mut twice = meta();
    twice.disable(DisableReason::Quota);
    twice.recheck();
    twice.recheck();

    assert_eq!(once.is_disabled, twice.is_disabled);
    assert_eq!(once.is_over_quota, twice.is_over_quota);
    assert_eq!(once.last_checked, twice.last_checked);
}

/// Round-trip: revocation is sticky across a later quota-disable call.
#[test]
fn revoked_then_over_quota_stays_revoked() {
    let mut m = meta();
    m.disable(DisableReason::Revoked);
    m.disable(DisableReason::Quota);
    assert!(m.is_revoked);
    assert!(m.is_over_quota);
}

/// Property 6: `incrementUsage` is additive regardless of call order.
#[test]
fn usage_accumulation_is_order_independent() {
    let triples = [("gpt4o", 10u64, 2u64), ("gpt4o", 3, 1), ("o3", 7, 0)];

    let mut forward = meta();
    for (family, input, output) in triples {
        forward.increment_usage(family, input, output);
    }

    let mut reversed = meta();
    for (family, input, output) in triples.iter().rev() {
        reversed.increment_usage(family, *input, *output);
    }

    assert_eq!(forward.token_usage.get("gpt4o"), reversed.token_usage.get("gpt4o"));
    assert_eq!(forward.token_usage.get("o3"), reversed.token_usage.get("o3"));
    assert_eq!(forward.prompt_count, reversed.prompt_count);
}

/// End-to-end scenario 6: multi-org OpenAI clones are hash-distinct and
/// independently disablable.
#[test]
fn openai_org_clone_is_independent_of_parent() {
    let mut parent = OpenAiCredential::new("sk-shared", Some("org_a".to_string()));
    let clone = parent.clone_for_org("org_b");

    assert_ne!(parent.meta.hash, clone.meta.hash);
    assert!(clone.meta.last_checked.is_none());
    assert_eq!(clone.api_key, parent.api_key);

    parent.meta.disable(DisableReason::Revoked);
    assert!(!clone.meta.is_disabled, "disabling the parent must not affect the clone");
}

/// Anthropic tier mapping used by the checker after reading
/// `anthropic-ratelimit-requests-limit` (end-to-end scenario 2).
#[test]
fn anthropic_tier_maps_from_requests_limit_header() {
    use keyproxy_core::credential::AnthropicTier;

    assert_eq!(AnthropicTier::from_requests_limit(50), AnthropicTier::Build1);
    let mut cred = AnthropicCredential::new("sk-ant");
    cred.tier = AnthropicTier::from_requests_limit(50);
    assert_eq!(cred.tier, AnthropicTier::Build1);
}
