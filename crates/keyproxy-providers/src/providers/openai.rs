use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

use keyproxy_checker::{HealthProbe, ProbeClass, ProbeOutcome};
use keyproxy_core::credential::{CredentialKind, CredentialMeta, DisableReason, OpenAiCredential};
use keyproxy_core::errors::ProviderResult;
use keyproxy_core::events::EventHub;
use keyproxy_core::headers::{Headers, header_get};
use keyproxy_core::provider::{CredentialProvider, SelectRequest};
use keyproxy_core::service::Service;

use crate::family::openai_family_of;
use crate::rate_limit_header::parse_reset_duration;
use crate::store::{GenericCredentialStore, StoreConfig};

const DEFAULT_LOCKOUT: Duration = Duration::from_secs(2);
const REUSE_DELAY: Duration = Duration::from_millis(1000);

fn gpt_image_gate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(gpt-image|gpt-5|o1|o3|o4-mini)").expect("static regex"))
}

/// spec.md §4.1: `gpt-image-*`, and GPT-5/o1/o3/o4-mini *while streaming*,
/// require a verified organization.
fn extra_filter(c: &OpenAiCredential, req: &SelectRequest) -> bool {
    let model = req.model.to_ascii_lowercase();
    let gated = if model.starts_with("gpt-image") {
        true
    } else {
        gpt_image_gate_re().is_match(&model) && req.streaming
    };
    !gated || c.organization_verified
}

fn is_trial(c: &OpenAiCredential) -> bool {
    c.is_trial
}

fn to_kind(c: &OpenAiCredential) -> CredentialKind {
    CredentialKind::OpenAI(c.clone())
}

pub struct OpenAiProvider {
    store: GenericCredentialStore<OpenAiCredential>,
}

impl OpenAiProvider {
    pub fn new(events: EventHub, credentials: Vec<OpenAiCredential>) -> Self {
        let config = StoreConfig {
            service: Service::OpenAI,
            check_keys: true,
            reuse_delay: REUSE_DELAY,
            default_lockout: DEFAULT_LOCKOUT,
            meta: |c| &c.meta,
            meta_mut: |c| &mut c.meta,
            is_trial,
            family_of: openai_family_of,
            extra_filter,
            to_kind,
        };
        Self {
            store: GenericCredentialStore::new(config, events, credentials),
        }
    }

    /// spec.md §4.1 `updateRateLimits(hash, headers)` — OpenAI-specific.
    pub async fn update_rate_limits(&self, hash: &str, headers: &Headers) {
        let now = time::OffsetDateTime::now_utc();
        let reset = header_get(headers, "x-ratelimit-reset-requests")
            .and_then(parse_reset_duration)
            .into_iter()
            .chain(
                header_get(headers, "x-ratelimit-reset-tokens")
                    .and_then(parse_reset_duration),
            )
            .max();
        if let Some(reset) = reset {
            self.store.set_rate_limited_until(hash, now + reset).await;
        }
    }

    /// Register a newly discovered organization clone (spec.md §9, end-to-
    /// end scenario 6). The clone is inserted with its own independent
    /// `CredentialMeta`; disabling the parent never touches it.
    pub async fn register_org_clone(&self, parent_hash: &str, organization_id: &str) {
        let parent = self
            .store
            .list()
            .await
            .into_iter()
            .find_map(|c| match c {
                CredentialKind::OpenAI(o) if o.meta.hash == parent_hash => Some(o),
                _ => None,
            });
        if let Some(parent) = parent {
            self.store.insert(parent.clone_for_org(organization_id)).await;
        }
    }

    pub async fn checker_snapshot(&self) -> Vec<(String, Option<time::OffsetDateTime>)> {
        self.store.checker_snapshot().await
    }

    fn store_ref(&self) -> &GenericCredentialStore<OpenAiCredential> {
        &self.store
    }

    /// Spawns this provider's continuous per-credential checker (spec.md
    /// §4.2).
    pub fn spawn_checker(
        self: std::sync::Arc<Self>,
        probe: OpenAiHealthProbe,
        config: keyproxy_checker::SchedulerConfig,
        max_server_error_retries: u32,
    ) -> tokio::task::JoinHandle<()> {
        crate::cycle::spawn_checker(self, Self::store_ref, |c| &mut c.meta, probe, config, max_server_error_retries)
    }
}

#[async_trait]
impl CredentialProvider for OpenAiProvider {
    async fn select(&self, req: &SelectRequest) -> ProviderResult<CredentialKind> {
        self.store.select(req).await
    }

    async fn update_last_checked(&self, hash: &str) {
        self.store.update_last_checked(hash).await;
    }

    async fn disable(&self, hash: &str, reason: DisableReason) {
        self.store.disable(hash, reason).await;
    }

    async fn increment_usage(&self, hash: &str, family: &str, input: u64, output: u64) {
        self.store.increment_usage(hash, family, input, output).await;
    }

    async fn mark_rate_limited(&self, hash: &str) {
        self.store.mark_rate_limited(hash).await;
    }

    async fn get_lockout_period(&self, family: &str) -> Duration {
        self.store.get_lockout_period(family).await
    }

    async fn recheck(&self) {
        self.store.recheck().await;
    }

    async fn available(&self) -> usize {
        self.store.available().await
    }

    async fn list(&self) -> Vec<CredentialKind> {
        self.store.list().await
    }
}

/// spec.md §4.2: list models, derive capabilities, probe `o3` streaming for
/// `organizationVerified`.
pub struct OpenAiHealthProbe {
    client: reqwest::Client,
}

impl OpenAiHealthProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn list_models(&self, api_key: &str) -> Result<(HashSet<String>, HashSet<String>), ProbeClass> {
        let resp = self
            .client
            .get("https://api.openai.com/v1/models")
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|_| ProbeClass::ServerError)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProbeClass::InvalidKey);
        }
        if status == reqwest::StatusCode::PAYMENT_REQUIRED {
            return Err(ProbeClass::BillingBlocked);
        }
        if status.is_server_error() {
            return Err(ProbeClass::ServerError);
        }

        let body: serde_json::Value = resp.json().await.map_err(|_| ProbeClass::ServerError)?;
        let mut ids = HashSet::new();
        let mut families = HashSet::new();
        if let Some(data) = body.get("data").and_then(|d| d.as_array()) {
            for entry in data {
                if let Some(id) = entry.get("id").and_then(|v| v.as_str()) {
                    ids.insert(id.to_string());
                    families.insert(openai_family_of(id));
                }
            }
        }
        Ok((ids, families))
    }

    /// Streams a trivial completion from `o3`; a successful stream implies
    /// the organization has passed OpenAI's identity verification gate.
    async fn probe_organization_verified(&self, api_key: &str) -> bool {
        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "model": "o3",
                "stream": true,
                "messages": [{"role": "user", "content": "hi"}],
                "max_completion_tokens": 1,
            }))
            .send()
            .await;
        matches!(resp, Ok(r) if r.status().is_success())
    }
}

#[async_trait]
impl HealthProbe<OpenAiCredential> for OpenAiHealthProbe {
    async fn probe(&self, credential: &OpenAiCredential) -> ProbeOutcome<OpenAiCredential> {
        match self.list_models(&credential.api_key).await {
            Err(class) => ProbeOutcome::new(class),
            Ok((ids, families)) => {
                let verified = self.probe_organization_verified(&credential.api_key).await;
                ProbeOutcome::with_apply(ProbeClass::Success, move |c: &mut OpenAiCredential| {
                    c.meta.model_ids = ids;
                    c.meta.model_families = families;
                    c.organization_verified = verified;
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(trial: bool, verified: bool, families: &[&str]) -> OpenAiCredential {
        let mut c = OpenAiCredential::new("sk-test", None);
        c.is_trial = trial;
        c.organization_verified = verified;
        c.meta.model_families = families.iter().map(|s| s.to_string()).collect();
        c.meta.model_ids.insert("gpt-4o".to_string());
        c.meta.model_ids.insert("gpt-image-1".to_string());
        c
    }

    #[tokio::test]
    async fn end_to_end_scenario_1_trial_then_verification_gate() {
        let events = EventHub::new(16);
        let a = credential(true, false, &["gpt4o"]);
        let mut b = credential(false, false, &["gpt4o", "gpt-image"]);
        b.meta.model_ids.insert("gpt-image-1".to_string());
        let provider = OpenAiProvider::new(events, vec![a, b]);

        let picked = provider.select(&SelectRequest::new("gpt-4o")).await.unwrap();
        match picked {
            CredentialKind::OpenAI(c) => assert!(c.is_trial),
            _ => panic!("wrong variant"),
        }

        let denied = provider.select(&SelectRequest::new("gpt-image-1")).await;
        assert!(denied.is_err(), "unverified org must not get gpt-image access");

        let paid_hash = provider
            .list()
            .await
            .into_iter()
            .find_map(|k| match k {
                CredentialKind::OpenAI(c) if !c.is_trial => Some(c.meta.hash),
                _ => None,
            })
            .unwrap();
        provider
            .store
            .mutate(&paid_hash, |c| c.organization_verified = true)
            .await;

        let allowed = provider.select(&SelectRequest::new("gpt-image-1")).await;
        assert!(allowed.is_ok(), "verified org should be granted gpt-image access");
    }

    #[test]
    fn extra_filter_blocks_streaming_o3_without_verification() {
        let unverified = credential(false, false, &["o3"]);
        let req = SelectRequest::new("o3-mini").streaming(true);
        assert!(!extra_filter(&unverified, &req));

        let verified = credential(false, true, &["o3"]);
        assert!(extra_filter(&verified, &req));
    }

    #[test]
    fn extra_filter_allows_non_streaming_o3_without_verification() {
        let unverified = credential(false, false, &["o3"]);
        let req = SelectRequest::new("o3-mini").streaming(false);
        assert!(extra_filter(&unverified, &req));
    }
}
