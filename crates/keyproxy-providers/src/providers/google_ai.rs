use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use keyproxy_checker::{HealthProbe, ProbeClass, ProbeOutcome};
use keyproxy_core::credential::{CredentialKind, DisableReason, GoogleAiCredential};
use keyproxy_core::errors::ProviderResult;
use keyproxy_core::events::EventHub;
use keyproxy_core::provider::{CredentialProvider, SelectRequest};
use keyproxy_core::service::Service;

use crate::family::google_family_of;
use crate::store::{GenericCredentialStore, StoreConfig};

const DEFAULT_LOCKOUT: Duration = Duration::from_secs(2);
const REUSE_DELAY: Duration = Duration::from_millis(500);

/// spec.md §4.1: preview models (id contains `-preview1`) require
/// `billingEnabled == true`.
fn extra_filter(c: &GoogleAiCredential, req: &SelectRequest) -> bool {
    if req.model.contains("-preview1") {
        c.billing_enabled
    } else {
        true
    }
}

fn to_kind(c: &GoogleAiCredential) -> CredentialKind {
    CredentialKind::GoogleAI(c.clone())
}

pub struct GoogleAiProvider {
    store: GenericCredentialStore<GoogleAiCredential>,
}

impl GoogleAiProvider {
    pub fn new(events: EventHub, credentials: Vec<GoogleAiCredential>) -> Self {
        let config = StoreConfig {
            service: Service::GoogleAI,
            check_keys: true,
            reuse_delay: REUSE_DELAY,
            default_lockout: DEFAULT_LOCKOUT,
            meta: |c| &c.meta,
            meta_mut: |c| &mut c.meta,
            is_trial: |_| false,
            family_of: google_family_of,
            extra_filter,
            to_kind,
        };
        Self {
            store: GenericCredentialStore::new(config, events, credentials),
        }
    }

    pub async fn checker_snapshot(&self) -> Vec<(String, Option<time::OffsetDateTime>)> {
        self.store.checker_snapshot().await
    }

    fn store_ref(&self) -> &GenericCredentialStore<GoogleAiCredential> {
        &self.store
    }

    pub fn spawn_checker(
        self: std::sync::Arc<Self>,
        probe: GoogleAiHealthProbe,
        config: keyproxy_checker::SchedulerConfig,
        max_server_error_retries: u32,
    ) -> tokio::task::JoinHandle<()> {
        crate::cycle::spawn_checker(self, Self::store_ref, |c| &mut c.meta, probe, config, max_server_error_retries)
    }
}

#[async_trait]
impl CredentialProvider for GoogleAiProvider {
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

pub struct GoogleAiHealthProbe {
    client: reqwest::Client,
}

impl GoogleAiHealthProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn list_models(&self, api_key: &str) -> Result<(HashSet<String>, HashSet<String>), ProbeClass> {
        let url = format!("https://generativelanguage.googleapis.com/v1beta/models?key={api_key}");
        let resp = self.client.get(url).send().await.map_err(|_| ProbeClass::ServerError)?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProbeClass::InvalidKey);
        }
        if status.is_server_error() {
            return Err(ProbeClass::ServerError);
        }
        let body: serde_json::Value = resp.json().await.map_err(|_| ProbeClass::ServerError)?;
        let mut ids = HashSet::new();
        let mut families = HashSet::new();
        if let Some(models) = body.get("models").and_then(|m| m.as_array()) {
            for entry in models {
                if let Some(name) = entry.get("name").and_then(|v| v.as_str()) {
                    let id = name.trim_start_matches("models/").to_string();
                    families.insert(google_family_of(&id));
                    ids.insert(id);
                }
            }
        }
        Ok((ids, families))
    }

    async fn confirm_pro_tier(&self, api_key: &str) -> bool {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent?key={api_key}"
        );
        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({"contents":[{"parts":[{"text":"ping"}]}]}))
            .send()
            .await;
        matches!(resp, Ok(r) if r.status().is_success())
    }

    /// spec.md §4.2: a 400 specifically saying "Imagen API is only
    /// accessible to billed users" means billing is off; any other 400
    /// implies billing is configured (the credential just lacks some other
    /// prerequisite).
    async fn infer_billing(&self, api_key: &str) -> bool {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/imagen-3.0-generate-002:predict?key={api_key}"
        );
        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({"instances":[{"prompt":"a test image"}]}))
            .send()
            .await;
        let Ok(resp) = resp else { return true };
        if resp.status() != reqwest::StatusCode::BAD_REQUEST {
            return true;
        }
        let body = resp.text().await.unwrap_or_default();
        !body.contains("Imagen API is only accessible to billed users")
    }
}

#[async_trait]
impl HealthProbe<GoogleAiCredential> for GoogleAiHealthProbe {
    async fn probe(&self, credential: &GoogleAiCredential) -> ProbeOutcome<GoogleAiCredential> {
        let (mut ids, mut families) = match self.list_models(&credential.api_key).await {
            Err(class) => return ProbeOutcome::new(class),
            Ok(pair) => pair,
        };

        let pro_confirmed = self.confirm_pro_tier(&credential.api_key).await;
        if !pro_confirmed {
            families.remove("gemini-pro");
            ids.retain(|id| !id.contains("gemini-pro"));
        }
        let billing_enabled = self.infer_billing(&credential.api_key).await;

        ProbeOutcome::with_apply(ProbeClass::Success, move |c: &mut GoogleAiCredential| {
            c.meta.model_ids = ids;
            c.meta.model_families = families;
            c.billing_enabled = billing_enabled;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(billing: bool, families: &[&str], ids: &[&str]) -> GoogleAiCredential {
        let mut c = GoogleAiCredential::new("ai-test-key");
        c.billing_enabled = billing;
        c.meta.model_families = families.iter().map(|s| s.to_string()).collect();
        c.meta.model_ids = ids.iter().map(|s| s.to_string()).collect();
        c
    }

    #[tokio::test]
    async fn preview_model_requires_billing_enabled() {
        let unbilled = credential(false, &["gemini-2.5-flash-preview1"], &["gemini-2.5-flash-preview1"]);
        let provider = GoogleAiProvider::new(EventHub::new(8), vec![unbilled]);

        let denied = provider.select(&SelectRequest::new("gemini-2.5-flash-preview1")).await;
        assert!(denied.is_err());
    }

    #[tokio::test]
    async fn non_preview_model_ignores_billing_flag() {
        let unbilled = credential(false, &["gemini-2.5-flash"], &["gemini-2.5-flash"]);
        let provider = GoogleAiProvider::new(EventHub::new(8), vec![unbilled]);

        let allowed = provider.select(&SelectRequest::new("gemini-2.5-flash")).await;
        assert!(allowed.is_ok());
    }
}
