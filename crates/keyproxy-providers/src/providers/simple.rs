use std::time::Duration;

use async_trait::async_trait;

use keyproxy_checker::{HealthProbe, ProbeClass, ProbeOutcome};
use keyproxy_core::credential::{ApiKeyCredential, CredentialKind, DisableReason};
use keyproxy_core::errors::ProviderResult;
use keyproxy_core::events::EventHub;
use keyproxy_core::provider::{CredentialProvider, SelectRequest};
use keyproxy_core::service::Service;

use crate::family::generic_family_of;
use crate::store::{GenericCredentialStore, StoreConfig};

/// Shared body for the ten providers spec.md §4.2 groups as "minimal
/// chat-completion or balance probe": Azure OpenAI, Mistral, Deepseek, xAI,
/// Cohere, Qwen, GLM, Moonshot, Groq, OpenRouter. None of them has a
/// provider-specific `select` filter or trial concept, so one engine serves
/// all of them, parameterized only by `service` and a probe request builder.
pub struct SimpleApiKeyProvider {
    service: Service,
    store: GenericCredentialStore<ApiKeyCredential>,
}

fn to_kind_for(service: Service) -> fn(&ApiKeyCredential) -> CredentialKind {
    match service {
        Service::AzureOpenAI => |c| CredentialKind::AzureOpenAI(c.clone()),
        Service::Mistral => |c| CredentialKind::Mistral(c.clone()),
        Service::Deepseek => |c| CredentialKind::Deepseek(c.clone()),
        Service::XAI => |c| CredentialKind::XAI(c.clone()),
        Service::Cohere => |c| CredentialKind::Cohere(c.clone()),
        Service::Qwen => |c| CredentialKind::Qwen(c.clone()),
        Service::Glm => |c| CredentialKind::Glm(c.clone()),
        Service::Moonshot => |c| CredentialKind::Moonshot(c.clone()),
        Service::Groq => |c| CredentialKind::Groq(c.clone()),
        Service::OpenRouter => |c| CredentialKind::OpenRouter(c.clone()),
        other => panic!("{other} is not a simple API-key provider"),
    }
}

impl SimpleApiKeyProvider {
    pub fn new(service: Service, events: EventHub, credentials: Vec<ApiKeyCredential>) -> Self {
        let config = StoreConfig {
            service,
            check_keys: false,
            reuse_delay: Duration::from_millis(500),
            default_lockout: Duration::from_secs(2),
            meta: |c| &c.meta,
            meta_mut: |c| &mut c.meta,
            is_trial: |_| false,
            family_of: generic_family_of,
            extra_filter: |_, _| true,
            to_kind: to_kind_for(service),
        };
        Self {
            service,
            store: GenericCredentialStore::new(config, events, credentials),
        }
    }

    pub async fn checker_snapshot(&self) -> Vec<(String, Option<time::OffsetDateTime>)> {
        self.store.checker_snapshot().await
    }

    pub fn service(&self) -> Service {
        self.service
    }

    fn store_ref(&self) -> &GenericCredentialStore<ApiKeyCredential> {
        &self.store
    }

    pub fn spawn_checker(
        self: std::sync::Arc<Self>,
        probe: SimpleHealthProbe,
        config: keyproxy_checker::SchedulerConfig,
        max_server_error_retries: u32,
    ) -> tokio::task::JoinHandle<()> {
        crate::cycle::spawn_checker(self, Self::store_ref, |c| &mut c.meta, probe, config, max_server_error_retries)
    }
}

#[async_trait]
impl CredentialProvider for SimpleApiKeyProvider {
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

/// Builds the provider-specific GET request for the minimal liveness probe.
/// A plain function pointer (no captured state) so one [`SimpleHealthProbe`]
/// type serves every one of the ten providers.
pub type ProbeRequestBuilder = fn(&reqwest::Client, &str) -> reqwest::RequestBuilder;

pub fn models_endpoint_probe(url: &'static str) -> ProbeRequestBuilder {
    move |client: &reqwest::Client, api_key: &str| client.get(url).bearer_auth(api_key)
}

pub fn azure_probe_builder(client: &reqwest::Client, api_key: &str) -> reqwest::RequestBuilder {
    client
        .get("https://management.azure.com/providers/Microsoft.CognitiveServices?api-version=2021-04-30")
        .header("api-key", api_key)
}

pub fn mistral_probe_builder(client: &reqwest::Client, api_key: &str) -> reqwest::RequestBuilder {
    client.get("https://api.mistral.ai/v1/models").bearer_auth(api_key)
}

pub fn deepseek_probe_builder(client: &reqwest::Client, api_key: &str) -> reqwest::RequestBuilder {
    client.get("https://api.deepseek.com/user/balance").bearer_auth(api_key)
}

pub fn xai_probe_builder(client: &reqwest::Client, api_key: &str) -> reqwest::RequestBuilder {
    client.get("https://api.x.ai/v1/models").bearer_auth(api_key)
}

pub fn cohere_probe_builder(client: &reqwest::Client, api_key: &str) -> reqwest::RequestBuilder {
    client.get("https://api.cohere.com/v1/models").bearer_auth(api_key)
}

pub fn qwen_probe_builder(client: &reqwest::Client, api_key: &str) -> reqwest::RequestBuilder {
    client
        .get("https://dashscope.aliyuncs.com/compatible-mode/v1/models")
        .bearer_auth(api_key)
}

pub fn glm_probe_builder(client: &reqwest::Client, api_key: &str) -> reqwest::RequestBuilder {
    client.get("https://open.bigmodel.cn/api/paas/v4/models").bearer_auth(api_key)
}

pub fn moonshot_probe_builder(client: &reqwest::Client, api_key: &str) -> reqwest::RequestBuilder {
    client.get("https://api.moonshot.cn/v1/users/me/balance").bearer_auth(api_key)
}

pub fn groq_probe_builder(client: &reqwest::Client, api_key: &str) -> reqwest::RequestBuilder {
    client.get("https://api.groq.com/openai/v1/models").bearer_auth(api_key)
}

pub fn openrouter_probe_builder(client: &reqwest::Client, api_key: &str) -> reqwest::RequestBuilder {
    client.get("https://openrouter.ai/api/v1/credits").bearer_auth(api_key)
}

/// Model families a successful probe makes selectable, since most of these
/// ten endpoints (balance checks, provider registration) don't return a
/// model catalog to harvest the way `openai.rs`/`aws_bedrock.rs` do. Mirrors
/// `gcp_vertex.rs`'s hardcoded-families pattern, one list per service.
pub const AZURE_OPENAI_MODEL_FAMILIES: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-35-turbo"];
pub const MISTRAL_MODEL_FAMILIES: &[&str] = &["mistral-large-latest", "mistral-small-latest", "codestral-latest"];
pub const DEEPSEEK_MODEL_FAMILIES: &[&str] = &["deepseek-chat", "deepseek-reasoner"];
pub const XAI_MODEL_FAMILIES: &[&str] = &["grok-4", "grok-3", "grok-3-mini"];
pub const COHERE_MODEL_FAMILIES: &[&str] = &["command-r-plus", "command-r"];
pub const QWEN_MODEL_FAMILIES: &[&str] = &["qwen-max", "qwen-plus", "qwen-turbo"];
pub const GLM_MODEL_FAMILIES: &[&str] = &["glm-4.6", "glm-4.5", "glm-4.5-air"];
pub const MOONSHOT_MODEL_FAMILIES: &[&str] = &["moonshot-v1", "kimi-k2"];
pub const GROQ_MODEL_FAMILIES: &[&str] = &["llama-3.3-70b-versatile", "llama-3.1-8b-instant"];
pub const OPENROUTER_MODEL_FAMILIES: &[&str] = &["openrouter/auto"];

pub struct SimpleHealthProbe {
    client: reqwest::Client,
    build_request: ProbeRequestBuilder,
    known_families: &'static [&'static str],
}

impl SimpleHealthProbe {
    pub fn new(client: reqwest::Client, build_request: ProbeRequestBuilder, known_families: &'static [&'static str]) -> Self {
        Self {
            client,
            build_request,
            known_families,
        }
    }
}

/// Writes `known` into `model_families` on a successful probe. Factored out
/// so tests can exercise the exact mutation `probe` applies without a
/// network round-trip.
fn apply_known_families(known: &'static [&'static str]) -> impl FnOnce(&mut ApiKeyCredential) + Send {
    move |c: &mut ApiKeyCredential| {
        for family in known {
            c.meta.model_families.insert(family.to_string());
        }
    }
}

#[async_trait]
impl HealthProbe<ApiKeyCredential> for SimpleHealthProbe {
    async fn probe(&self, credential: &ApiKeyCredential) -> ProbeOutcome<ApiKeyCredential> {
        let resp = (self.build_request)(&self.client, &credential.api_key).send().await;
        let Ok(resp) = resp else {
            tracing::warn!(service = %credential.meta.service, hash = %credential.meta.hash, "probe request failed");
            return ProbeOutcome::new(ProbeClass::ServerError);
        };
        let status = resp.status();
        let class = if status.is_success() {
            ProbeClass::Success
        } else if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            ProbeClass::InvalidKey
        } else if status == reqwest::StatusCode::PAYMENT_REQUIRED {
            ProbeClass::BillingBlocked
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ProbeClass::RateLimited
        } else {
            ProbeClass::ServerError
        };
        tracing::debug!(service = %credential.meta.service, hash = %credential.meta.hash, ?class, "probe completed");
        if class == ProbeClass::Success {
            ProbeOutcome::with_apply(class, apply_known_families(self.known_families))
        } else {
            ProbeOutcome::new(class)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn available_counts_only_enabled_credentials() {
        let a = ApiKeyCredential::new(Service::Deepseek, "sk-a");
        let mut b = ApiKeyCredential::new(Service::Deepseek, "sk-b");
        b.meta.disable(DisableReason::Revoked);

        let provider = SimpleApiKeyProvider::new(Service::Deepseek, EventHub::new(8), vec![a, b]);
        assert_eq!(provider.available().await, 1);
    }

    #[tokio::test]
    async fn lru_tie_break_picks_least_recently_used() {
        let mut recent = ApiKeyCredential::new(Service::Qwen, "sk-recent");
        recent.meta.model_families.insert("qwen-max".to_string());
        recent.meta.last_used = Some(time::OffsetDateTime::now_utc());

        let mut stale = ApiKeyCredential::new(Service::Qwen, "sk-stale");
        stale.meta.model_families.insert("qwen-max".to_string());

        let provider = SimpleApiKeyProvider::new(Service::Qwen, EventHub::new(8), vec![recent, stale]);
        let picked = provider.select(&SelectRequest::new("qwen-max")).await.unwrap();
        match picked {
            CredentialKind::Qwen(c) => assert_eq!(c.api_key, "sk-stale"),
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn a_successful_probe_makes_a_fresh_credential_selectable() {
        let mut fresh = ApiKeyCredential::new(Service::Deepseek, "sk-fresh");
        assert!(fresh.meta.model_families.is_empty());

        apply_known_families(DEEPSEEK_MODEL_FAMILIES)(&mut fresh);

        let provider = SimpleApiKeyProvider::new(Service::Deepseek, EventHub::new(8), vec![fresh]);
        let picked = provider.select(&SelectRequest::new("deepseek-chat")).await.unwrap();
        match picked {
            CredentialKind::Deepseek(c) => assert_eq!(c.api_key, "sk-fresh"),
            _ => panic!("wrong variant"),
        }
    }
}
