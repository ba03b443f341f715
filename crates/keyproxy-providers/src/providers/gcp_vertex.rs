use std::time::Duration;

use async_trait::async_trait;

use keyproxy_checker::{HealthProbe, ProbeClass, ProbeOutcome};
use keyproxy_core::credential::{CredentialKind, DisableReason, GcpVertexCredential};
use keyproxy_core::errors::ProviderResult;
use keyproxy_core::events::EventHub;
use keyproxy_core::provider::{CredentialProvider, SelectRequest};
use keyproxy_core::service::Service;

use crate::family::generic_family_of;
use crate::store::{GenericCredentialStore, StoreConfig};

const DEFAULT_LOCKOUT: Duration = Duration::from_secs(2);
const REUSE_DELAY: Duration = Duration::from_millis(500);
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

fn to_kind(c: &GcpVertexCredential) -> CredentialKind {
    CredentialKind::GcpVertex(c.clone())
}

pub struct GcpVertexProvider {
    store: GenericCredentialStore<GcpVertexCredential>,
}

impl GcpVertexProvider {
    pub fn new(events: EventHub, credentials: Vec<GcpVertexCredential>) -> Self {
        let config = StoreConfig {
            service: Service::GcpVertex,
            check_keys: true,
            reuse_delay: REUSE_DELAY,
            default_lockout: DEFAULT_LOCKOUT,
            meta: |c| &c.meta,
            meta_mut: |c| &mut c.meta,
            is_trial: |_| false,
            family_of: generic_family_of,
            extra_filter: |_, _| true,
            to_kind,
        };
        Self {
            store: GenericCredentialStore::new(config, events, credentials),
        }
    }

    pub async fn checker_snapshot(&self) -> Vec<(String, Option<time::OffsetDateTime>)> {
        self.store.checker_snapshot().await
    }

    fn store_ref(&self) -> &GenericCredentialStore<GcpVertexCredential> {
        &self.store
    }

    pub fn spawn_checker(
        self: std::sync::Arc<Self>,
        probe: GcpVertexHealthProbe,
        config: keyproxy_checker::SchedulerConfig,
        max_server_error_retries: u32,
    ) -> tokio::task::JoinHandle<()> {
        crate::cycle::spawn_checker(self, Self::store_ref, |c| &mut c.meta, probe, config, max_server_error_retries)
    }
}

#[async_trait]
impl CredentialProvider for GcpVertexProvider {
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

/// Builds the minimal service-account JSON key document `gcp_auth` expects,
/// from the fields we actually store on [`GcpVertexCredential`].
fn service_account_json(credential: &GcpVertexCredential) -> serde_json::Value {
    serde_json::json!({
        "type": "service_account",
        "project_id": credential.project_id,
        "client_email": credential.client_email,
        "private_key": credential.private_key,
        "token_uri": "https://oauth2.googleapis.com/token",
    })
}

pub struct GcpVertexHealthProbe {
    client: reqwest::Client,
}

impl GcpVertexHealthProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_access_token(&self, credential: &GcpVertexCredential) -> Result<String, ProbeClass> {
        let json = service_account_json(credential).to_string();
        let account =
            gcp_auth::CustomServiceAccount::from_json(&json).map_err(|_| ProbeClass::InvalidKey)?;
        let token = account
            .token(&[CLOUD_PLATFORM_SCOPE])
            .await
            .map_err(|_| ProbeClass::InvalidKey)?;
        Ok(token.as_str().to_string())
    }
}

#[async_trait]
impl HealthProbe<GcpVertexCredential> for GcpVertexHealthProbe {
    async fn probe(&self, credential: &GcpVertexCredential) -> ProbeOutcome<GcpVertexCredential> {
        let token = match self.fetch_access_token(credential).await {
            Ok(t) => t,
            Err(class) => return ProbeOutcome::new(class),
        };

        let url = format!(
            "https://{}-aiplatform.googleapis.com/v1/projects/{}/locations/{}/publishers/google/models",
            credential.location, credential.project_id, credential.location
        );
        let resp = self.client.get(url).bearer_auth(token).send().await;
        let Ok(resp) = resp else {
            return ProbeOutcome::new(ProbeClass::ServerError);
        };
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return ProbeOutcome::new(ProbeClass::InvalidKey);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return ProbeOutcome::new(ProbeClass::RateLimited);
        }
        if status.is_server_error() {
            return ProbeOutcome::new(ProbeClass::ServerError);
        }

        ProbeOutcome::with_apply(ProbeClass::Success, move |c: &mut GcpVertexCredential| {
            c.meta.model_families.insert("gemini-2.5-pro".to_string());
            c.meta.model_families.insert("gemini-2.5-flash".to_string());
        })
    }
}
