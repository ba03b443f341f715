use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use keyproxy_checker::{HealthProbe, ProbeClass, ProbeOutcome};
use keyproxy_core::credential::{AwsBedrockCredential, CredentialKind, DisableReason};
use keyproxy_core::errors::ProviderResult;
use keyproxy_core::events::EventHub;
use keyproxy_core::provider::{CredentialProvider, SelectRequest};
use keyproxy_core::service::Service;

use crate::family::generic_family_of;
use crate::store::{GenericCredentialStore, StoreConfig};

const DEFAULT_LOCKOUT: Duration = Duration::from_secs(2);
const REUSE_DELAY: Duration = Duration::from_millis(500);

type HmacSha256 = Hmac<Sha256>;

fn to_kind(c: &AwsBedrockCredential) -> CredentialKind {
    CredentialKind::AwsBedrock(c.clone())
}

pub struct AwsBedrockProvider {
    store: GenericCredentialStore<AwsBedrockCredential>,
}

impl AwsBedrockProvider {
    pub fn new(events: EventHub, credentials: Vec<AwsBedrockCredential>) -> Self {
        let config = StoreConfig {
            service: Service::AwsBedrock,
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

    fn store_ref(&self) -> &GenericCredentialStore<AwsBedrockCredential> {
        &self.store
    }

    pub fn spawn_checker(
        self: std::sync::Arc<Self>,
        probe: AwsBedrockHealthProbe,
        config: keyproxy_checker::SchedulerConfig,
        max_server_error_retries: u32,
    ) -> tokio::task::JoinHandle<()> {
        crate::cycle::spawn_checker(self, Self::store_ref, |c| &mut c.meta, probe, config, max_server_error_retries)
    }
}

#[async_trait]
impl CredentialProvider for AwsBedrockProvider {
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

fn hmac_sha256(key: &[u8], msg: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(msg.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Minimal SigV4 signer for the `bedrock:ListFoundationModels` GET call —
/// just enough to authenticate the health probe, not a general-purpose
/// request signer.
struct SigV4Request {
    url: String,
    authorization: String,
    amz_date: String,
}

fn sign_list_foundation_models(credential: &AwsBedrockCredential, now: time::OffsetDateTime) -> SigV4Request {
    let region = &credential.region;
    let host = format!("bedrock.{region}.amazonaws.com");
    let path = "/foundation-models";
    let format = time::format_description::parse("[year][month][day]T[hour][minute][second]Z")
        .expect("static format description");
    let amz_date = now.format(&format).expect("offset datetime always formats");
    let date_stamp = amz_date[0..8].to_string();

    let canonical_headers = format!("host:{host}\nx-amz-date:{amz_date}\n");
    let signed_headers = "host;x-amz-date";
    let payload_hash = sha256_hex("");
    let canonical_request =
        format!("GET\n{path}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}");

    let credential_scope = format!("{date_stamp}/{region}/bedrock/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        sha256_hex(&canonical_request)
    );

    let k_date = hmac_sha256(format!("AWS4{}", credential.secret_access_key).as_bytes(), &date_stamp);
    let k_region = hmac_sha256(&k_date, region);
    let k_service = hmac_sha256(&k_region, "bedrock");
    let k_signing = hmac_sha256(&k_service, "aws4_request");
    let mut mac = HmacSha256::new_from_slice(&k_signing).expect("hmac accepts any key length");
    mac.update(string_to_sign.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credential.access_key_id
    );

    SigV4Request {
        url: format!("https://{host}{path}"),
        authorization,
        amz_date,
    }
}

pub struct AwsBedrockHealthProbe {
    client: reqwest::Client,
}

impl AwsBedrockHealthProbe {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthProbe<AwsBedrockCredential> for AwsBedrockHealthProbe {
    async fn probe(&self, credential: &AwsBedrockCredential) -> ProbeOutcome<AwsBedrockCredential> {
        let signed = sign_list_foundation_models(credential, time::OffsetDateTime::now_utc());
        let resp = self
            .client
            .get(&signed.url)
            .header("x-amz-date", signed.amz_date)
            .header("Authorization", signed.authorization)
            .send()
            .await;

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
        if !status.is_success() {
            return ProbeOutcome::new(ProbeClass::ServerError);
        }

        let body: serde_json::Value = match resp.json().await {
            Ok(v) => v,
            Err(_) => return ProbeOutcome::new(ProbeClass::ServerError),
        };
        let mut ids = std::collections::HashSet::new();
        let mut families = std::collections::HashSet::new();
        if let Some(summaries) = body.get("modelSummaries").and_then(|v| v.as_array()) {
            for entry in summaries {
                if let Some(id) = entry.get("modelId").and_then(|v| v.as_str()) {
                    families.insert(generic_family_of(id));
                    ids.insert(id.to_string());
                }
            }
        }

        ProbeOutcome::with_apply(ProbeClass::Success, move |c: &mut AwsBedrockCredential| {
            c.meta.model_ids = ids;
            c.meta.model_families = families;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_changes_with_the_clock() {
        let cred = AwsBedrockCredential::new("AKIA_TEST", "secret", "us-east-1");
        let t0 = time::OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let t1 = t0 + time::Duration::hours(2);
        let s0 = sign_list_foundation_models(&cred, t0);
        let s1 = sign_list_foundation_models(&cred, t1);
        assert_ne!(s0.authorization, s1.authorization);
        assert!(s0.authorization.contains("AKIA_TEST"));
    }

    #[tokio::test]
    async fn available_counts_only_enabled_credentials() {
        let mut cred = AwsBedrockCredential::new("AKIA_TEST", "secret", "us-east-1");
        cred.meta.model_ids.insert("anthropic.claude-3-sonnet".to_string());
        let provider = AwsBedrockProvider::new(EventHub::new(8), vec![cred]);
        assert_eq!(provider.available().await, 1);
    }
}
