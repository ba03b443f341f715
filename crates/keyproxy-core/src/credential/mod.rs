mod meta;

pub use meta::{CredentialMeta, DisableReason, HealthState, TokenUsage};

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::service::Service;

/// A single API authentication artifact for one upstream provider.
///
/// Mirrors the teacher's tagged-enum-over-per-provider-struct shape
/// (`gproxy-provider-core::credential::Credential`), generalized to carry
/// the health/usage state from spec.md §3 in a `meta: CredentialMeta` field
/// embedded in every variant instead of tracked separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CredentialKind {
    OpenAI(OpenAiCredential),
    Anthropic(AnthropicCredential),
    GoogleAI(GoogleAiCredential),
    AwsBedrock(AwsBedrockCredential),
    GcpVertex(GcpVertexCredential),
    AzureOpenAI(ApiKeyCredential),
    Mistral(ApiKeyCredential),
    Deepseek(ApiKeyCredential),
    XAI(ApiKeyCredential),
    Cohere(ApiKeyCredential),
    Qwen(ApiKeyCredential),
    Glm(ApiKeyCredential),
    Moonshot(ApiKeyCredential),
    Groq(ApiKeyCredential),
    OpenRouter(ApiKeyCredential),
}

impl CredentialKind {
    pub fn meta(&self) -> &CredentialMeta {
        match self {
            CredentialKind::OpenAI(c) => &c.meta,
            CredentialKind::Anthropic(c) => &c.meta,
            CredentialKind::GoogleAI(c) => &c.meta,
            CredentialKind::AwsBedrock(c) => &c.meta,
            CredentialKind::GcpVertex(c) => &c.meta,
            CredentialKind::AzureOpenAI(c)
            | CredentialKind::Mistral(c)
            | CredentialKind::Deepseek(c)
            | CredentialKind::XAI(c)
            | CredentialKind::Cohere(c)
            | CredentialKind::Qwen(c)
            | CredentialKind::Glm(c)
            | CredentialKind::Moonshot(c)
            | CredentialKind::Groq(c)
            | CredentialKind::OpenRouter(c) => &c.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut CredentialMeta {
        match self {
            CredentialKind::OpenAI(c) => &mut c.meta,
            CredentialKind::Anthropic(c) => &mut c.meta,
            CredentialKind::GoogleAI(c) => &mut c.meta,
            CredentialKind::AwsBedrock(c) => &mut c.meta,
            CredentialKind::GcpVertex(c) => &mut c.meta,
            CredentialKind::AzureOpenAI(c)
            | CredentialKind::Mistral(c)
            | CredentialKind::Deepseek(c)
            | CredentialKind::XAI(c)
            | CredentialKind::Cohere(c)
            | CredentialKind::Qwen(c)
            | CredentialKind::Glm(c)
            | CredentialKind::Moonshot(c)
            | CredentialKind::Groq(c)
            | CredentialKind::OpenRouter(c) => &mut c.meta,
        }
    }

    pub fn service(&self) -> Service {
        self.meta().service
    }

    pub fn hash(&self) -> &str {
        &self.meta().hash
    }

    /// A copy of this credential with the raw secret scrubbed, safe to hand
    /// to an operator-facing `list()` caller (spec.md §4.1 `list()`).
    pub fn without_secret(&self) -> CredentialKind {
        let mut clone = self.clone();
        match &mut clone {
            CredentialKind::OpenAI(c) => c.api_key = redacted(),
            CredentialKind::Anthropic(c) => c.api_key = redacted(),
            CredentialKind::GoogleAI(c) => c.api_key = redacted(),
            CredentialKind::AwsBedrock(c) => {
                c.access_key_id = redacted();
                c.secret_access_key = redacted();
            }
            CredentialKind::GcpVertex(c) => c.private_key = redacted(),
            CredentialKind::AzureOpenAI(c)
            | CredentialKind::Mistral(c)
            | CredentialKind::Deepseek(c)
            | CredentialKind::XAI(c)
            | CredentialKind::Cohere(c)
            | CredentialKind::Qwen(c)
            | CredentialKind::Glm(c)
            | CredentialKind::Moonshot(c)
            | CredentialKind::Groq(c)
            | CredentialKind::OpenRouter(c) => c.api_key = redacted(),
        }
        clone
    }
}

fn redacted() -> String {
    "***".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyCredential {
    pub meta: CredentialMeta,
    pub api_key: String,
}

impl ApiKeyCredential {
    pub fn new(service: Service, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        Self {
            meta: CredentialMeta::new(service, &api_key, ""),
            api_key,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiCredential {
    pub meta: CredentialMeta,
    pub api_key: String,
    pub organization_id: Option<String>,
    pub is_trial: bool,
    pub organization_verified: bool,
    #[serde(skip)]
    pub rate_limit_requests_reset: Option<std::time::Duration>,
    #[serde(skip)]
    pub rate_limit_tokens_reset: Option<std::time::Duration>,
}

impl OpenAiCredential {
    /// Construct the base credential for an org. Multi-org clones (spec.md
    /// §3, §9) are created by the OpenAI checker via `clone_for_org`, never
    /// by calling this constructor a second time for the same secret.
    pub fn new(api_key: impl Into<String>, organization_id: Option<String>) -> Self {
        let api_key = api_key.into();
        let salt = organization_id.as_deref().unwrap_or("");
        Self {
            meta: CredentialMeta::new(Service::OpenAI, &api_key, salt),
            api_key,
            organization_id,
            is_trial: false,
            organization_verified: false,
            rate_limit_requests_reset: None,
            rate_limit_tokens_reset: None,
        }
    }

    /// Produce an independent clone scoped to another organization.
    ///
    /// Per spec.md §9 ("Clones for multi-org OpenAI keys"): the clone shares
    /// only the secret string. It gets its own hash, its own `meta` (reset to
    /// unchecked/enabled), and no back-reference to `self` — revoking one
    /// must never affect the other.
    pub fn clone_for_org(&self, organization_id: impl Into<String>) -> Self {
        Self::new(self.api_key.clone(), Some(organization_id.into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnthropicTier {
    Free,
    Build1,
    Build2,
    Build3,
    Build4,
    Scale,
    Unknown,
}

impl AnthropicTier {
    /// Map `anthropic-ratelimit-requests-limit` to a tier (spec.md §4.2).
    pub fn from_requests_limit(limit: u64) -> Self {
        match limit {
            0..=5 => AnthropicTier::Free,
            6..=50 => AnthropicTier::Build1,
            51..=1000 => AnthropicTier::Build2,
            1001..=2000 => AnthropicTier::Build3,
            2001..=4000 => AnthropicTier::Build4,
            _ => AnthropicTier::Scale,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicCredential {
    pub meta: CredentialMeta,
    pub api_key: String,
    pub tier: AnthropicTier,
    pub is_pozzed: bool,
}

impl AnthropicCredential {
    pub fn new(api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        Self {
            meta: CredentialMeta::new(Service::Anthropic, &api_key, ""),
            api_key,
            tier: AnthropicTier::Unknown,
            is_pozzed: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleAiCredential {
    pub meta: CredentialMeta,
    pub api_key: String,
    pub billing_enabled: bool,
    pub over_quota_families: HashSet<String>,
}

impl GoogleAiCredential {
    pub fn new(api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        Self {
            meta: CredentialMeta::new(Service::GoogleAI, &api_key, ""),
            api_key,
            billing_enabled: false,
            over_quota_families: HashSet::new(),
        }
    }
}

/// AWS Bedrock credential — spec.md §3 calls out cloud providers as using "a
/// compound tuple" for `secret`; this is that tuple made concrete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsBedrockCredential {
    pub meta: CredentialMeta,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

impl AwsBedrockCredential {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        let access_key_id = access_key_id.into();
        let secret_access_key = secret_access_key.into();
        let region = region.into();
        let secret_material = format!("{access_key_id}:{secret_access_key}");
        Self {
            meta: CredentialMeta::new(Service::AwsBedrock, &secret_material, &region),
            access_key_id,
            secret_access_key,
            region,
        }
    }
}

/// GCP Vertex credential — Google service-account JSON fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpVertexCredential {
    pub meta: CredentialMeta,
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    pub location: String,
}

impl GcpVertexCredential {
    pub fn new(
        project_id: impl Into<String>,
        client_email: impl Into<String>,
        private_key: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        let project_id = project_id.into();
        let client_email = client_email.into();
        let private_key = private_key.into();
        let location = location.into();
        let secret_material = format!("{client_email}:{private_key}");
        Self {
            meta: CredentialMeta::new(Service::GcpVertex, &secret_material, &project_id),
            project_id,
            client_email,
            private_key,
            location,
        }
    }
}

/// Cumulative usage keyed by coarse model family (spec.md §3
/// `tokenUsage[family]`).
pub type TokenUsageTable = HashMap<String, TokenUsage>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_secret_scrubs_api_key_but_keeps_meta() {
        let cred = CredentialKind::OpenAI(OpenAiCredential::new("sk-test", None));
        let public = cred.without_secret();
        match public {
            CredentialKind::OpenAI(c) => {
                assert_eq!(c.api_key, "***");
                assert_eq!(c.meta.hash, cred.hash());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn clone_for_org_is_independent_of_parent() {
        let parent = OpenAiCredential::new("sk-shared", Some("org_a".to_string()));
        let clone = parent.clone_for_org("org_b");
        assert_ne!(parent.meta.hash, clone.meta.hash);
        assert_eq!(clone.api_key, parent.api_key);
        assert!(!clone.meta.is_disabled);
    }
}
