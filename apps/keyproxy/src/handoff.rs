use async_trait::async_trait;

use keyproxy_core::credential::CredentialKind;
use keyproxy_core::errors::{ProviderError, ProviderResult};

/// Placeholder seam for the out-of-scope transform layer (SPEC_FULL.md §7):
/// request/response transformation, tokenization, and streaming framing are
/// explicit non-goals of this crate (spec.md §1). Mirrors how the teacher's
/// `UpstreamProvider::build_*` hooks default to
/// `Err(ProviderError::Unsupported(...))` when a provider hasn't implemented
/// a given operation — here the entire forwarding step is that "provider
/// hasn't implemented it yet" hook.
#[async_trait]
pub trait UpstreamHandoff: Send + Sync {
    async fn forward(&self, credential: CredentialKind, model: &str, body: &[u8]) -> ProviderResult<Vec<u8>>;
}

/// Default: always declines. A real deployment supplies its own
/// `UpstreamHandoff` once it adds the transform layer this crate doesn't own.
pub struct NoopHandoff;

#[async_trait]
impl UpstreamHandoff for NoopHandoff {
    async fn forward(&self, _credential: CredentialKind, _model: &str, _body: &[u8]) -> ProviderResult<Vec<u8>> {
        Err(ProviderError::Other("request forwarding is not implemented by this crate".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_handoff_always_declines() {
        let credential = CredentialKind::Deepseek(keyproxy_core::credential::ApiKeyCredential::new(
            keyproxy_core::service::Service::Deepseek,
            "sk-test",
        ));
        let result = NoopHandoff.forward(credential, "deepseek-chat", b"{}").await;
        assert!(result.is_err());
    }
}
