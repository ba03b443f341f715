use async_trait::async_trait;
use std::time::Duration;

use crate::credential::{CredentialKind, DisableReason};
use crate::errors::ProviderResult;

/// Parameters a caller supplies to `select` beyond the bare model id
/// (spec.md §4.1).
#[derive(Debug, Clone, Default)]
pub struct SelectRequest {
    pub model: String,
    pub streaming: bool,
    pub multimodal: bool,
}

impl SelectRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            streaming: false,
            multimodal: false,
        }
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn multimodal(mut self, multimodal: bool) -> Self {
        self.multimodal = multimodal;
        self
    }
}

/// Owns the credential set for a single upstream service (spec.md §4.1).
///
/// Implemented once generically (`keyproxy_providers::GenericCredentialStore`)
/// and wrapped per-provider with provider-specific filter/priority closures;
/// every provider exposes the same async surface here regardless of its
/// underlying credential struct, since `select`/`list` return the common
/// [`CredentialKind`] tagged enum.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn select(&self, req: &SelectRequest) -> ProviderResult<CredentialKind>;
    async fn update_last_checked(&self, hash: &str);
    async fn disable(&self, hash: &str, reason: DisableReason);
    async fn increment_usage(&self, hash: &str, family: &str, input: u64, output: u64);
    async fn mark_rate_limited(&self, hash: &str);
    async fn get_lockout_period(&self, family: &str) -> Duration;
    async fn recheck(&self);
    async fn available(&self) -> usize;
    async fn list(&self) -> Vec<CredentialKind>;
}
