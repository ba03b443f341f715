use async_trait::async_trait;

use crate::outcome::ProbeOutcome;

/// One low-cost out-of-band probe per provider (spec.md §4.2).
///
/// Generic over the provider's own credential struct `T` so each provider
/// keeps its capability fields (`model_ids`, `tier`, `is_pozzed`, ...)
/// strongly typed instead of going through a shared dynamic bag.
#[async_trait]
pub trait HealthProbe<T>: Send + Sync {
    async fn probe(&self, credential: &T) -> ProbeOutcome<T>;
}
