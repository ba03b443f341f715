use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use keyproxy_core::credential::{CredentialKind, DisableReason};
use keyproxy_core::errors::{ProviderError, ProviderResult};
use keyproxy_core::events::EventHub;
use keyproxy_core::provider::{CredentialProvider, SelectRequest};
use keyproxy_core::service::{Service, infer_service};
use keyproxy_queue::{CancelToken, DispatchQueue, QueueOutcome};

/// Single entry point fronting one [`CredentialProvider`] per upstream
/// (spec.md §4.3). Routes by an explicit `service` or by inferring one from
/// the model id, aggregates `available`/`list`, and tracks the per-family
/// request counter.
pub struct KeyPool {
    providers: HashMap<Service, Arc<dyn CredentialProvider>>,
    queues: HashMap<Service, Arc<DispatchQueue>>,
    events: EventHub,
    request_counts: Mutex<HashMap<String, u64>>,
}

impl KeyPool {
    pub fn new(providers: HashMap<Service, Arc<dyn CredentialProvider>>, events: EventHub) -> Arc<Self> {
        let queues = providers
            .iter()
            .map(|(service, provider)| {
                (*service, DispatchQueue::new(Arc::clone(provider), *service, events.clone()))
            })
            .collect();
        Arc::new(Self {
            providers,
            queues,
            events,
            request_counts: Mutex::new(HashMap::new()),
        })
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Spawns every registered provider's Dispatch Queue poll loop (spec.md
    /// §4.4, "one logical Dispatch Queue task" per provider).
    pub fn spawn_queues(&self) -> Vec<tokio::task::JoinHandle<()>> {
        self.queues.values().map(DispatchQueue::spawn).collect()
    }

    fn provider_for(&self, service: Service) -> ProviderResult<&Arc<dyn CredentialProvider>> {
        self.providers
            .get(&service)
            .ok_or_else(|| ProviderError::UnknownService { model: service.to_string() })
    }

    fn queue_for(&self, service: Service) -> ProviderResult<&Arc<DispatchQueue>> {
        self.queues
            .get(&service)
            .ok_or_else(|| ProviderError::UnknownService { model: service.to_string() })
    }

    /// Resolves the caller-supplied `service`, or infers one from the model
    /// id if absent (spec.md §4.3).
    pub fn resolve_service(&self, explicit: Option<Service>, model: &str) -> ProviderResult<Service> {
        explicit
            .or_else(|| infer_service(model))
            .ok_or_else(|| ProviderError::UnknownService { model: model.to_string() })
    }

    pub async fn select(&self, req: &SelectRequest, service: Option<Service>) -> ProviderResult<CredentialKind> {
        let service = self.resolve_service(service, &req.model)?;
        self.provider_for(service)?.select(req).await
    }

    /// Admits `req` into the named service's Dispatch Queue (spec.md §4.4).
    pub async fn enqueue(
        &self,
        req: SelectRequest,
        service: Option<Service>,
        model_family: String,
        cancel: CancelToken,
    ) -> ProviderResult<QueueOutcome> {
        let service = self.resolve_service(service, &req.model)?;
        Ok(self.queue_for(service)?.enqueue(req, model_family, cancel).await)
    }

    pub async fn estimated_queue_time(&self, service: Service, family: &str) -> ProviderResult<Duration> {
        Ok(self.queue_for(service)?.estimated_queue_time(family).await)
    }

    pub async fn update_last_checked(&self, service: Service, hash: &str) -> ProviderResult<()> {
        self.provider_for(service)?.update_last_checked(hash).await;
        Ok(())
    }

    pub async fn disable(&self, service: Service, hash: &str, reason: DisableReason) -> ProviderResult<()> {
        self.provider_for(service)?.disable(hash, reason).await;
        Ok(())
    }

    pub async fn increment_usage(
        &self,
        service: Service,
        hash: &str,
        family: &str,
        input: u64,
        output: u64,
    ) -> ProviderResult<()> {
        self.provider_for(service)?.increment_usage(hash, family, input, output).await;
        Ok(())
    }

    pub async fn mark_rate_limited(&self, service: Service, hash: &str) -> ProviderResult<()> {
        self.provider_for(service)?.mark_rate_limited(hash).await;
        Ok(())
    }

    pub async fn get_lockout_period(&self, service: Service, family: &str) -> ProviderResult<Duration> {
        Ok(self.provider_for(service)?.get_lockout_period(family).await)
    }

    pub async fn recheck(&self, service: Service) -> ProviderResult<()> {
        self.provider_for(service)?.recheck().await;
        Ok(())
    }

    /// `available("all")` from spec.md §4.3: total across every provider.
    pub async fn available(&self, service: Option<Service>) -> ProviderResult<usize> {
        match service {
            Some(service) => Ok(self.provider_for(service)?.available().await),
            None => {
                let mut total = 0;
                for provider in self.providers.values() {
                    total += provider.available().await;
                }
                Ok(total)
            }
        }
    }

    pub async fn list(&self, service: Option<Service>) -> ProviderResult<Vec<CredentialKind>> {
        match service {
            Some(service) => Ok(self.provider_for(service)?.list().await),
            None => {
                let mut all = Vec::new();
                for provider in self.providers.values() {
                    all.extend(provider.list().await);
                }
                Ok(all)
            }
        }
    }

    /// `incrementRequestCount(family)` (spec.md §4.3): Groq subfamilies
    /// (`groq-*`) also bump the parent `groq` counter.
    pub async fn increment_request_count(&self, family: &str) {
        let mut counts = self.request_counts.lock().await;
        *counts.entry(family.to_string()).or_insert(0) += 1;
        if family.starts_with("groq-") {
            *counts.entry("groq".to_string()).or_insert(0) += 1;
        }
    }

    pub async fn request_count(&self, family: &str) -> u64 {
        *self.request_counts.lock().await.get(family).unwrap_or(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyproxy_core::credential::ApiKeyCredential;
    use keyproxy_providers::SimpleApiKeyProvider;

    fn pool_with(services: Vec<(Service, Vec<&str>)>) -> Arc<KeyPool> {
        let events = EventHub::new(16);
        let providers = services
            .into_iter()
            .map(|(service, keys)| {
                let credentials = keys.into_iter().map(|k| ApiKeyCredential::new(service, k)).collect();
                let provider: Arc<dyn CredentialProvider> =
                    Arc::new(SimpleApiKeyProvider::new(service, events.clone(), credentials));
                (service, provider)
            })
            .collect();
        KeyPool::new(providers, events)
    }

    #[tokio::test]
    async fn resolve_service_prefers_explicit_over_inferred() {
        let pool = pool_with(vec![(Service::Deepseek, vec!["sk-a"]), (Service::Groq, vec!["sk-b"])]);
        let resolved = pool.resolve_service(Some(Service::Groq), "deepseek-chat").unwrap();
        assert_eq!(resolved, Service::Groq);
    }

    #[tokio::test]
    async fn resolve_service_infers_from_model_when_absent() {
        let pool = pool_with(vec![(Service::Deepseek, vec!["sk-a"])]);
        let resolved = pool.resolve_service(None, "deepseek-chat").unwrap();
        assert_eq!(resolved, Service::Deepseek);
    }

    #[tokio::test]
    async fn resolve_service_fails_for_unroutable_model() {
        let pool = pool_with(vec![(Service::Deepseek, vec!["sk-a"])]);
        let err = pool.resolve_service(None, "totally-unknown-model").unwrap_err();
        assert!(matches!(err, ProviderError::UnknownService { .. }));
    }

    #[tokio::test]
    async fn available_aggregates_across_every_provider() {
        let pool = pool_with(vec![
            (Service::Deepseek, vec!["sk-a", "sk-b"]),
            (Service::Groq, vec!["sk-c"]),
        ]);
        assert_eq!(pool.available(Some(Service::Deepseek)).await.unwrap(), 2);
        assert_eq!(pool.available(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn groq_subfamily_requests_also_bump_the_parent_counter() {
        let pool = pool_with(vec![(Service::Groq, vec!["sk-a"])]);
        pool.increment_request_count("groq-llama3-70b").await;
        pool.increment_request_count("groq-llama3-70b").await;
        assert_eq!(pool.request_count("groq-llama3-70b").await, 2);
        assert_eq!(pool.request_count("groq").await, 2);
    }

    #[tokio::test]
    async fn non_groq_families_never_touch_the_groq_counter() {
        let pool = pool_with(vec![(Service::Deepseek, vec!["sk-a"])]);
        pool.increment_request_count("deepseek-chat").await;
        assert_eq!(pool.request_count("deepseek-chat").await, 1);
        assert_eq!(pool.request_count("groq").await, 0);
    }

    #[tokio::test]
    async fn select_routes_through_the_correct_provider() {
        let pool = pool_with(vec![(Service::Deepseek, vec!["sk-a"])]);
        let req = SelectRequest::new("deepseek-chat");
        let credential = pool.select(&req, None).await.unwrap();
        assert!(matches!(credential, CredentialKind::Deepseek(_)));
    }
}
