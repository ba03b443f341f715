use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{Mutex, oneshot};

use keyproxy_core::credential::CredentialKind;
use keyproxy_core::events::{Event, EventHub, QueueEvent};
use keyproxy_core::provider::{CredentialProvider, SelectRequest};
use keyproxy_core::service::Service;

use crate::cancel::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Resolution of one [`DispatchQueue::enqueue`] call (spec.md §4.4).
#[derive(Debug)]
pub enum QueueOutcome {
    Admitted(CredentialKind),
    Cancelled,
    /// No credential for this service could ever serve the request — the
    /// queue declines to admit it at all rather than waiting forever.
    NoCredential,
}

struct Waiter {
    request: SelectRequest,
    sender: oneshot::Sender<QueueOutcome>,
    enqueued_at: OffsetDateTime,
}

/// Per-(service, model_family) FIFO admission queue (spec.md §4.4). One
/// instance is spawned per provider, generic over any [`CredentialProvider`]
/// so it never needs to know about `keyproxy-pool`'s concrete `KeyPool`.
pub struct DispatchQueue {
    provider: Arc<dyn CredentialProvider>,
    service: Service,
    events: EventHub,
    waiters: Mutex<HashMap<String, VecDeque<Waiter>>>,
}

impl DispatchQueue {
    pub fn new(provider: Arc<dyn CredentialProvider>, service: Service, events: EventHub) -> Arc<Self> {
        Arc::new(Self {
            provider,
            service,
            events,
            waiters: Mutex::new(HashMap::new()),
        })
    }

    /// Spawns the 50ms poll loop (spec.md §4.4). Returns the task handle so
    /// the caller can hold / abort it alongside the rest of its bootstrap.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            loop {
                interval.tick().await;
                this.poll_once().await;
            }
        })
    }

    /// Admits `request` under `model_family`, suspending until a credential
    /// is assigned or `cancel` fires (spec.md §4.4 "`Queue.enqueue` suspends
    /// until admission or cancellation").
    pub async fn enqueue(
        &self,
        request: SelectRequest,
        model_family: String,
        cancel: CancelToken,
    ) -> QueueOutcome {
        if self.provider.available().await == 0 {
            return QueueOutcome::NoCredential;
        }

        let (tx, rx) = oneshot::channel();
        let enqueued_at = OffsetDateTime::now_utc();
        let depth = {
            let mut waiters = self.waiters.lock().await;
            let queue = waiters.entry(model_family.clone()).or_default();
            queue.push_back(Waiter {
                request,
                sender: tx,
                enqueued_at,
            });
            queue.len()
        };
        tracing::debug!(service = %self.service, model_family = %model_family, queue_depth = depth, "request enqueued");
        self.events
            .emit(Event::Queue(QueueEvent::Enqueued {
                at: enqueued_at,
                service: self.service,
                model_family: model_family.clone(),
                queue_depth: depth,
            }))
            .await;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(service = %self.service, model_family = %model_family, "request cancelled before dispatch");
                self.events
                    .emit(Event::Queue(QueueEvent::Cancelled {
                        at: OffsetDateTime::now_utc(),
                        service: self.service,
                        model_family,
                    }))
                    .await;
                QueueOutcome::Cancelled
            }
            result = rx => result.unwrap_or(QueueOutcome::Cancelled),
        }
    }

    pub async fn queue_depth(&self, family: &str) -> usize {
        self.waiters.lock().await.get(family).map(VecDeque::len).unwrap_or(0)
    }

    /// Heuristic wait estimate (spec.md §4.4): the front of the line still
    /// has to wait out the current lockout, everyone behind it waits one
    /// more poll tick per position.
    pub async fn estimated_queue_time(&self, family: &str) -> Duration {
        let depth = self.queue_depth(family).await;
        if depth == 0 {
            return Duration::ZERO;
        }
        let lockout = self.provider.get_lockout_period(family).await;
        lockout + POLL_INTERVAL * (depth.saturating_sub(1) as u32)
    }

    async fn poll_once(&self) {
        let families: Vec<String> = {
            let waiters = self.waiters.lock().await;
            waiters
                .iter()
                .filter(|(_, q)| !q.is_empty())
                .map(|(family, _)| family.clone())
                .collect()
        };

        for family in families {
            self.drop_stale_cancellations(&family).await;

            if self.provider.get_lockout_period(&family).await != Duration::ZERO {
                continue;
            }

            let waiter = {
                let mut waiters = self.waiters.lock().await;
                waiters.get_mut(&family).and_then(VecDeque::pop_front)
            };
            let Some(waiter) = waiter else { continue };

            if waiter.sender.is_closed() {
                continue;
            }

            match self.provider.select(&waiter.request).await {
                Ok(credential) => {
                    let waited_ms = (OffsetDateTime::now_utc() - waiter.enqueued_at)
                        .whole_milliseconds()
                        .max(0) as u64;
                    tracing::debug!(service = %self.service, model_family = %family, waited_ms, "request dispatched");
                    self.events
                        .emit(Event::Queue(QueueEvent::Dispatched {
                            at: OffsetDateTime::now_utc(),
                            service: self.service,
                            model_family: family,
                            waited_ms,
                        }))
                        .await;
                    let _ = waiter.sender.send(QueueOutcome::Admitted(credential));
                }
                Err(_) => {
                    // select yielded NoCredential at this instant: stays
                    // queued, polling resumes next tick (spec.md §4.4).
                    if self.provider.available().await == 0 {
                        tracing::warn!(service = %self.service, model_family = %family, "no credential available, queue exhausted");
                        self.events
                            .emit(Event::Queue(QueueEvent::Exhausted {
                                at: OffsetDateTime::now_utc(),
                                service: self.service,
                                model_family: family.clone(),
                            }))
                            .await;
                    }
                    let mut waiters = self.waiters.lock().await;
                    waiters.entry(family).or_default().push_front(waiter);
                }
            }
        }
    }

    /// Waiters whose `enqueue` call already resolved via the cancel branch
    /// have a closed sender; drop them from the front of the line instead of
    /// spending a `select` call (and its reuse-throttle side effect) on them.
    async fn drop_stale_cancellations(&self, family: &str) {
        loop {
            let dropped = {
                let mut waiters = self.waiters.lock().await;
                match waiters.get_mut(family) {
                    Some(queue) if matches!(queue.front(), Some(w) if w.sender.is_closed()) => {
                        queue.pop_front();
                        true
                    }
                    _ => false,
                }
            };
            if !dropped {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keyproxy_core::credential::{ApiKeyCredential, DisableReason};
    use keyproxy_core::errors::{ProviderError, ProviderResult};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockProvider {
        available: AtomicBool,
        locked_out: AtomicBool,
        selects: AtomicUsize,
    }

    impl MockProvider {
        fn new(available: bool) -> Self {
            Self {
                available: AtomicBool::new(available),
                locked_out: AtomicBool::new(false),
                selects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CredentialProvider for MockProvider {
        async fn select(&self, _req: &SelectRequest) -> ProviderResult<CredentialKind> {
            self.selects.fetch_add(1, Ordering::SeqCst);
            if self.locked_out.load(Ordering::SeqCst) {
                return Err(ProviderError::NoCredential {
                    service: Service::Deepseek,
                    family: Some("deepseek-chat".to_string()),
                });
            }
            Ok(CredentialKind::Deepseek(ApiKeyCredential::new(Service::Deepseek, "sk-test")))
        }

        async fn update_last_checked(&self, _hash: &str) {}
        async fn disable(&self, _hash: &str, _reason: DisableReason) {}
        async fn increment_usage(&self, _hash: &str, _family: &str, _input: u64, _output: u64) {}
        async fn mark_rate_limited(&self, _hash: &str) {}

        async fn get_lockout_period(&self, _family: &str) -> Duration {
            if self.locked_out.load(Ordering::SeqCst) {
                Duration::from_millis(100)
            } else {
                Duration::ZERO
            }
        }

        async fn recheck(&self) {}

        async fn available(&self) -> usize {
            if self.available.load(Ordering::SeqCst) { 1 } else { 0 }
        }

        async fn list(&self) -> Vec<CredentialKind> {
            vec![]
        }
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_resolves_once_lockout_clears() {
        let provider: Arc<dyn CredentialProvider> = Arc::new(MockProvider::new(true));
        let queue = DispatchQueue::new(provider, Service::Deepseek, EventHub::new(16));
        queue.spawn();

        let request = SelectRequest::new("deepseek-chat");
        let outcome = queue.enqueue(request, "deepseek-chat".to_string(), CancelToken::new()).await;
        assert!(matches!(outcome, QueueOutcome::Admitted(_)));
    }

    #[tokio::test]
    async fn enqueue_with_no_available_credentials_fails_fast() {
        let provider: Arc<dyn CredentialProvider> = Arc::new(MockProvider::new(false));
        let queue = DispatchQueue::new(provider, Service::Deepseek, EventHub::new(16));

        let request = SelectRequest::new("deepseek-chat");
        let outcome = queue.enqueue(request, "deepseek-chat".to_string(), CancelToken::new()).await;
        assert!(matches!(outcome, QueueOutcome::NoCredential));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_before_dispatch_yields_cancelled() {
        let provider: Arc<dyn CredentialProvider> = Arc::new(MockProvider::new(true));
        let queue = DispatchQueue::new(Arc::clone(&provider), Service::Deepseek, EventHub::new(16));
        // no spawn(): nothing will ever dequeue, so cancellation must win the race.

        let cancel = CancelToken::new();
        let cancel_clone = cancel.clone();
        let request = SelectRequest::new("deepseek-chat");
        let handle = tokio::spawn(async move {
            queue.enqueue(request, "deepseek-chat".to_string(), cancel_clone).await
        });
        tokio::task::yield_now().await;
        cancel.cancel();
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, QueueOutcome::Cancelled));
    }
}
