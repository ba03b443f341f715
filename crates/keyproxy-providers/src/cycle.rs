use std::sync::{Arc, Mutex};
use std::time::Duration;

use keyproxy_checker::{CredentialScheduler, HealthProbe, ProbeRetryLedger, SchedulerConfig, apply_transition, pick_due};
use keyproxy_core::credential::CredentialMeta;

use crate::store::GenericCredentialStore;

/// How long a credential's consecutive-failure count survives without a new
/// failure before resetting to zero (spec.md §9's unbounded-retry-counter
/// open question, resolved to a bounded decay window).
const RETRY_DECAY: Duration = Duration::from_secs(3600);

/// Run one probe-and-apply cycle for a single credential: snapshot it,
/// probe it, run the common status→transition table against its meta, then
/// apply the provider-specific capability write, all without holding the
/// store's lock across the network call.
pub async fn run_probe_cycle<T>(
    store: &GenericCredentialStore<T>,
    probe: &(dyn HealthProbe<T> + Send + Sync),
    hash: &str,
    meta_mut_of: fn(&mut T) -> &mut CredentialMeta,
    full_cycle: Duration,
    ledger: &Mutex<ProbeRetryLedger>,
    max_server_error_retries: u32,
) where
    T: Clone + Send + Sync,
{
    let Some(snapshot) = store.snapshot(hash).await else {
        return;
    };

    let outcome = probe.probe(&snapshot).await;
    let now = time::OffsetDateTime::now_utc();

    store
        .mutate(hash, move |c| {
            let class = outcome.class;
            let meta = meta_mut_of(c);
            let mut guard = ledger.lock().expect("retry ledger mutex poisoned");
            apply_transition(meta, class, now, full_cycle, &mut guard, max_server_error_retries);
            drop(guard);
            if let Some(apply) = outcome.apply {
                apply(c);
            }
        })
        .await;
}

/// Spawns the per-credential continuous checker for one provider (spec.md
/// §4.2: a scheduler that picks the oldest-due credential, respecting the
/// minimum inter-probe interval, on a fixed tick). `store_of` lets this stay
/// generic over whatever struct wraps a [`GenericCredentialStore`] without
/// that store needing to be a public field.
pub fn spawn_checker<P, T>(
    provider: Arc<P>,
    store_of: fn(&P) -> &GenericCredentialStore<T>,
    meta_mut_of: fn(&mut T) -> &mut CredentialMeta,
    probe: impl HealthProbe<T> + Send + Sync + 'static,
    config: SchedulerConfig,
    max_server_error_retries: u32,
) -> tokio::task::JoinHandle<()>
where
    P: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    let probe = Arc::new(probe);
    let ledger = Arc::new(Mutex::new(ProbeRetryLedger::new(RETRY_DECAY)));
    CredentialScheduler::spawn(config.min_interval, move || {
        let provider = Arc::clone(&provider);
        let probe = Arc::clone(&probe);
        let ledger = Arc::clone(&ledger);
        async move {
            let store = store_of(&provider);
            let snapshot = store.checker_snapshot().await;
            let now = time::OffsetDateTime::now_utc();
            let due = pick_due(snapshot.iter().map(|(h, t)| (h.as_str(), *t)), &config, now)
                .map(str::to_string);
            if let Some(hash) = due {
                run_probe_cycle(store, probe.as_ref(), &hash, meta_mut_of, config.full_cycle, &ledger, max_server_error_retries).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keyproxy_checker::ProbeClass;
    use keyproxy_core::credential::ApiKeyCredential;
    use keyproxy_core::events::EventHub;
    use keyproxy_core::service::Service;

    use crate::store::StoreConfig;

    struct AlwaysServerError;

    #[async_trait]
    impl HealthProbe<ApiKeyCredential> for AlwaysServerError {
        async fn probe(&self, _credential: &ApiKeyCredential) -> keyproxy_checker::ProbeOutcome<ApiKeyCredential> {
            keyproxy_checker::ProbeOutcome::new(ProbeClass::ServerError)
        }
    }

    fn config() -> StoreConfig<ApiKeyCredential> {
        StoreConfig {
            service: Service::Deepseek,
            check_keys: false,
            reuse_delay: Duration::from_millis(500),
            default_lockout: Duration::from_secs(2),
            meta: |c| &c.meta,
            meta_mut: |c| &mut c.meta,
            is_trial: |_| false,
            family_of: crate::family::generic_family_of,
            extra_filter: |_, _| true,
            to_kind: |c| keyproxy_core::credential::CredentialKind::Deepseek(c.clone()),
        }
    }

    #[tokio::test]
    async fn repeated_server_errors_eventually_disable_credential() {
        let cred = ApiKeyCredential::new(Service::Deepseek, "sk-test");
        let hash = cred.meta.hash.clone();
        let store = GenericCredentialStore::new(config(), EventHub::new(8), vec![cred]);
        let probe = AlwaysServerError;
        let ledger = Mutex::new(keyproxy_checker::ProbeRetryLedger::new(Duration::from_secs(3600)));

        for _ in 0..3 {
            run_probe_cycle(&store, &probe, &hash, |c| &mut c.meta, Duration::from_secs(86400), &ledger, 2).await;
        }

        assert_eq!(store.available().await, 0, "credential should be disabled after exhausting retries");
    }
}
