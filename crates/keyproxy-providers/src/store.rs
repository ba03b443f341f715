use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::RwLock;

use keyproxy_core::credential::{CredentialKind, CredentialMeta, DisableReason};
use keyproxy_core::errors::{ProviderError, ProviderResult};
use keyproxy_core::events::{CredentialEvent, Event, EventHub};
use keyproxy_core::priority::pick_prioritized;
use keyproxy_core::provider::SelectRequest;
use keyproxy_core::service::Service;

/// Pure, per-provider behaviour injected into [`GenericCredentialStore`].
///
/// These are plain function pointers rather than a trait object: every
/// provider's filters are stateless functions of the candidate and the
/// request, so there's nothing to capture and no need for `Box<dyn Fn>`.
pub struct StoreConfig<T> {
    pub service: Service,
    pub check_keys: bool,
    pub reuse_delay: Duration,
    pub default_lockout: Duration,
    pub meta: fn(&T) -> &CredentialMeta,
    pub meta_mut: fn(&mut T) -> &mut CredentialMeta,
    pub is_trial: fn(&T) -> bool,
    pub family_of: fn(&str) -> String,
    /// Extra provider-specific gate applied during `select`, beyond the
    /// common eligibility filter (spec.md §4.1 "provider-specific filters").
    pub extra_filter: fn(&T, &SelectRequest) -> bool,
    pub to_kind: fn(&T) -> CredentialKind,
}

/// Generic engine implementing the Credential Provider operations (spec.md
/// §4.1) over any concrete per-provider credential struct `T`.
pub struct GenericCredentialStore<T> {
    credentials: RwLock<Vec<T>>,
    config: StoreConfig<T>,
    events: EventHub,
}

impl<T: Send + Sync> GenericCredentialStore<T> {
    pub fn new(config: StoreConfig<T>, events: EventHub, initial: Vec<T>) -> Self {
        Self {
            credentials: RwLock::new(initial),
            config,
            events,
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub async fn insert(&self, credential: T) {
        self.credentials.write().await.push(credential);
    }

    /// A cloned snapshot of one credential, for handing to a [`HealthProbe`]
    /// without holding the store's lock across a network call.
    ///
    /// [`HealthProbe`]: keyproxy_checker::HealthProbe
    pub async fn snapshot(&self, hash: &str) -> Option<T>
    where
        T: Clone,
    {
        self.credentials
            .read()
            .await
            .iter()
            .find(|c| (self.config.meta)(c).hash == hash)
            .cloned()
    }

    /// spec.md §4.1 `select`.
    pub async fn select(&self, req: &SelectRequest) -> ProviderResult<CredentialKind> {
        let now = OffsetDateTime::now_utc();
        let family = (self.config.family_of)(&req.model);
        let mut credentials = self.credentials.write().await;

        if credentials.is_empty() {
            return Err(ProviderError::NoCredential {
                service: self.config.service,
                family: Some(family),
            });
        }

        let base_eligible = |c: &T| -> bool {
            let meta = (self.config.meta)(c);
            !meta.is_disabled
                && !meta.is_over_quota
                && meta.model_families.contains(&family)
                && (!self.config.check_keys || meta.model_ids.contains(&req.model))
                && (self.config.extra_filter)(c, req)
        };

        let eligible_now: Vec<&T> = credentials
            .iter()
            .filter(|c| base_eligible(c) && !(self.config.meta)(c).is_locked_out(now))
            .collect();

        let picked_hash = if !eligible_now.is_empty() {
            pick_prioritized(eligible_now.into_iter(), self.config.meta, self.config.is_trial)
                .map(|c| (self.config.meta)(c).hash.clone())
        } else {
            // Every otherwise-eligible credential is throttled: fall back to
            // the one with the smallest `rateLimitedUntil` rather than
            // failing outright (spec.md §4.1).
            credentials
                .iter()
                .filter(|c| base_eligible(c))
                .min_by_key(|c| {
                    (self.config.meta)(c)
                        .rate_limited_until
                        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
                })
                .map(|c| (self.config.meta)(c).hash.clone())
        };

        let Some(hash) = picked_hash else {
            return Err(ProviderError::NoCredential {
                service: self.config.service,
                family: Some(family),
            });
        };

        let chosen = credentials
            .iter_mut()
            .find(|c| (self.config.meta)(c).hash == hash)
            .expect("hash picked from this same collection");
        let meta = (self.config.meta_mut)(chosen);
        meta.touch_used(now);
        meta.apply_reuse_throttle(now, self.config.reuse_delay);

        Ok((self.config.to_kind)(chosen))
    }

    /// Apply an arbitrary provider-specific mutation to the credential with
    /// this hash, e.g. writing probe-derived capability fields.
    pub async fn mutate(&self, hash: &str, f: impl FnOnce(&mut T)) {
        let mut credentials = self.credentials.write().await;
        if let Some(c) = credentials.iter_mut().find(|c| (self.config.meta)(c).hash == hash) {
            f(c);
        }
    }

    pub async fn update_last_checked(&self, hash: &str) {
        let now = OffsetDateTime::now_utc();
        let mut credentials = self.credentials.write().await;
        if let Some(c) = credentials.iter_mut().find(|c| (self.config.meta)(c).hash == hash) {
            (self.config.meta_mut)(c).touch_checked(now);
        }
    }

    pub async fn disable(&self, hash: &str, reason: DisableReason) {
        let now = OffsetDateTime::now_utc();
        let mut credentials = self.credentials.write().await;
        if let Some(c) = credentials.iter_mut().find(|c| (self.config.meta)(c).hash == hash) {
            (self.config.meta_mut)(c).disable(reason);
        }
        drop(credentials);
        tracing::warn!(service = %self.config.service, hash, ?reason, "credential disabled");
        self.events
            .emit(Event::Credential(CredentialEvent::Disabled {
                at: now,
                service: self.config.service,
                hash: hash.to_string(),
                reason,
            }))
            .await;
    }

    pub async fn increment_usage(&self, hash: &str, family: &str, input: u64, output: u64) {
        let mut credentials = self.credentials.write().await;
        if let Some(c) = credentials.iter_mut().find(|c| (self.config.meta)(c).hash == hash) {
            (self.config.meta_mut)(c).increment_usage(family, input, output);
        }
    }

    pub async fn mark_rate_limited(&self, hash: &str) {
        let now = OffsetDateTime::now_utc();
        let mut credentials = self.credentials.write().await;
        let until = {
            let Some(c) = credentials.iter_mut().find(|c| (self.config.meta)(c).hash == hash) else {
                return;
            };
            let meta = (self.config.meta_mut)(c);
            meta.mark_rate_limited(now, self.config.default_lockout);
            meta.rate_limited_until.unwrap()
        };
        drop(credentials);
        tracing::warn!(service = %self.config.service, hash, %until, "credential rate limited");
        self.events
            .emit(Event::Credential(CredentialEvent::RateLimited {
                at: now,
                service: self.config.service,
                hash: hash.to_string(),
                until,
            }))
            .await;
    }

    /// OpenAI-specific header-derived rate limit write (spec.md §4.1
    /// `updateRateLimits`), exposed here so the OpenAI provider can reuse the
    /// same locking/lookup path.
    pub async fn set_rate_limited_until(&self, hash: &str, until: OffsetDateTime) {
        let mut credentials = self.credentials.write().await;
        if let Some(c) = credentials.iter_mut().find(|c| (self.config.meta)(c).hash == hash) {
            (self.config.meta_mut)(c).set_rate_limited_until(until);
        }
    }

    /// spec.md §4.1 `getLockoutPeriod(family)`.
    pub async fn get_lockout_period(&self, family: &str) -> Duration {
        let now = OffsetDateTime::now_utc();
        let credentials = self.credentials.read().await;
        let eligible = credentials.iter().filter(|c| {
            let meta = (self.config.meta)(c);
            !meta.is_disabled && !meta.is_over_quota && meta.model_families.contains(family)
        });

        let mut min_wait: Option<Duration> = None;
        for c in eligible {
            let meta = (self.config.meta)(c);
            if !meta.is_locked_out(now) {
                return Duration::ZERO;
            }
            let remaining = meta.lockout_remaining(now);
            min_wait = Some(match min_wait {
                Some(w) if w < remaining => w,
                _ => remaining,
            });
        }

        min_wait.unwrap_or(Duration::ZERO).min(Duration::from_secs(20))
    }

    /// spec.md §4.1 `recheck()`.
    pub async fn recheck(&self) {
        let mut credentials = self.credentials.write().await;
        for c in credentials.iter_mut() {
            (self.config.meta_mut)(c).recheck();
        }
    }

    pub async fn available(&self) -> usize {
        self.credentials
            .read()
            .await
            .iter()
            .filter(|c| !(self.config.meta)(c).is_disabled)
            .count()
    }

    pub async fn list(&self) -> Vec<CredentialKind> {
        self.credentials
            .read()
            .await
            .iter()
            .map(self.config.to_kind)
            .collect()
    }

    /// Snapshot of `(hash, last_checked)` pairs for the health checker's
    /// scheduler (spec.md §4.2).
    pub async fn checker_snapshot(&self) -> Vec<(String, Option<OffsetDateTime>)> {
        self.credentials
            .read()
            .await
            .iter()
            .map(|c| {
                let meta = (self.config.meta)(c);
                (meta.hash.clone(), meta.last_checked)
            })
            .collect()
    }
}
