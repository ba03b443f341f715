use time::OffsetDateTime;

use serde::{Deserialize, Serialize};

use crate::credential::DisableReason;
use crate::service::Service;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Credential(CredentialEvent),
    Queue(QueueEvent),
}

/// Lifecycle transitions on a single credential, emitted by the checker and
/// the pool (spec.md §3 lifecycle, §5.2 probe outcomes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CredentialEvent {
    Checked {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        service: Service,
        hash: String,
        healthy: bool,
    },
    RateLimited {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        service: Service,
        hash: String,
        #[serde(with = "time::serde::rfc3339")]
        until: OffsetDateTime,
    },
    Disabled {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        service: Service,
        hash: String,
        reason: DisableReason,
    },
    Rechecked {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        service: Service,
        hash: String,
    },
}

/// Dispatch queue admission/resolution events (spec.md §5.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    Enqueued {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        service: Service,
        model_family: String,
        queue_depth: usize,
    },
    Dispatched {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        service: Service,
        model_family: String,
        waited_ms: u64,
    },
    Cancelled {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        service: Service,
        model_family: String,
    },
    Exhausted {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
        service: Service,
        model_family: String,
    },
}
