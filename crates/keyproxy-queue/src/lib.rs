//! Per-(service, model_family) FIFO dispatch admission (spec.md §4.4).
//!
//! Generic over any [`keyproxy_core::provider::CredentialProvider`], so this
//! crate has no dependency on `keyproxy-pool`'s concrete `KeyPool` — the
//! pool hands each provider's trait object to its own [`DispatchQueue`].

pub mod cancel;
pub mod queue;

pub use cancel::CancelToken;
pub use queue::{DispatchQueue, QueueOutcome};
