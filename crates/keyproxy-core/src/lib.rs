//! Core credential data model shared by the checker, providers, queue, and
//! pool crates.
//!
//! This crate intentionally does not depend on `reqwest`/`wreq` or any
//! concrete HTTP client: it owns the shape of a credential and its health
//! state, not how a credential is probed or used to forward a request.

pub mod credential;
pub mod errors;
pub mod events;
pub mod headers;
pub mod priority;
pub mod provider;
pub mod service;

pub use credential::{
    AnthropicCredential, AnthropicTier, ApiKeyCredential, AwsBedrockCredential, CredentialKind,
    CredentialMeta, DisableReason, GcpVertexCredential, GoogleAiCredential, HealthState,
    OpenAiCredential, TokenUsage,
};
pub use errors::{ProviderError, ProviderResult};
pub use events::{CredentialEvent, Event, EventHub, EventSink, QueueEvent, TerminalEventSink};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use priority::pick_prioritized;
pub use provider::{CredentialProvider, SelectRequest};
pub use service::Service;
