use crate::service::Service;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Error taxonomy per spec.md §7.
///
/// `NoCredential` and `UnknownService` are the only conditions the core
/// surfaces to the HTTP layer as typed errors; everything else (probe
/// failures, rate limits) is absorbed into credential state and never
/// reaches the response path.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("no eligible credential available for {service} (model family {family:?})")]
    NoCredential {
        service: Service,
        family: Option<String>,
    },
    #[error("cannot infer a service for model {model:?}")]
    UnknownService { model: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("missing credential field: {0}")]
    MissingCredentialField(&'static str),
    #[error("{0}")]
    Other(String),
}
