pub mod cycle;
pub mod family;
pub mod providers;
pub mod rate_limit_header;
pub mod store;

pub use cycle::run_probe_cycle;
pub use family::{anthropic_family_of, generic_family_of, google_family_of, openai_family_of};
pub use rate_limit_header::parse_reset_duration;
pub use store::{GenericCredentialStore, StoreConfig};

pub use providers::anthropic::{AnthropicHealthProbe, AnthropicProvider};
pub use providers::aws_bedrock::{AwsBedrockHealthProbe, AwsBedrockProvider};
pub use providers::gcp_vertex::{GcpVertexHealthProbe, GcpVertexProvider};
pub use providers::google_ai::{GoogleAiHealthProbe, GoogleAiProvider};
pub use providers::openai::{OpenAiHealthProbe, OpenAiProvider};
pub use providers::simple::{SimpleApiKeyProvider, SimpleHealthProbe};
