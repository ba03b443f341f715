use serde::{Deserialize, Serialize};

/// Enumerated upstream identifier (spec.md §3 `service` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    OpenAI,
    Anthropic,
    GoogleAI,
    AwsBedrock,
    GcpVertex,
    AzureOpenAI,
    Mistral,
    Deepseek,
    XAI,
    Cohere,
    Qwen,
    Glm,
    Moonshot,
    Groq,
    OpenRouter,
}

impl Service {
    pub const ALL: &'static [Service] = &[
        Service::OpenAI,
        Service::Anthropic,
        Service::GoogleAI,
        Service::AwsBedrock,
        Service::GcpVertex,
        Service::AzureOpenAI,
        Service::Mistral,
        Service::Deepseek,
        Service::XAI,
        Service::Cohere,
        Service::Qwen,
        Service::Glm,
        Service::Moonshot,
        Service::Groq,
        Service::OpenRouter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::OpenAI => "openai",
            Service::Anthropic => "anthropic",
            Service::GoogleAI => "google-ai",
            Service::AwsBedrock => "aws-bedrock",
            Service::GcpVertex => "gcp-vertex",
            Service::AzureOpenAI => "azure-openai",
            Service::Mistral => "mistral",
            Service::Deepseek => "deepseek",
            Service::XAI => "xai",
            Service::Cohere => "cohere",
            Service::Qwen => "qwen",
            Service::Glm => "glm",
            Service::Moonshot => "moonshot",
            Service::Groq => "groq",
            Service::OpenRouter => "openrouter",
        }
    }

    pub fn parse(value: &str) -> Option<Service> {
        Service::ALL.iter().copied().find(|s| s.as_str() == value)
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model id/name → `Service` inference table (spec.md §4.3).
///
/// Used by `KeyPool` when the caller does not supply an explicit `service`.
/// Order matters: more specific patterns are checked before broader
/// substring matches.
pub fn infer_service(model: &str) -> Option<Service> {
    let m = model;
    if m.contains('@') && m.starts_with("claude-") {
        return Some(Service::GcpVertex);
    }
    if m.starts_with("anthropic.claude") {
        return Some(Service::AwsBedrock);
    }
    if m.starts_with("claude-") {
        return Some(Service::Anthropic);
    }
    if m.contains("gemini") {
        return Some(Service::GoogleAI);
    }
    if m.contains("mistral") {
        return Some(Service::Mistral);
    }
    if m.starts_with("deepseek") {
        return Some(Service::Deepseek);
    }
    if m.starts_with("grok") {
        return Some(Service::XAI);
    }
    if m.starts_with("command") {
        return Some(Service::Cohere);
    }
    if m.starts_with("qwen") {
        return Some(Service::Qwen);
    }
    if m.starts_with("glm") {
        return Some(Service::Glm);
    }
    if m.starts_with("moonshot") || m.starts_with("kimi") {
        return Some(Service::Moonshot);
    }
    if m.starts_with("groq-") || m == "groq" {
        return Some(Service::Groq);
    }
    if m.contains("/") {
        // OpenRouter model ids are namespaced, e.g. "anthropic/claude-3-haiku".
        return Some(Service::OpenRouter);
    }
    if m.starts_with("gpt")
        || m.starts_with("o1")
        || m.starts_with("o3")
        || m.starts_with("o4-mini")
        || m.starts_with("dall-e")
        || m.starts_with("chatgpt")
        || m.starts_with("text-embedding")
        || m.starts_with("codex")
    {
        return Some(Service::OpenAI);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_anthropic_family() {
        assert_eq!(infer_service("claude-opus-4-5"), Some(Service::Anthropic));
        assert_eq!(
            infer_service("claude-opus-4-5@20250101"),
            Some(Service::GcpVertex)
        );
        assert_eq!(
            infer_service("anthropic.claude-3-sonnet"),
            Some(Service::AwsBedrock)
        );
    }

    #[test]
    fn infers_openai_family() {
        assert_eq!(infer_service("gpt-4o"), Some(Service::OpenAI));
        assert_eq!(infer_service("o3-mini"), Some(Service::OpenAI));
        assert_eq!(infer_service("text-embedding-3-large"), Some(Service::OpenAI));
    }

    #[test]
    fn unknown_model_returns_none() {
        assert_eq!(infer_service("some-made-up-model"), None);
    }

    #[test]
    fn round_trips_string_form() {
        for service in Service::ALL {
            assert_eq!(Service::parse(service.as_str()), Some(*service));
        }
    }
}
