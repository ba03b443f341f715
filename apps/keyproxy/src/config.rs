use std::collections::HashMap;

use clap::Parser;

use keyproxy_common::parse_csv_env;

/// CLI/env configuration (spec.md §6 "Configuration (environment)"). Every
/// field is CLI > ENV, no DB overlay — this core is stateless (§6:
/// "Persisted state: None"), so the teacher's three-way CLI/ENV/DB merge
/// collapses to a two-way one (SPEC_FULL.md §3).
#[derive(Debug, Clone, Parser)]
#[command(name = "keyproxy", version, about = "Multi-tenant LLM key pool proxy")]
pub struct CliArgs {
    #[arg(long, env = "KEYPROXY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "KEYPROXY_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Disables every provider's continuous checker, leaving credentials
    /// permanently in "unchecked → assumed valid" state (spec.md §6).
    #[arg(long, env = "CHECK_KEYS", default_value_t = true)]
    pub check_keys: bool,

    /// Comma-separated model-family allowlist; empty means unrestricted
    /// (spec.md §6: "restricting which families `select` will serve").
    #[arg(long, env = "ALLOWED_MODEL_FAMILIES", default_value = "")]
    pub allowed_model_families: String,

    #[arg(long, env = "OPENAI_API_KEYS", default_value = "")]
    pub openai_api_keys: String,
    #[arg(long, env = "ANTHROPIC_API_KEYS", default_value = "")]
    pub anthropic_api_keys: String,
    #[arg(long, env = "GOOGLE_AI_API_KEYS", default_value = "")]
    pub google_ai_api_keys: String,
    #[arg(long, env = "AZURE_OPENAI_API_KEYS", default_value = "")]
    pub azure_openai_api_keys: String,
    #[arg(long, env = "MISTRAL_API_KEYS", default_value = "")]
    pub mistral_api_keys: String,
    #[arg(long, env = "DEEPSEEK_API_KEYS", default_value = "")]
    pub deepseek_api_keys: String,
    #[arg(long, env = "XAI_API_KEYS", default_value = "")]
    pub xai_api_keys: String,
    #[arg(long, env = "COHERE_API_KEYS", default_value = "")]
    pub cohere_api_keys: String,
    #[arg(long, env = "QWEN_API_KEYS", default_value = "")]
    pub qwen_api_keys: String,
    #[arg(long, env = "GLM_API_KEYS", default_value = "")]
    pub glm_api_keys: String,
    #[arg(long, env = "MOONSHOT_API_KEYS", default_value = "")]
    pub moonshot_api_keys: String,
    #[arg(long, env = "GROQ_API_KEYS", default_value = "")]
    pub groq_api_keys: String,
    #[arg(long, env = "OPENROUTER_API_KEYS", default_value = "")]
    pub openrouter_api_keys: String,

    /// JSON array of `{"access_key_id","secret_access_key","region"}`.
    #[arg(long, env = "AWS_BEDROCK_CREDENTIALS", default_value = "")]
    pub aws_bedrock_credentials: String,
    /// JSON array of `{"project_id","client_email","private_key","location"}`.
    #[arg(long, env = "GCP_VERTEX_CREDENTIALS", default_value = "")]
    pub gcp_vertex_credentials: String,

    /// `MAX_CONTEXT_TOKENS_<FAMILY>=<tokens>` hints forwarded verbatim to the
    /// out-of-scope transform layer (spec.md §6); collected from the process
    /// environment since clap can't enumerate an open-ended prefix family.
    #[arg(skip)]
    pub max_context_tokens: HashMap<String, u64>,
}

impl CliArgs {
    pub fn parse_with_env() -> Self {
        let mut args = Self::parse();
        args.max_context_tokens = read_max_context_tokens_env();
        args
    }

    pub fn allowed_model_families(&self) -> Vec<String> {
        parse_csv_env(&self.allowed_model_families)
    }
}

fn read_max_context_tokens_env() -> HashMap<String, u64> {
    const PREFIX: &str = "MAX_CONTEXT_TOKENS_";
    std::env::vars()
        .filter_map(|(key, value)| {
            let family = key.strip_prefix(PREFIX)?;
            let tokens: u64 = value.trim().parse().ok()?;
            Some((family.to_ascii_lowercase(), tokens))
        })
        .collect()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AwsBedrockCredentialConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct GcpVertexCredentialConfig {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    pub location: String,
}

pub fn parse_aws_bedrock_credentials(raw: &str) -> anyhow::Result<Vec<AwsBedrockCredentialConfig>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(raw)?)
}

pub fn parse_gcp_vertex_credentials(raw: &str) -> anyhow::Result<Vec<GcpVertexCredentialConfig>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aws_bedrock_json_array() {
        let raw = r#"[{"access_key_id":"AKIA","secret_access_key":"secret","region":"us-east-1"}]"#;
        let parsed = parse_aws_bedrock_credentials(raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].region, "us-east-1");
    }

    #[test]
    fn empty_credential_strings_parse_to_empty_vec() {
        assert!(parse_aws_bedrock_credentials("").unwrap().is_empty());
        assert!(parse_gcp_vertex_credentials("   ").unwrap().is_empty());
    }
}
