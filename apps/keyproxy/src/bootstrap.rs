use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;

use keyproxy_checker::SchedulerConfig;
use keyproxy_common::parse_csv_env;
use keyproxy_core::credential::{AnthropicCredential, ApiKeyCredential, AwsBedrockCredential, GcpVertexCredential, GoogleAiCredential, OpenAiCredential};
use keyproxy_core::events::{EventHub, TerminalEventSink};
use keyproxy_core::provider::CredentialProvider;
use keyproxy_core::service::Service;
use keyproxy_pool::KeyPool;
use keyproxy_providers::{
    AnthropicHealthProbe, AnthropicProvider, AwsBedrockHealthProbe, AwsBedrockProvider, GcpVertexHealthProbe,
    GcpVertexProvider, GoogleAiHealthProbe, GoogleAiProvider, OpenAiHealthProbe, OpenAiProvider,
    SimpleApiKeyProvider, SimpleHealthProbe,
};

use crate::config::{CliArgs, parse_aws_bedrock_credentials, parse_gcp_vertex_credentials};

const MIN_PROBE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3);
const FULL_CYCLE: std::time::Duration = std::time::Duration::from_secs(8 * 3600);
const MAX_SERVER_ERROR_RETRIES: u32 = 2;

/// Everything a running instance owns — no global singletons (spec.md §5
/// design note, followed the way `gproxy-core::bootstrap::Bootstrap` hands
/// back one owned struct rather than populating statics).
pub struct Bootstrap {
    pub pool: Arc<KeyPool>,
    pub events: EventHub,
    pub allowed_model_families: Vec<String>,
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Bootstrap {
    /// Aborts every background task this instance spawned (checkers, Dispatch
    /// Queue poll loops, recheck cron). Intended for graceful shutdown and
    /// for tests that don't want leaked tasks outliving the assertions.
    pub fn shutdown(&self) {
        for task in &self.background_tasks {
            task.abort();
        }
    }
}

pub async fn bootstrap(args: &CliArgs) -> anyhow::Result<Bootstrap> {
    let events = EventHub::new(1024);
    events.add_sink(Arc::new(TerminalEventSink::default())).await;

    let http_client = reqwest::Client::new();
    let mut providers: HashMap<Service, Arc<dyn CredentialProvider>> = HashMap::new();
    let mut background_tasks = Vec::new();

    let checker_config = SchedulerConfig::new(MIN_PROBE_INTERVAL, FULL_CYCLE);

    macro_rules! wire_full_provider {
        ($service:expr, $provider_ty:ident, $probe_ty:ident, $keys:expr, $ctor:expr) => {{
            let credentials: Vec<_> = parse_csv_env(&$keys).into_iter().map($ctor).collect();
            if !credentials.is_empty() {
                let provider = Arc::new($provider_ty::new(events.clone(), credentials));
                if args.check_keys {
                    let probe = $probe_ty::new(http_client.clone());
                    background_tasks.push(Arc::clone(&provider).spawn_checker(probe, checker_config, MAX_SERVER_ERROR_RETRIES));
                }
                providers.insert($service, provider as Arc<dyn CredentialProvider>);
            }
        }};
    }

    wire_full_provider!(Service::OpenAI, OpenAiProvider, OpenAiHealthProbe, args.openai_api_keys, |k| {
        OpenAiCredential::new(k, None)
    });
    wire_full_provider!(
        Service::Anthropic,
        AnthropicProvider,
        AnthropicHealthProbe,
        args.anthropic_api_keys,
        AnthropicCredential::new
    );
    wire_full_provider!(
        Service::GoogleAI,
        GoogleAiProvider,
        GoogleAiHealthProbe,
        args.google_ai_api_keys,
        GoogleAiCredential::new
    );

    let bedrock_credentials = parse_aws_bedrock_credentials(&args.aws_bedrock_credentials).context("AWS_BEDROCK_CREDENTIALS")?;
    if !bedrock_credentials.is_empty() {
        let credentials: Vec<AwsBedrockCredential> = bedrock_credentials
            .into_iter()
            .map(|c| AwsBedrockCredential::new(c.access_key_id, c.secret_access_key, c.region))
            .collect();
        let provider = Arc::new(AwsBedrockProvider::new(events.clone(), credentials));
        if args.check_keys {
            let probe = AwsBedrockHealthProbe::new(http_client.clone());
            background_tasks.push(Arc::clone(&provider).spawn_checker(probe, checker_config, MAX_SERVER_ERROR_RETRIES));
        }
        providers.insert(Service::AwsBedrock, provider as Arc<dyn CredentialProvider>);
    }

    let vertex_credentials = parse_gcp_vertex_credentials(&args.gcp_vertex_credentials).context("GCP_VERTEX_CREDENTIALS")?;
    if !vertex_credentials.is_empty() {
        let credentials: Vec<GcpVertexCredential> = vertex_credentials
            .into_iter()
            .map(|c| GcpVertexCredential::new(c.project_id, c.client_email, c.private_key, c.location))
            .collect();
        let provider = Arc::new(GcpVertexProvider::new(events.clone(), credentials));
        if args.check_keys {
            let probe = GcpVertexHealthProbe::new(http_client.clone());
            background_tasks.push(Arc::clone(&provider).spawn_checker(probe, checker_config, MAX_SERVER_ERROR_RETRIES));
        }
        providers.insert(Service::GcpVertex, provider as Arc<dyn CredentialProvider>);
    }

    for (service, keys, builder, known_families) in simple_provider_table(args) {
        let credentials: Vec<ApiKeyCredential> =
            parse_csv_env(keys).into_iter().map(|key| ApiKeyCredential::new(service, key)).collect();
        if credentials.is_empty() {
            continue;
        }
        let provider = Arc::new(SimpleApiKeyProvider::new(service, events.clone(), credentials));
        if args.check_keys {
            let probe = SimpleHealthProbe::new(http_client.clone(), builder, known_families);
            background_tasks.push(Arc::clone(&provider).spawn_checker(probe, checker_config, MAX_SERVER_ERROR_RETRIES));
        }
        providers.insert(service, provider as Arc<dyn CredentialProvider>);
    }

    let pool = KeyPool::new(providers, events.clone());
    background_tasks.extend(pool.spawn_queues());

    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    background_tasks.extend(keyproxy_pool::spawn_recheck_cron(Arc::clone(&pool), &hostname));

    Ok(Bootstrap {
        pool,
        events,
        allowed_model_families: args.allowed_model_families(),
        background_tasks,
    })
}

fn simple_provider_table(args: &CliArgs) -> Vec<(Service, &str, keyproxy_providers::providers::simple::ProbeRequestBuilder, &'static [&'static str])> {
    use keyproxy_providers::providers::simple::*;
    vec![
        (Service::AzureOpenAI, args.azure_openai_api_keys.as_str(), azure_probe_builder, AZURE_OPENAI_MODEL_FAMILIES),
        (Service::Mistral, args.mistral_api_keys.as_str(), mistral_probe_builder, MISTRAL_MODEL_FAMILIES),
        (Service::Deepseek, args.deepseek_api_keys.as_str(), deepseek_probe_builder, DEEPSEEK_MODEL_FAMILIES),
        (Service::XAI, args.xai_api_keys.as_str(), xai_probe_builder, XAI_MODEL_FAMILIES),
        (Service::Cohere, args.cohere_api_keys.as_str(), cohere_probe_builder, COHERE_MODEL_FAMILIES),
        (Service::Qwen, args.qwen_api_keys.as_str(), qwen_probe_builder, QWEN_MODEL_FAMILIES),
        (Service::Glm, args.glm_api_keys.as_str(), glm_probe_builder, GLM_MODEL_FAMILIES),
        (Service::Moonshot, args.moonshot_api_keys.as_str(), moonshot_probe_builder, MOONSHOT_MODEL_FAMILIES),
        (Service::Groq, args.groq_api_keys.as_str(), groq_probe_builder, GROQ_MODEL_FAMILIES),
        (Service::OpenRouter, args.openrouter_api_keys.as_str(), openrouter_probe_builder, OPENROUTER_MODEL_FAMILIES),
    ]
}
