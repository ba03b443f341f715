mod bootstrap;
mod config;
mod handoff;
mod http;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use config::CliArgs;
use handoff::NoopHandoff;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = CliArgs::parse_with_env();
    let boot = bootstrap::bootstrap(&args).await?;

    let state = http::AppState {
        pool: boot.pool,
        handoff: Arc::new(NoopHandoff),
        allowed_model_families: boot.allowed_model_families,
    };
    let app = http::router(state);

    let bind = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "keyproxy listening");
    axum::serve(listener, app).await?;
    Ok(())
}
