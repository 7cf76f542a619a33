//! relay-chat — a real-time conversational relay that paces LLM-generated
//! "blocks" back to a connected client at realistic typing speeds, while
//! deciding in-flight whether a pending response is still relevant to what
//! the user just typed.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod channel;
mod config;
mod error;
mod llm;
mod orchestrator;
mod pacer;
mod profile;
mod session;
mod state;
mod timer;
mod transport;

use config::AppConfig;
use llm::{DisabledLlmClient, HttpLlmClient, LlmClient};
use profile::{HttpProfileProvider, NullProfileProvider, ProfileProvider};
use state::AppState;

#[derive(Parser)]
#[command(name = "relay-chat")]
#[command(about = "Conversation state machine and block-pacing relay")]
struct Args {
    /// Bind port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Bind host (overrides HOST)
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let mut config = AppConfig::from_env();
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }

    if let Some(message) = config.llm.validate() {
        tracing::warn!("{message}");
    }

    let llm: Arc<dyn LlmClient> = HttpLlmClient::new(&config.llm)
        .map(|client| Arc::new(client) as Arc<dyn LlmClient>)
        .unwrap_or_else(|| {
            tracing::warn!("no LLM client configured; AI flows will fail until LLM_API_KEY is set");
            Arc::new(DisabledLlmClient) as Arc<dyn LlmClient>
        });

    let profile: Arc<dyn ProfileProvider> = HttpProfileProvider::from_config(&config.profile)
        .map(|p| Arc::new(p) as Arc<dyn ProfileProvider>)
        .unwrap_or_else(|| {
            tracing::info!("no profile provider configured; regeneration will proceed without profile context");
            Arc::new(NullProfileProvider) as Arc<dyn ProfileProvider>
        });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid HOST/PORT combination")?;

    let state = AppState::new(config, llm, profile);
    let app = transport::build_router(state).into_make_service_with_connect_info::<SocketAddr>();

    tracing::info!(%addr, "relay-chat listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server loop exited")?;

    Ok(())
}
