use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use secrecy::SecretString;

use conductor_core::{ChatProvider, EventBus};
use conductor_engine::{RunnerConfig, SessionRegistry};
use conductor_llm::{openai, ChatCompletionsProvider, MockProvider, MockResponse, ReliableProvider};
use conductor_server::ServerConfig;

#[derive(Parser)]
#[command(name = "conductor", version, about = "Multi-project AI session orchestrator")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 7070)]
    port: u16,

    /// Directory that session working directories resolve under
    #[arg(long, default_value = ".")]
    workspace_root: PathBuf,

    /// Chat backend
    #[arg(long, value_enum, default_value_t = Provider::Openai)]
    provider: Provider,

    /// Model name passed through to the provider
    #[arg(long)]
    model: Option<String>,

    /// Override the provider's API base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Environment variable holding the API key
    #[arg(long, default_value = "OPENAI_API_KEY")]
    api_key_env: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Provider {
    Openai,
    Mock,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    std::env::set_current_dir(&args.workspace_root).with_context(|| {
        format!(
            "cannot enter workspace root {}",
            args.workspace_root.display()
        )
    })?;

    let provider = build_provider(&args)?;
    let bus = Arc::new(EventBus::new());
    let sessions = Arc::new(SessionRegistry::new(
        provider,
        Arc::clone(&bus),
        RunnerConfig::default(),
    ));

    let config = ServerConfig {
        port: args.port,
        ..Default::default()
    };
    let handle = conductor_server::start(config, Arc::clone(&sessions), bus)
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, "conductor ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    sessions.shutdown();
    Ok(())
}

fn init_tracing(log_json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,conductor=debug"));
    if log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_provider(args: &Args) -> anyhow::Result<Arc<dyn ChatProvider>> {
    match args.provider {
        Provider::Openai => {
            let api_key = std::env::var(&args.api_key_env)
                .with_context(|| format!("API key env var {} is not set", args.api_key_env))?;
            let base_url = args.base_url.as_deref().unwrap_or(openai::DEFAULT_BASE_URL);
            let inner = ChatCompletionsProvider::new(
                base_url,
                SecretString::from(api_key),
                args.model.as_deref(),
            );
            Ok(Arc::new(ReliableProvider::with_defaults(inner)))
        }
        Provider::Mock => {
            tracing::warn!("mock provider selected; replies are canned");
            // A finite stock of replies. Once exhausted, calls surface the
            // provider error into the conversation like any other failure.
            let responses = std::iter::repeat_with(|| {
                MockResponse::stream_text(
                    "Canned reply from the mock provider. Run with --provider openai for real completions.",
                )
            })
            .take(64)
            .collect();
            Ok(Arc::new(MockProvider::new(responses)))
        }
    }
}
