//! Interactive multi-agent handoff chat.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tower::ServiceBuilder;
use tracing_subscriber::EnvFilter;

use tower_handoff::resilience::Backoff;
use tower_handoff::{
    default_registry, provider, repl, OpenAIProvider, Orchestrator, RetryLayer, RetryPolicy,
    RouterConfig, RoutingStrategy, Settings, TransientErrors,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    /// Structured-output routing decision
    Structured,
    /// Router invokes transfer_to_<agent> tools
    Tools,
}

impl From<Strategy> for RoutingStrategy {
    fn from(s: Strategy) -> Self {
        match s {
            Strategy::Structured => RoutingStrategy::Structured,
            Strategy::Tools => RoutingStrategy::ToolHandoff,
        }
    }
}

/// Route a conversation between support, research and manager agents.
#[derive(Parser, Debug)]
#[command(name = "handoff-chat", about = "Multi-agent handoff chat")]
struct Args {
    /// Routing strategy.
    #[arg(long, value_enum, default_value = "structured")]
    strategy: Strategy,

    /// Conversation thread id.
    #[arg(long, default_value = "conversation-1")]
    thread_id: String,

    /// Ceiling on agent transitions per user turn.
    #[arg(long)]
    max_transitions: Option<usize>,

    /// Timeout for each generation call, in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Retries for transient generation failures.
    #[arg(long, default_value_t = 0)]
    retries: usize,

    /// Consult the router again after each agent reply.
    #[arg(long)]
    reroute_after_reply: bool,

    /// Environment file to load before reading settings.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::from_env_file(args.env_file.as_deref())?;
    tracing::info!("Using model {} at {}", settings.model, settings.base_url);

    let mut config = RouterConfig::for_strategy(args.strategy.into());
    if let Some(n) = args.max_transitions {
        config.max_transitions = n;
    }
    if let Some(secs) = args.timeout_secs {
        config.request_timeout = Duration::from_secs(secs);
    }
    config.reroute_after_reply = args.reroute_after_reply;

    let retry = RetryPolicy {
        max_retries: args.retries,
        backoff: Backoff::exponential(Duration::from_millis(500), 2.0, Duration::from_secs(8)),
    };
    let service = provider::boxed(
        ServiceBuilder::new()
            .layer(RetryLayer::new(retry, TransientErrors))
            .service(OpenAIProvider::from_settings(&settings)),
    );

    let orchestrator = Orchestrator::from_config(config, service, Arc::new(default_registry()))?;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    repl::run_repl(&orchestrator, &args.thread_id, stdin, tokio::io::stdout()).await?;
    Ok(())
}
