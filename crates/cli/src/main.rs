mod commands;

use {
    clap::{Parser, Subcommand},
    tokio_util::sync::CancellationToken,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use parley_config::AppEnv;

#[derive(Parser)]
#[command(name = "parley", about = "Parley, a multi-node chat message plane")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable. Defaults to on when
    /// APP_ENV=production.
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a chat node: socket endpoint, delivery consumer, fan-out publisher.
    Node,
    /// Run the presence registry HTTP service.
    Presence,
    /// Run the persistence worker.
    Persistence,
    /// Run the sync/history HTTP service.
    History,
}

fn init_tracing(cli: &Cli, env: AppEnv) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs || env.is_production() {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli, AppEnv::from_env());

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            ctrl_c_cancel.cancel();
        }
    });

    match cli.command {
        Commands::Node => commands::node(cancel).await,
        Commands::Presence => commands::presence(cancel).await,
        Commands::Persistence => commands::persistence(cancel).await,
        Commands::History => commands::history(cancel).await,
    }
}
