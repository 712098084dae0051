use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sa_gateway::api;
use sa_gateway::bootstrap::bootstrap;
use sa_gateway::cli::{doctor, load_config, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            init_tracing();
            let config = Arc::new(load_config(&cli.config)?);
            run_server(config).await
        }
        Command::Doctor => {
            init_tracing();
            let config = load_config(&cli.config)?;
            if !doctor(&config) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Version => {
            println!("serialagent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sa_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<sa_domain::config::Config>) -> anyhow::Result<()> {
    tracing::info!("serialagent starting");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = bootstrap(config).await?;
    state.scheduler.start();

    let app = api::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "serialagent listening");

    axum::serve(listener, app).await?;

    state.scheduler.stop().await;
    Ok(())
}
