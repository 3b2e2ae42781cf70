//! tunnelgate - HTTP relay broker for services behind NAT
//!
//! Runs either the public broker or the reference agent that sits next to
//! the private service.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tunnelgate::{
    agent::{Agent, HttpUpstream},
    api::build_app,
    config::TunnelGateConfig,
    relay::Broker,
    rewrite::ContentRewriter,
};

#[derive(Parser)]
#[command(name = "tunnelgate")]
#[command(version)]
#[command(about = "HTTP relay broker for services behind NAT")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TUNNELGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "TUNNELGATE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the public broker
    Serve {
        /// Host to bind to
        #[arg(long, env = "TUNNELGATE_HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(long, env = "TUNNELGATE_PORT")]
        port: Option<u16>,
    },

    /// Run the reference agent next to the private service
    Agent {
        /// Public broker base URL
        #[arg(long, env = "TUNNELGATE_BROKER_URL")]
        broker: Option<String>,

        /// Private service base URL
        #[arg(long, env = "TUNNELGATE_TARGET_URL")]
        target: Option<String>,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tunnelgate={},tower_http=debug", log_level).into()),
        )
        .with(cli.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!cli.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    // Load configuration
    let config = match cli.config {
        Some(path) => TunnelGateConfig::from_file(&path)?,
        None => TunnelGateConfig::default(),
    };

    match cli.command {
        Commands::Serve { host, port } => {
            run_broker(config, host, port).await?;
        }
        Commands::Agent { broker, target } => {
            run_agent(config, broker, target).await?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

async fn run_broker(
    mut config: TunnelGateConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let broker = Arc::new(Broker::new(config.relay.clone()));
    let rewriter = Arc::new(ContentRewriter::new()?);
    let app = build_app(broker, rewriter, &config);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        address = %addr,
        deadline_ms = config.relay.deadline().as_millis() as u64,
        "tunnelgate broker listening. Press Ctrl+C to stop."
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down...");
        })
        .await?;

    Ok(())
}

async fn run_agent(
    mut config: TunnelGateConfig,
    broker: Option<String>,
    target: Option<String>,
) -> Result<()> {
    if let Some(broker) = broker {
        config.agent.broker_url = broker;
    }
    if let Some(target) = target {
        config.agent.target_url = target;
    }

    let upstream = HttpUpstream::new(
        config.agent.target_url.clone(),
        Duration::from_secs(config.agent.request_timeout_secs),
    )?;
    tracing::info!(
        broker = %config.agent.broker_url,
        target = %upstream.target_url(),
        max_concurrent = config.agent.max_concurrent,
        "Starting tunnelgate agent"
    );
    let agent = Agent::new(&config.agent, Arc::new(upstream))?;

    tokio::select! {
        _ = agent.run() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Shutting down...");
        }
    }

    Ok(())
}

fn show_config(config: Option<&TunnelGateConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    println!("{}", config.to_toml()?);
    Ok(())
}
