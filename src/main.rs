use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sdeploy::config::{find_config_file, load_config};
use sdeploy::config_manager::ConfigManager;
use sdeploy::deploy::{ActiveBuilds, Deployer};
use sdeploy::logging::{LogSink, Logger};
use sdeploy::notify::EmailNotifier;
use sdeploy::watcher::spawn_config_watcher;
use sdeploy::{server, AppState};

/// Webhook-driven deployment daemon.
#[derive(Debug, Parser)]
#[command(name = "sdeploy", version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(short = 'c', value_name = "PATH")]
    config: Option<String>,

    /// Run in background mode (service log not mirrored to stderr)
    #[arg(short = 'd')]
    daemon: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("sdeploy: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sdeploy=info")),
        )
        .init();

    let config_path = find_config_file(cli.config.as_deref())
        .context("no configuration file found (tried -c path, /etc/sdeploy.conf, ./sdeploy.conf)")?;
    let config = load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let logger = Arc::new(Logger::new(Some(&config.log_path), cli.daemon));
    logger.info(None, "sdeploy starting");
    info!(config = %config_path.display(), projects = config.projects.len(), "configuration loaded");

    let active_builds = Arc::new(ActiveBuilds::new());
    let listen_port = config.listen_port;
    let email_enabled = config.email_enabled();

    let config_manager = Arc::new(ConfigManager::new(
        config_path,
        config,
        Arc::clone(&active_builds),
        Arc::clone(&logger),
    ));

    let mut deployer = Deployer::new(Arc::clone(&logger), Arc::clone(&active_builds));
    // Always wired: whether email is enabled is a property of the current
    // snapshot, which a reload may change.
    deployer.set_notifier(Arc::new(EmailNotifier::new(Arc::clone(&config_manager))));
    if email_enabled {
        logger.info(None, "Email notifications enabled");
    }

    let deployer = Arc::new(deployer);
    deployer.set_config_manager(Arc::clone(&config_manager));

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        config: Arc::clone(&config_manager),
        deployer,
        logger: Arc::clone(&logger),
        shutdown: shutdown.clone(),
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", listen_port))
        .await
        .with_context(|| format!("failed to bind port {}", listen_port))?;
    logger.info(None, &format!("Listening on port {}", listen_port));

    let watcher = spawn_config_watcher(config_manager, shutdown.clone());

    let result = server::run(state, listener).await;

    shutdown.cancel();
    let _ = watcher.await;

    result.context("server error")
}
