pub mod config;
pub mod config_manager;
pub mod deploy;
pub mod error;
pub mod logging;
pub mod notify;
pub mod preflight;
pub mod server;
pub mod watcher;
pub mod webhook;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config_manager::ConfigManager;
use crate::deploy::Deployer;
use crate::logging::Logger;

/// Shared state handed to every request handler.
pub struct AppState {
    pub config: Arc<ConfigManager>,
    pub deployer: Arc<Deployer>,
    pub logger: Arc<Logger>,
    /// Cancelled on shutdown; deployments derive child tokens from it.
    pub shutdown: CancellationToken,
}

pub type SharedState = Arc<AppState>;
