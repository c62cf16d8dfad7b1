//! Atomic configuration snapshots with reload deferral.
//!
//! The active snapshot is published behind an `RwLock<Arc<Config>>`;
//! readers clone the `Arc` and keep that snapshot for as long as they
//! need it. Reload requests arriving while deployments are in flight are
//! remembered and applied exactly once when the active-build counter
//! returns to zero, always from the latest on-disk content.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::config::{load_config, Config};
use crate::deploy::ActiveBuilds;
use crate::logging::{LogSink, Logger};

pub struct ConfigManager {
    path: PathBuf,
    current: RwLock<Arc<Config>>,
    /// Pending-reload flag; the mutex also serializes reload application.
    pending: Mutex<bool>,
    active_builds: Arc<ActiveBuilds>,
    logger: Arc<Logger>,
}

impl ConfigManager {
    pub fn new(
        path: impl Into<PathBuf>,
        initial: Config,
        active_builds: Arc<ActiveBuilds>,
        logger: Arc<Logger>,
    ) -> Self {
        ConfigManager {
            path: path.into(),
            current: RwLock::new(Arc::new(initial)),
            pending: Mutex::new(false),
            active_builds,
            logger,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The currently published snapshot. Never observes partial state.
    pub fn current(&self) -> Arc<Config> {
        self.current.read().expect("config lock poisoned").clone()
    }

    /// Called by the file watcher on a content change. Applies the reload
    /// immediately when no build is running, otherwise marks it pending.
    /// Multiple requests before the drain completes collapse to one.
    pub fn request_reload(&self) {
        let mut pending = self.pending.lock().expect("reload lock poisoned");
        if !self.active_builds.is_idle() {
            if !*pending {
                self.logger.info(
                    None,
                    "Config change detected, reload deferred until active builds complete",
                );
            }
            *pending = true;
            return;
        }
        self.apply_reload();
    }

    /// Invoked when the active-build counter drops to zero. Runs a
    /// deferred reload at most once.
    pub fn process_pending_reload(&self) {
        let mut pending = self.pending.lock().expect("reload lock poisoned");
        if !*pending {
            return;
        }
        *pending = false;
        self.logger.info(None, "Applying deferred config reload");
        self.apply_reload();
    }

    /// Parses, validates, and publishes a new snapshot. A validation
    /// failure keeps the prior snapshot in place; the daemon never exits
    /// over a bad reload.
    fn apply_reload(&self) {
        match load_config(&self.path) {
            Ok(mut cfg) => {
                let old = self.current();

                // The listen port is frozen at startup.
                if cfg.listen_port != old.listen_port {
                    self.logger.warn(
                        None,
                        &format!(
                            "listen_port change ({} -> {}) ignored; restart to apply",
                            old.listen_port, cfg.listen_port
                        ),
                    );
                    cfg.listen_port = old.listen_port;
                }

                if cfg.log_path != old.log_path {
                    self.logger.reopen_if_changed(&cfg.log_path);
                }

                *self.current.write().expect("config lock poisoned") = Arc::new(cfg);
                self.logger.info(
                    None,
                    &format!("Configuration reloaded from {}", self.path.display()),
                );
            }
            Err(e) => {
                self.logger.error(
                    None,
                    &format!("Config reload failed, keeping previous configuration: {}", e),
                );
            }
        }
    }
}
