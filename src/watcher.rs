//! Config file watcher.
//!
//! A polling watcher: each tick hashes the config file and requests a
//! reload when the digest changes. Hashing the content makes the watcher
//! agnostic to how editors save (write-in-place vs rename) and keeps an
//! unchanged rewrite from producing a visible reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config_manager::ConfigManager;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

type Fingerprint = [u8; 32];

fn fingerprint(path: &Path) -> Option<Fingerprint> {
    // A read failure usually means the file is mid-rename; skip the tick.
    let contents = std::fs::read(path).ok()?;
    Some(Sha256::digest(&contents).into())
}

/// Spawns the watcher task. It polls until the shutdown token fires.
pub fn spawn_config_watcher(
    config_manager: Arc<ConfigManager>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    spawn_config_watcher_with_interval(config_manager, shutdown, DEFAULT_POLL_INTERVAL)
}

pub fn spawn_config_watcher_with_interval(
    config_manager: Arc<ConfigManager>,
    shutdown: CancellationToken,
    poll_interval: Duration,
) -> JoinHandle<()> {
    let path: PathBuf = config_manager.path().to_path_buf();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut last = fingerprint(&path);
        if last.is_none() {
            warn!(path = %path.display(), "config file unreadable at watcher start");
        }

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.cancelled() => {
                    debug!("config watcher stopping");
                    return;
                }
            }

            let Some(current) = fingerprint(&path) else {
                continue;
            };

            if last.as_ref() != Some(&current) {
                debug!(path = %path.display(), "config file changed on disk");
                // Content changes and rename-style saves both land here.
                if last.is_some() {
                    config_manager.request_reload();
                }
                last = Some(current);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config;
    use crate::deploy::ActiveBuilds;
    use crate::logging::Logger;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn yaml(command: &str) -> String {
        format!(
            r#"
projects:
  - name: Watched
    webhook_path: /hooks/watched
    webhook_secret: s
    execute_command: {}
"#,
            command
        )
    }

    fn manager(dir: &TempDir) -> Arc<ConfigManager> {
        let path = dir.path().join("sdeploy.conf");
        fs::write(&path, yaml("echo one")).unwrap();
        let initial = load_config(&path).unwrap();
        let buf = Arc::new(Mutex::new(Vec::new()));
        let logger = Arc::new(Logger::with_writer(buf, dir.path().to_str(), false));
        Arc::new(ConfigManager::new(
            path,
            initial,
            Arc::new(ActiveBuilds::new()),
            logger,
        ))
    }

    #[tokio::test]
    async fn content_change_triggers_reload() {
        let dir = TempDir::new().unwrap();
        let cm = manager(&dir);
        let shutdown = CancellationToken::new();
        let handle = spawn_config_watcher_with_interval(
            cm.clone(),
            shutdown.clone(),
            Duration::from_millis(25),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        fs::write(cm.path(), yaml("echo two")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(cm.current().projects[0].execute_command, "echo two");
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn rename_style_save_triggers_reload() {
        let dir = TempDir::new().unwrap();
        let cm = manager(&dir);
        let shutdown = CancellationToken::new();
        let handle = spawn_config_watcher_with_interval(
            cm.clone(),
            shutdown.clone(),
            Duration::from_millis(25),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        // Editors that save via a temp file replace the watched path.
        let staged = dir.path().join("sdeploy.conf.tmp");
        fs::write(&staged, yaml("echo renamed")).unwrap();
        fs::rename(&staged, cm.path()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(cm.current().projects[0].execute_command, "echo renamed");
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unchanged_rewrite_is_not_a_reload() {
        let dir = TempDir::new().unwrap();
        let cm = manager(&dir);
        let before = cm.current();

        let shutdown = CancellationToken::new();
        let handle = spawn_config_watcher_with_interval(
            cm.clone(),
            shutdown.clone(),
            Duration::from_millis(25),
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        // Rewrite identical content; the digest is unchanged.
        fs::write(cm.path(), yaml("echo one")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Same Arc is still published (no swap happened).
        assert!(Arc::ptr_eq(&before, &cm.current()));
        shutdown.cancel();
        handle.await.unwrap();
    }
}
