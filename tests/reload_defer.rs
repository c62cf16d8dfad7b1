//! Config reload deferral while a build is in flight (watcher-driven).

use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use sdeploy::config::load_config;
use sdeploy::config_manager::ConfigManager;
use sdeploy::deploy::{ActiveBuilds, Deployer};
use sdeploy::logging::{LogBuffer, Logger};
use sdeploy::server::build_router;
use sdeploy::watcher::spawn_config_watcher_with_interval;
use sdeploy::{AppState, SharedState};

fn config_yaml(dir: &TempDir, command: &str, extra_project: bool) -> String {
    let mut yaml = format!(
        r#"log_path: {}
projects:
  - name: deferproject
    webhook_path: /hooks/defer
    webhook_secret: s
    git_branch: main
    execute_command: {}
"#,
        dir.path().display(),
        command
    );
    if extra_project {
        yaml.push_str(
            r#"  - name: newproject
    webhook_path: /hooks/new
    webhook_secret: s
    git_branch: main
    execute_command: echo new
"#,
        );
    }
    yaml
}

fn make_state(dir: &TempDir, yaml: &str) -> (SharedState, LogBuffer) {
    let config_path = dir.path().join("sdeploy.conf");
    fs::write(&config_path, yaml).unwrap();
    let config = load_config(&config_path).unwrap();

    let buf: LogBuffer = Arc::new(Mutex::new(Vec::new()));
    let logger = Arc::new(Logger::with_writer(buf.clone(), dir.path().to_str(), false));
    let active_builds = Arc::new(ActiveBuilds::new());
    let deployer = Arc::new(Deployer::new(
        Arc::clone(&logger),
        Arc::clone(&active_builds),
    ));
    let config_manager = Arc::new(ConfigManager::new(
        config_path,
        config,
        active_builds,
        Arc::clone(&logger),
    ));
    deployer.set_config_manager(Arc::clone(&config_manager));

    let state = Arc::new(AppState {
        config: config_manager,
        deployer,
        logger,
        shutdown: CancellationToken::new(),
    });
    (state, buf)
}

async fn post(state: &SharedState, path_and_query: &str, body: &str) -> StatusCode {
    let request = Request::builder()
        .method(Method::POST)
        .uri(path_and_query)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    build_router(state.clone())
        .oneshot(request)
        .await
        .unwrap()
        .status()
}

fn buffer_contents(buf: &LogBuffer) -> String {
    String::from_utf8(buf.lock().unwrap().clone()).unwrap()
}

async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let started = std::time::Instant::now();
    while started.elapsed() < timeout {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cond()
}

#[tokio::test(flavor = "multi_thread")]
async fn reload_is_deferred_until_the_build_completes() {
    let dir = TempDir::new().unwrap();
    let (state, buf) = make_state(&dir, &config_yaml(&dir, "sleep 1", false));

    let watcher_shutdown = CancellationToken::new();
    let watcher = spawn_config_watcher_with_interval(
        Arc::clone(&state.config),
        watcher_shutdown.clone(),
        Duration::from_millis(25),
    );

    // Kick off a deployment that holds the project busy for ~1s.
    let payload = r#"{"ref":"refs/heads/main"}"#;
    let status = post(&state, "/hooks/defer?secret=s", payload).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let build_started = wait_until(
        || !state.deployer.active_builds().is_idle(),
        Duration::from_secs(2),
    )
    .await;
    assert!(build_started, "deployment never started");

    // Change the config (new command, plus a brand-new project) while the
    // build is running.
    fs::write(
        state.config.path(),
        config_yaml(&dir, "echo reloaded", true),
    )
    .unwrap();

    // Give the watcher time to notice; the reload must be deferred.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        state.config.current().projects[0].execute_command,
        "sleep 1",
        "snapshot must not change while the build is running"
    );
    assert!(buffer_contents(&buf).contains("reload deferred"));

    // A request during the build sees the old snapshot: the new project's
    // path does not exist yet.
    let status = post(&state, "/hooks/new?secret=s", payload).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // When the build finishes, the deferred reload is applied exactly once.
    let reloaded = wait_until(
        || state.config.current().projects[0].execute_command == "echo reloaded",
        Duration::from_secs(5),
    )
    .await;
    assert!(reloaded, "deferred reload never applied");

    // A request after the reload sees the new snapshot.
    let status = post(&state, "/hooks/new?secret=s", payload).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    watcher_shutdown.cancel();
    watcher.await.unwrap();
}
