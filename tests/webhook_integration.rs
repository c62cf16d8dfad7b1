//! End-to-end webhook admission tests driving the router directly.

use std::collections::HashSet;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use sdeploy::config::load_config;
use sdeploy::config_manager::ConfigManager;
use sdeploy::deploy::{ActiveBuilds, Deployer};
use sdeploy::logging::{LogBuffer, Logger};
use sdeploy::server::build_router;
use sdeploy::{AppState, SharedState};

fn sign(secret: &str, payload: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn make_state(dir: &TempDir, projects_yaml: &str) -> (SharedState, LogBuffer) {
    let config_path = dir.path().join("sdeploy.conf");
    let yaml = format!(
        "log_path: {}\nprojects:\n{}",
        dir.path().display(),
        projects_yaml
    );
    fs::write(&config_path, yaml).unwrap();
    let config = load_config(&config_path).unwrap();

    let buf: LogBuffer = Arc::new(Mutex::new(Vec::new()));
    let logger = Arc::new(Logger::with_writer(
        buf.clone(),
        dir.path().to_str(),
        false,
    ));
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

fn buffer_contents(buf: &LogBuffer) -> String {
    String::from_utf8(buf.lock().unwrap().clone()).unwrap()
}

async fn post(
    state: &SharedState,
    path_and_query: &str,
    body: &str,
    signature: Option<&str>,
) -> StatusCode {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(path_and_query)
        .header("Content-Type", "application/json");
    if let Some(sig) = signature {
        builder = builder.header("X-Hub-Signature-256", sig);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();

    let router = build_router(state.clone());
    router.oneshot(request).await.unwrap().status()
}

/// Build log artifacts in the log dir (main.log excluded).
fn build_logs(dir: &TempDir) -> Vec<String> {
    fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".log") && n != "main.log")
        .collect()
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

const TEST_PROJECT: &str = r#"  - name: testproject
    webhook_path: /hooks/test
    webhook_secret: mysecret
    git_branch: main
    execute_command: echo ok
"#;

#[tokio::test(flavor = "multi_thread")]
async fn hmac_happy_path_deploys() {
    let dir = TempDir::new().unwrap();
    let (state, buf) = make_state(&dir, TEST_PROJECT);

    let payload = r#"{"ref":"refs/heads/main"}"#;
    let status = post(
        &state,
        "/hooks/test",
        payload,
        Some(&sign("mysecret", payload)),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let done = wait_until(
        || build_logs(&dir).iter().any(|n| n.ends_with("-success.log")),
        Duration::from_secs(5),
    )
    .await;
    assert!(done, "no -success.log artifact appeared; logs: {:?}", build_logs(&dir));
    assert!(buffer_contents(&buf).contains("Deployment successful"));
}

#[tokio::test(flavor = "multi_thread")]
async fn branch_mismatch_accepted_but_not_deployed() {
    let dir = TempDir::new().unwrap();
    let (state, buf) = make_state(&dir, TEST_PROJECT);

    let payload = r#"{"ref":"refs/heads/develop"}"#;
    let status = post(
        &state,
        "/hooks/test",
        payload,
        Some(&sign("mysecret", payload)),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(build_logs(&dir).is_empty(), "no deployment should have run");
    assert!(buffer_contents(&buf).contains("Branch mismatch"));
}

#[tokio::test(flavor = "multi_thread")]
async fn tag_refs_and_missing_refs_never_deploy() {
    let dir = TempDir::new().unwrap();
    let (state, _) = make_state(&dir, TEST_PROJECT);

    for payload in [r#"{"ref":"refs/tags/v1.0.0"}"#, r#"{}"#] {
        let status = post(
            &state,
            "/hooks/test",
            payload,
            Some(&sign("mysecret", payload)),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED, "payload: {}", payload);
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(build_logs(&dir).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_posts_one_deploys_one_skips() {
    let dir = TempDir::new().unwrap();
    let (state, buf) = make_state(
        &dir,
        r#"  - name: busyproject
    webhook_path: /hooks/busy
    webhook_secret: mysecret
    git_branch: main
    execute_command: sleep 0.5
"#,
    );

    let payload = r#"{"ref":"refs/heads/main"}"#;
    let status = post(&state, "/hooks/busy?secret=mysecret", payload, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = post(&state, "/hooks/busy?secret=mysecret", payload, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let done = wait_until(
        || buffer_contents(&buf).contains("Deployment successful"),
        Duration::from_secs(5),
    )
    .await;
    assert!(done, "first deployment never completed");

    let logs = build_logs(&dir);
    assert_eq!(logs.len(), 1, "expected exactly one build log, got {:?}", logs);
    assert!(buffer_contents(&buf).contains("Skipped - deployment already in progress"));
}

#[tokio::test]
async fn wrong_method_is_405() {
    let dir = TempDir::new().unwrap();
    let (state, _) = make_state(&dir, TEST_PROJECT);

    let request = Request::builder()
        .method(Method::GET)
        .uri("/hooks/test")
        .body(Body::empty())
        .unwrap();
    let status = build_router(state.clone())
        .oneshot(request)
        .await
        .unwrap()
        .status();
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unknown_path_is_404() {
    let dir = TempDir::new().unwrap();
    let (state, _) = make_state(&dir, TEST_PROJECT);

    let status = post(&state, "/hooks/unknown", "{}", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bad_auth_is_401() {
    let dir = TempDir::new().unwrap();
    let (state, _) = make_state(&dir, TEST_PROJECT);
    let payload = r#"{"ref":"refs/heads/main"}"#;

    // No credentials at all.
    let status = post(&state, "/hooks/test", payload, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Wrong query secret.
    let status = post(&state, "/hooks/test?secret=wrong", payload, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Wrong signature.
    let status = post(&state, "/hooks/test", payload, Some("sha256=deadbeef")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Signature computed with the wrong secret.
    let status = post(
        &state,
        "/hooks/test",
        payload,
        Some(&sign("othersecret", payload)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn query_secret_fallback_authenticates() {
    let dir = TempDir::new().unwrap();
    let (state, _) = make_state(&dir, TEST_PROJECT);

    let payload = r#"{"ref":"refs/heads/develop"}"#;
    let status = post(&state, "/hooks/test?secret=mysecret", payload, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn invalid_json_is_400() {
    let dir = TempDir::new().unwrap();
    let (state, _) = make_state(&dir, TEST_PROJECT);

    let status = post(&state, "/hooks/test?secret=mysecret", "{invalid}", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn routing_distinguishes_projects() {
    let dir = TempDir::new().unwrap();
    let (state, _) = make_state(
        &dir,
        r#"  - name: Frontend
    webhook_path: /hooks/frontend
    webhook_secret: secret1
    git_branch: main
    execute_command: echo hello
  - name: Backend
    webhook_path: /hooks/backend
    webhook_secret: secret2
    git_branch: main
    execute_command: echo world
"#,
    );

    let payload = r#"{"ref":"refs/heads/main"}"#;
    let status = post(&state, "/hooks/frontend?secret=secret1", payload, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let status = post(&state, "/hooks/backend?secret=secret2", payload, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // Each project gets its own artifact.
    let done = wait_until(
        || {
            let prefixes: HashSet<String> = build_logs(&dir)
                .iter()
                .filter(|n| n.ends_with("-success.log"))
                .map(|n| n.split('-').next().unwrap_or("").to_string())
                .collect();
            prefixes.contains("Frontend") && prefixes.contains("Backend")
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(done, "expected both projects to deploy; logs: {:?}", build_logs(&dir));
}

#[tokio::test(flavor = "multi_thread")]
async fn trigger_labels_reach_the_service_log() {
    let dir = TempDir::new().unwrap();
    let (state, buf) = make_state(&dir, TEST_PROJECT);

    // triggered_by takes precedence.
    let payload = r#"{"ref":"refs/heads/main","triggered_by":"Jenkins"}"#;
    post(
        &state,
        "/hooks/test",
        payload,
        Some(&sign("mysecret", payload)),
    )
    .await;

    // Query-secret auth with no triggered_by is an internal trigger.
    let payload2 = r#"{"ref":"refs/heads/main"}"#;
    post(&state, "/hooks/test?secret=mysecret", payload2, None).await;

    let done = wait_until(
        || {
            let out = buffer_contents(&buf);
            out.contains("Received WEBHOOK (Jenkins) trigger")
                && out.contains("Received INTERNAL trigger")
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(done, "log output: {}", buffer_contents(&buf));
}
