//! Webhook admission: translate an HTTP request into a deployment.
//!
//! Projects are routed by exact match of the request path against the
//! configured `webhook_path` set, so the handler is installed as the
//! router fallback rather than as fixed routes. Requests authenticate
//! with an `X-Hub-Signature-256` HMAC over the raw body, falling back to
//! a `secret` query parameter; both comparisons are constant-time.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Query, State as AxumState},
    http::{HeaderMap, Method, StatusCode, Uri},
};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::config::ProjectConfig;
use crate::logging::LogSink;
use crate::SharedState;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthMode {
    Hmac,
    QuerySecret,
}

/// Handles any request that reaches the daemon. Returns quickly: the
/// deployment itself runs in a background task.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if method != Method::POST {
        return (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n");
    }

    let snapshot = state.config.current();
    let Some(project) = snapshot.project_for_path(uri.path()) else {
        debug!(path = %uri.path(), "no project configured for webhook path");
        return (StatusCode::NOT_FOUND, "Unknown webhook path\n");
    };

    let Some(auth_mode) = authenticate(&headers, &params, &project.webhook_secret, &body) else {
        state.logger.info(
            Some(&project.name),
            "Webhook authentication failed",
        );
        return (StatusCode::UNAUTHORIZED, "Unauthorized\n");
    };

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            state.logger.warn(
                Some(&project.name),
                &format!("Could not parse webhook payload: {}", e),
            );
            return (StatusCode::BAD_REQUEST, "Invalid payload\n");
        }
    };

    match extract_branch_from_payload(&payload) {
        Some(branch) if branch == project.git_branch => {}
        Some(branch) => {
            state.logger.info(
                Some(&project.name),
                &format!(
                    "Branch mismatch: push to '{}' does not match configured branch '{}', skipping deployment",
                    branch, project.git_branch
                ),
            );
            return (StatusCode::ACCEPTED, "Accepted\n");
        }
        None => {
            state.logger.info(
                Some(&project.name),
                "No branch in webhook payload, skipping deployment",
            );
            return (StatusCode::ACCEPTED, "Accepted\n");
        }
    }

    let trigger_source = classify_trigger(&payload, auth_mode);
    state.logger.info(
        Some(&project.name),
        &format!("Received {} trigger", trigger_source),
    );

    dispatch_deployment(&state, project.clone(), trigger_source);
    (StatusCode::ACCEPTED, "Accepted\n")
}

/// Launches the deployment in the background; the handler never awaits
/// completion.
fn dispatch_deployment(state: &SharedState, project: ProjectConfig, trigger_source: String) {
    let deployer = state.deployer.clone();
    let cancel = state.shutdown.child_token();
    tokio::spawn(async move {
        deployer.deploy(&project, &trigger_source, cancel).await;
    });
}

/// Tries header HMAC first, then the `secret` query parameter. An absent
/// or malformed signature header falls through to the query check; a
/// well-formed but wrong signature does not.
fn authenticate(
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    secret: &str,
    body: &[u8],
) -> Option<AuthMode> {
    if let Some(signature) = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok())
    {
        if signature.starts_with("sha256=") {
            if validate_hmac(body, signature, secret) {
                return Some(AuthMode::Hmac);
            }
            return None;
        }
    }

    if let Some(candidate) = params.get("secret") {
        if constant_time_str_eq(candidate, secret) {
            return Some(AuthMode::QuerySecret);
        }
    }

    None
}

/// Verifies `sha256=<hex>` against HMAC-SHA256(secret, payload). The
/// comparison inside `verify_slice` is constant-time.
pub fn validate_hmac(payload: &[u8], signature_header: &str, secret: &str) -> bool {
    let Some(signature_hex) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

/// Constant-time string equality that does not leak the secret length:
/// both sides are hashed before the comparison.
fn constant_time_str_eq(a: &str, b: &str) -> bool {
    let digest_a = Sha256::digest(a.as_bytes());
    let digest_b = Sha256::digest(b.as_bytes());
    digest_a.ct_eq(&digest_b).into()
}

/// Extracts the branch from a `refs/heads/<branch>` ref. Tag refs and
/// missing or empty refs yield `None`.
pub fn extract_branch_from_payload(payload: &Value) -> Option<String> {
    let reference = payload.get("ref")?.as_str()?;
    let branch = reference.strip_prefix("refs/heads/")?;
    if branch.is_empty() {
        None
    } else {
        Some(branch.to_string())
    }
}

/// Builds the trigger-origin label used for logging and the no-change
/// skip policy.
fn classify_trigger(payload: &Value, auth_mode: AuthMode) -> String {
    if let Some(triggered_by) = payload.get("triggered_by").and_then(|v| v.as_str()) {
        if !triggered_by.is_empty() {
            return format!("WEBHOOK ({})", triggered_by);
        }
    }

    match auth_mode {
        AuthMode::Hmac => format!("WEBHOOK ({})", sender_source(payload)),
        AuthMode::QuerySecret => "INTERNAL".to_string(),
    }
}

/// Classifies the payload sender: GitHub push payloads carry a
/// `sender.url` under the GitHub users API.
fn sender_source(payload: &Value) -> &'static str {
    let url = payload
        .get("sender")
        .and_then(|s| s.get("url"))
        .and_then(|u| u.as_str())
        .unwrap_or("");
    if url.starts_with("https://api.github.com/users/") {
        "Github"
    } else {
        "unknown"
    }
}
