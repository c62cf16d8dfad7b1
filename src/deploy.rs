//! End-to-end execution of a single deployment.
//!
//! The deployer guarantees at most one running deployment per project,
//! keyed by `webhook_path`. A deployment walks through preflight checks,
//! source synchronization, change detection, command execution with
//! timeout and process-group kill, notification, and lock/counter
//! bookkeeping. The active-build counter gates deferred config reloads.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::config::ProjectConfig;
use crate::config_manager::ConfigManager;
use crate::error::{Result, SdeployError};
use crate::logging::{LogSink, Logger};
use crate::notify::{DeployNotification, Notifier};
use crate::preflight::{ensure_parent_dir_exists, run_preflight_checks};

/// Process-wide count of deployments currently holding a project lock.
/// The transition back to zero triggers any pending config reload.
#[derive(Default)]
pub struct ActiveBuilds(AtomicI32);

impl ActiveBuilds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement(&self) -> i32 {
        self.0.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn count(&self) -> i32 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.count() == 0
    }
}

/// The record of one deployment attempt.
#[derive(Debug, Clone)]
pub struct DeployResult {
    pub success: bool,
    pub skipped: bool,
    pub output: String,
    pub error: String,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
}

impl DeployResult {
    fn started_now() -> Self {
        let now = Local::now();
        DeployResult {
            success: false,
            skipped: false,
            output: String::new(),
            error: String::new(),
            start_time: now,
            end_time: now,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }
}

/// Whether a no-change pull should suppress the build for this trigger.
/// Push-style webhooks with nothing new have nothing to do; every other
/// origin (manual, scheduler, other CI systems) builds regardless.
pub fn should_skip_build_on_no_changes(trigger_source: &str) -> bool {
    matches!(
        trigger_source,
        "WEBHOOK" | "WEBHOOK (Github)" | "WEBHOOK (unknown)"
    )
}

fn truncate_sha(sha: &str) -> &str {
    if sha.len() < 8 {
        sha
    } else {
        &sha[..8]
    }
}

/// The SSH command injected into git subprocesses when a key is configured.
fn build_git_ssh_command(ssh_key_path: &str) -> String {
    format!(
        "ssh -i {} -o StrictHostKeyChecking=accept-new -o IdentitiesOnly=yes",
        ssh_key_path
    )
}

/// Executes deployments with per-project locking.
pub struct Deployer {
    logger: Arc<Logger>,
    notifier: Option<Arc<dyn Notifier>>,
    config_manager: OnceLock<Arc<ConfigManager>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    active_builds: Arc<ActiveBuilds>,
}

enum PipelineFlow {
    /// Command ran; output captured.
    Built(String),
    /// Pull found no changes and the trigger's policy suppresses the build.
    NoChanges,
}

impl Deployer {
    pub fn new(logger: Arc<Logger>, active_builds: Arc<ActiveBuilds>) -> Self {
        Deployer {
            logger,
            notifier: None,
            config_manager: OnceLock::new(),
            locks: Mutex::new(HashMap::new()),
            active_builds,
        }
    }

    pub fn set_notifier(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifier = Some(notifier);
    }

    /// Wires the config manager so the final build completion can apply a
    /// reload deferred while builds were running.
    pub fn set_config_manager(&self, cm: Arc<ConfigManager>) {
        let _ = self.config_manager.set(cm);
    }

    pub fn active_builds(&self) -> &ActiveBuilds {
        &self.active_builds
    }

    /// Gets or creates the lock for a project. Entries live for the
    /// process lifetime.
    fn project_lock(&self, webhook_path: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        locks
            .entry(webhook_path.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Runs one deployment for the project. Returns a `skipped` record
    /// without blocking when a deployment for the same project is already
    /// in flight.
    pub async fn deploy(
        &self,
        project: &ProjectConfig,
        trigger_source: &str,
        cancel: CancellationToken,
    ) -> DeployResult {
        let mut result = DeployResult::started_now();

        let lock = self.project_lock(&project.webhook_path);
        let guard = match lock.try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                result.skipped = true;
                result.end_time = Local::now();
                self.logger
                    .warn(Some(&project.name), "Skipped - deployment already in progress");
                return result;
            }
        };

        self.active_builds.increment();
        let build_logger = self.logger.build_logger(&project.name);

        self.logger.info(
            Some(&project.name),
            &format!("Starting deployment (trigger: {})", trigger_source),
        );
        build_logger.info(
            Some(&project.name),
            &format!("Starting deployment (trigger: {})", trigger_source),
        );
        log_build_config(project, &build_logger);

        let flow = self
            .run_pipeline(project, trigger_source, &build_logger, &cancel)
            .await;
        result.end_time = Local::now();

        match flow {
            Ok(PipelineFlow::Built(output)) => {
                result.success = true;
                result.output = output;
                log_command_output(&project.name, &result.output, false, &build_logger);
                build_logger.info(
                    Some(&project.name),
                    &format!(
                        "Deployment completed in {:.2}s",
                        result.duration().num_milliseconds() as f64 / 1000.0
                    ),
                );
            }
            Ok(PipelineFlow::NoChanges) => {
                result.skipped = true;
                build_logger.info(
                    Some(&project.name),
                    "Build ignored: no changes in the configured branch",
                );
            }
            Err(PipelineError { error, output }) => {
                result.error = error.to_string();
                result.output = output;
                build_logger.error(
                    Some(&project.name),
                    &format!("Deployment failed: {}", result.error),
                );
                log_command_output(&project.name, &result.output, true, &build_logger);
            }
        }

        if !result.skipped {
            self.send_notification(project, &result, trigger_source).await;
        }

        // Close triggers the pending -> terminal rename.
        let final_path = build_logger.close(result.success && !result.skipped);
        if !result.skipped {
            let log_ref = final_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<unavailable>".to_string());
            if result.success {
                self.logger.info(
                    Some(&project.name),
                    &format!("Deployment successful. Refer build log file: {}", log_ref),
                );
            } else {
                self.logger.error(
                    Some(&project.name),
                    &format!(
                        "Deployment error: {}. Refer build log file: {}",
                        result.error, log_ref
                    ),
                );
            }
        }

        drop(guard);
        if self.active_builds.decrement() == 0 {
            if let Some(cm) = self.config_manager.get() {
                cm.process_pending_reload();
            }
        }

        result
    }

    async fn run_pipeline(
        &self,
        project: &ProjectConfig,
        trigger_source: &str,
        build_logger: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> std::result::Result<PipelineFlow, PipelineError> {
        if let Err(e) = run_preflight_checks(project, build_logger) {
            build_logger.error(
                Some(&project.name),
                &format!("Preflight checks failed: {}", e),
            );
            return Err(PipelineError::bare(e));
        }

        let has_changes = if project.git_repo.is_empty() {
            build_logger.info(
                Some(&project.name),
                "No git_repo configured, treating local_path as local directory",
            );
            true
        } else {
            self.handle_git_operations(project, build_logger, cancel)
                .await
                .map_err(PipelineError::bare)?
        };

        if !has_changes {
            if should_skip_build_on_no_changes(trigger_source) {
                return Ok(PipelineFlow::NoChanges);
            }
            build_logger.info(
                Some(&project.name),
                &format!("No changes detected, building anyway (trigger: {})", trigger_source),
            );
        }

        self.execute_command(project, trigger_source, build_logger, cancel)
            .await
    }

    /// Clone-or-update source synchronization. Returns whether the working
    /// tree has changes worth building.
    async fn handle_git_operations(
        &self,
        project: &ProjectConfig,
        build_logger: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if !project.git_ssh_key_path.is_empty() {
            if let Err(e) = crate::config::validate_ssh_key_path(&project.git_ssh_key_path) {
                build_logger.error(
                    Some(&project.name),
                    &format!("SSH key validation failed: {}", e),
                );
                return Err(SdeployError::git(
                    "ssh key validation",
                    e,
                ));
            }
            build_logger.info(Some(&project.name), "Using SSH key for git operations");
        }

        if !is_git_repo(&project.local_path) {
            self.git_clone(project, build_logger, cancel).await.map_err(|e| {
                build_logger.error(Some(&project.name), &format!("Git clone failed: {}", e));
                e
            })?;
            build_logger.info(
                Some(&project.name),
                &format!("Cloned repository to {}", project.local_path),
            );

            // The clone used --branch, but verify anyway.
            self.ensure_correct_branch(project, build_logger, cancel)
                .await
                .map_err(|e| {
                    build_logger.error(
                        Some(&project.name),
                        &format!("Failed to checkout configured branch after clone: {}", e),
                    );
                    e
                })?;
            // A fresh clone always counts as new code.
            return Ok(true);
        }

        build_logger.info(
            Some(&project.name),
            &format!("Repository already cloned at {}", project.local_path),
        );

        self.ensure_correct_branch(project, build_logger, cancel)
            .await
            .map_err(|e| {
                build_logger.error(
                    Some(&project.name),
                    &format!("Failed to checkout configured branch: {}", e),
                );
                e
            })?;

        if !project.git_update {
            build_logger.info(
                Some(&project.name),
                "git_update is false, skipping git pull",
            );
            return Ok(true);
        }

        let before_sha = match current_commit_sha(&project.local_path).await {
            Ok(sha) => sha,
            Err(e) => {
                build_logger.warn(
                    Some(&project.name),
                    &format!("Failed to get commit SHA before pull: {}", e),
                );
                String::new()
            }
        };

        self.git_pull(project, build_logger, cancel).await.map_err(|e| {
            build_logger.error(Some(&project.name), &format!("Git pull failed: {}", e));
            e
        })?;
        build_logger.info(Some(&project.name), "Executed git pull");

        let after_sha = match current_commit_sha(&project.local_path).await {
            Ok(sha) => sha,
            Err(e) => {
                build_logger.warn(
                    Some(&project.name),
                    &format!("Failed to get commit SHA after pull: {}", e),
                );
                // Cannot tell; assume changes to be safe.
                return Ok(true);
            }
        };

        let has_changes = before_sha != after_sha;
        if has_changes {
            build_logger.info(
                Some(&project.name),
                &format!(
                    "Changes detected: {} -> {}",
                    truncate_sha(&before_sha),
                    truncate_sha(&after_sha)
                ),
            );
        } else {
            build_logger.info(
                Some(&project.name),
                &format!("No changes detected (commit: {})", truncate_sha(&after_sha)),
            );
        }
        Ok(has_changes)
    }

    /// Verifies the working tree is on the configured branch, checking it
    /// out when it is not. A stray `.git` that is not a valid repository
    /// logs a WARN and leaves the tree untouched.
    async fn ensure_correct_branch(
        &self,
        project: &ProjectConfig,
        build_logger: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !is_valid_git_repo(&project.local_path).await {
            build_logger.warn(
                Some(&project.name),
                "Directory has .git but is not a valid git repository, skipping branch checkout",
            );
            return Ok(());
        }

        let current = current_branch(&project.local_path)
            .await
            .map_err(|e| SdeployError::git("git rev-parse", format!("failed to get current branch: {}", e)))?;

        build_logger.info(
            Some(&project.name),
            &format!(
                "Current branch: {}, configured branch: {}",
                current, project.git_branch
            ),
        );

        if current == project.git_branch {
            build_logger.info(
                Some(&project.name),
                &format!("Already on correct branch: {}", current),
            );
            return Ok(());
        }

        build_logger.info(
            Some(&project.name),
            &format!("Checking out branch: {}", project.git_branch),
        );

        self.git_checkout(project, build_logger, cancel).await?;

        build_logger.info(
            Some(&project.name),
            &format!("Successfully checked out branch: {}", project.git_branch),
        );
        Ok(())
    }

    async fn git_clone(
        &self,
        project: &ProjectConfig,
        build_logger: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_parent_dir_exists(&project.local_path, build_logger, &project.name)
            .map_err(|e| SdeployError::git("git clone", format!("failed to create parent directory: {}", e)))?;

        build_logger.info(
            Some(&project.name),
            &format!(
                "Running: git clone --branch {} {} {}",
                project.git_branch, project.git_repo, project.local_path
            ),
        );

        let mut cmd = Command::new("git");
        cmd.args(["clone", "--branch", &project.git_branch])
            .arg(&project.git_repo)
            .arg(&project.local_path);
        apply_git_env(&mut cmd, project);

        self.run_git_command(cmd, "git clone", project, build_logger, cancel)
            .await
    }

    async fn git_checkout(
        &self,
        project: &ProjectConfig,
        build_logger: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        build_logger.info(
            Some(&project.name),
            &format!("Running: git checkout {}", project.git_branch),
        );

        let mut cmd = Command::new("git");
        cmd.args(["checkout", &project.git_branch]);
        cmd.current_dir(&project.local_path);
        apply_git_env(&mut cmd, project);

        self.run_git_command(cmd, "git checkout", project, build_logger, cancel)
            .await
    }

    async fn git_pull(
        &self,
        project: &ProjectConfig,
        build_logger: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        build_logger.info(Some(&project.name), "Running: git pull");
        build_logger.info(Some(&project.name), &format!("Path: {}", project.local_path));

        let mut cmd = Command::new("git");
        cmd.arg("pull");
        cmd.current_dir(&project.local_path);
        apply_git_env(&mut cmd, project);

        self.run_git_command(cmd, "git pull", project, build_logger, cancel)
            .await
    }

    /// Runs a prepared git command in its own process group, logging its
    /// combined output. Git operations have no per-command timeout but do
    /// honor shutdown cancellation.
    async fn run_git_command(
        &self,
        mut cmd: Command,
        operation: &str,
        project: &ProjectConfig,
        build_logger: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (stdout, stderr, end) = supervised_run(&mut cmd, None, cancel)
            .await
            .map_err(|e| SdeployError::git(operation, format!("failed to start: {}", e)))?;

        let output = combine_output(&stdout, &stderr);
        if !output.trim().is_empty() {
            build_logger.info(
                Some(&project.name),
                &format!("Output: {}", output.trim()),
            );
        }

        match end {
            CommandEnd::Exited(status) if status.success() => Ok(()),
            CommandEnd::Exited(status) => Err(SdeployError::git(
                operation,
                format!("exit status {}: {}", status.code().unwrap_or(-1), output.trim()),
            )),
            CommandEnd::Cancelled => Err(SdeployError::Cancelled),
            CommandEnd::TimedOut => unreachable!("git commands run without a timeout"),
        }
    }

    /// Runs the user-supplied build command through the shell with umask
    /// 0022, in its own process group, with the deployment environment
    /// injected. Returns captured output even on failure.
    async fn execute_command(
        &self,
        project: &ProjectConfig,
        trigger_source: &str,
        build_logger: &dyn LogSink,
        cancel: &CancellationToken,
    ) -> std::result::Result<PipelineFlow, PipelineError> {
        let execute_path = project.effective_execute_path().to_string();
        let shown_path = if execute_path.is_empty() {
            "."
        } else {
            execute_path.as_str()
        };

        build_logger.info(Some(&project.name), "Executing command:");
        build_logger.info(Some(&project.name), &format!("  Path: {}", shown_path));
        build_logger.info(
            Some(&project.name),
            &format!("  Command: {}", project.execute_command),
        );

        let mut cmd = Command::new(shell_path());
        cmd.arg("-c")
            .arg(format!("umask 0022 && {}", project.execute_command));
        if !execute_path.is_empty() {
            cmd.current_dir(&execute_path);
        }
        cmd.env("SDEPLOY_PROJECT_NAME", &project.name)
            .env("SDEPLOY_TRIGGER_SOURCE", trigger_source)
            .env("SDEPLOY_GIT_BRANCH", &project.git_branch);

        let timeout = if project.timeout_seconds > 0 {
            Some(Duration::from_secs(project.timeout_seconds))
        } else {
            None
        };

        let (stdout, stderr, end) = supervised_run(&mut cmd, timeout, cancel)
            .await
            .map_err(|e| PipelineError::bare(SdeployError::Execution(format!("failed to start command: {}", e))))?;

        let output = combine_output(&stdout, &stderr);

        match end {
            CommandEnd::Exited(status) if status.success() => Ok(PipelineFlow::Built(output)),
            CommandEnd::Exited(status) => Err(PipelineError {
                error: SdeployError::Execution(format!(
                    "command exited with status {}",
                    status.code().unwrap_or(-1)
                )),
                output,
            }),
            CommandEnd::TimedOut => Err(PipelineError {
                error: SdeployError::Timeout(project.timeout_seconds),
                output,
            }),
            CommandEnd::Cancelled => Err(PipelineError {
                error: SdeployError::Cancelled,
                output,
            }),
        }
    }

    /// Dispatches the notifier for terminal outcomes. Errors are logged
    /// and swallowed; notification can never fail a deployment.
    async fn send_notification(
        &self,
        project: &ProjectConfig,
        result: &DeployResult,
        trigger_source: &str,
    ) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if project.email_recipients.is_empty() {
            return;
        }

        let notification = DeployNotification::new(project, result, trigger_source);
        let notifier = Arc::clone(notifier);
        let logger = Arc::clone(&self.logger);
        let project_name = project.name.clone();

        let send = tokio::task::spawn_blocking(move || {
            if let Err(e) = notifier.notify(notification) {
                logger.error(
                    Some(&project_name),
                    &format!("Failed to send email notification: {}", e),
                );
            }
        });
        let _ = send.await;
    }
}

struct PipelineError {
    error: SdeployError,
    output: String,
}

impl PipelineError {
    fn bare(error: SdeployError) -> Self {
        PipelineError {
            error,
            output: String::new(),
        }
    }
}

fn log_build_config(project: &ProjectConfig, build_logger: &dyn LogSink) {
    // Never log the SSH key path itself.
    let ssh_key_status = if project.git_ssh_key_path.is_empty() {
        "none"
    } else {
        "configured"
    };
    build_logger.info(
        Some(&project.name),
        &format!(
            "Build config: name={}, local_path={}, git_repo={}, git_branch={}, git_update={}, git_ssh_key={}, execute_path={}, execute_command={}",
            project.name,
            project.local_path,
            project.git_repo,
            project.git_branch,
            project.git_update,
            ssh_key_status,
            project.execute_path,
            project.execute_command,
        ),
    );
}

fn log_command_output(project_name: &str, output: &str, is_error: bool, build_logger: &dyn LogSink) {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return;
    }
    if is_error {
        build_logger.error(Some(project_name), &format!("Command output: {}", trimmed));
    } else {
        build_logger.info(Some(project_name), &format!("Command output: {}", trimmed));
    }
}

/// Stdout first, then stderr, separated by a newline when both are present.
fn combine_output(stdout: &str, stderr: &str) -> String {
    let mut output = stdout.to_string();
    if !stderr.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(stderr);
    }
    output
}

/// Checks whether the path contains a `.git` directory. A `.git` file
/// (submodule pointer) does not count as a working tree.
pub fn is_git_repo(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    Path::new(path).join(".git").is_dir()
}

/// Checks repository validity with git itself; a stray `.git` directory
/// without a usable repository behind it fails this check.
pub async fn is_valid_git_repo(path: &str) -> bool {
    if !is_git_repo(path) {
        return false;
    }
    Command::new("git")
        .args(["rev-parse", "--git-dir"])
        .current_dir(path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

async fn git_query(path: &str, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(path)
        .output()
        .await
        .map_err(|e| SdeployError::git("git", e.to_string()))?;

    if !output.status.success() {
        return Err(SdeployError::git(
            "git",
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// The branch currently checked out at `path`.
pub async fn current_branch(path: &str) -> Result<String> {
    git_query(path, &["rev-parse", "--abbrev-ref", "HEAD"]).await
}

/// The commit SHA currently checked out at `path`.
pub async fn current_commit_sha(path: &str) -> Result<String> {
    git_query(path, &["rev-parse", "HEAD"]).await
}

fn apply_git_env(cmd: &mut Command, project: &ProjectConfig) {
    if !project.git_ssh_key_path.is_empty() {
        cmd.env(
            "GIT_SSH_COMMAND",
            build_git_ssh_command(&project.git_ssh_key_path),
        );
    }
}

fn shell_path() -> &'static str {
    "sh"
}

enum CommandEnd {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

/// Spawns the command in its own process group with captured output, waits
/// for exit, timeout, or cancellation, and kills the whole group (then
/// reaps the child) when the wait is cut short.
async fn supervised_run(
    cmd: &mut Command,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> std::io::Result<(String, String, CommandEnd)> {
    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn()?;

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let stdout_task = tokio::spawn(read_stream(stdout_handle));
    let stderr_task = tokio::spawn(read_stream(stderr_handle));

    let deadline = timeout.map(|d| std::time::Instant::now() + d);
    let end = loop {
        if cancel.is_cancelled() {
            kill_process_group(&mut child).await;
            break CommandEnd::Cancelled;
        }
        if let Some(deadline) = deadline {
            if std::time::Instant::now() >= deadline {
                kill_process_group(&mut child).await;
                break CommandEnd::TimedOut;
            }
        }
        match child.try_wait() {
            Ok(Some(status)) => break CommandEnd::Exited(status),
            Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
            Err(e) => return Err(e),
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    Ok((stdout, stderr, end))
}

async fn read_stream<R: tokio::io::AsyncRead + Unpin>(handle: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = handle {
        let _ = reader.read_to_end(&mut buf).await;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Kills the child's process group and waits for the reap so no zombies
/// are left behind before the failure is reported.
#[cfg(unix)]
async fn kill_process_group(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    let _ = child.wait().await;
}

#[cfg(not(unix))]
async fn kill_process_group(child: &mut Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}
