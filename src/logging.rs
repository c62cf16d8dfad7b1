//! Dual-sink logging: a persistent service log plus one build log per
//! deployment.
//!
//! The service log is `main.log` under the log directory and captures
//! supervisor events, webhook admission outcomes, and deployment status
//! lines. Build logs carry the full narrative of a single deployment; they
//! are created with a `-pending.log` suffix and renamed to `-success.log`
//! or `-fail.log` when closed. Any failure to open a sink degrades to
//! stderr with a diagnostic, never aborting the daemon.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};

/// Log severities used by both sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

/// Capability shared by the service logger and build loggers so that
/// deployment code can target either polymorphically.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, project: Option<&str>, message: &str);

    fn info(&self, project: Option<&str>, message: &str) {
        self.log(Level::Info, project, message);
    }

    fn warn(&self, project: Option<&str>, message: &str) {
        self.log(Level::Warn, project, message);
    }

    fn error(&self, project: Option<&str>, message: &str) {
        self.log(Level::Error, project, message);
    }
}

/// Shared in-memory buffer used as a log destination in tests.
pub type LogBuffer = Arc<Mutex<Vec<u8>>>;

enum Target {
    /// Daemon mode: file only.
    File(File),
    /// Foreground mode: file, tee'd to stderr.
    FileAndStderr(File),
    /// Fallback when the file or directory cannot be opened.
    Stderr,
    /// Test injection.
    Buffer(LogBuffer),
}

impl Target {
    fn write_line(&mut self, line: &str) {
        match self {
            Target::File(f) => {
                let _ = f.write_all(line.as_bytes());
            }
            Target::FileAndStderr(f) => {
                let _ = f.write_all(line.as_bytes());
                eprint!("{}", line);
            }
            Target::Stderr => eprint!("{}", line),
            Target::Buffer(buf) => {
                if let Ok(mut guard) = buf.lock() {
                    guard.extend_from_slice(line.as_bytes());
                }
            }
        }
    }
}

struct LoggerInner {
    target: Target,
    log_path: PathBuf,
}

/// Thread-safe service logger. Service lines always go to
/// `{log_path}/main.log`; in foreground mode they are additionally
/// mirrored to stderr.
pub struct Logger {
    inner: Mutex<LoggerInner>,
    daemon_mode: bool,
}

impl Logger {
    pub fn new(log_path: Option<&str>, daemon_mode: bool) -> Self {
        let log_path = PathBuf::from(log_path.unwrap_or(crate::config::DEFAULT_LOG_PATH));
        let target = match open_service_log(&log_path) {
            Ok(file) => {
                if daemon_mode {
                    Target::File(file)
                } else {
                    Target::FileAndStderr(file)
                }
            }
            Err(()) => Target::Stderr,
        };

        Logger {
            inner: Mutex::new(LoggerInner { target, log_path }),
            daemon_mode,
        }
    }

    /// Test constructor: lines go to the given buffer. The log path is
    /// still recorded so build loggers land in a controllable directory.
    pub fn with_writer(buffer: LogBuffer, log_path: Option<&str>, daemon_mode: bool) -> Self {
        let log_path = PathBuf::from(log_path.unwrap_or(crate::config::DEFAULT_LOG_PATH));
        Logger {
            inner: Mutex::new(LoggerInner {
                target: Target::Buffer(buffer),
                log_path,
            }),
            daemon_mode,
        }
    }

    pub fn is_daemon_mode(&self) -> bool {
        self.daemon_mode
    }

    /// The directory build logs are written to.
    pub fn log_path(&self) -> PathBuf {
        self.inner.lock().expect("logger lock poisoned").log_path.clone()
    }

    /// Re-targets the service log when the configured log directory
    /// changes across a reload. A no-op for unchanged paths and for
    /// buffer-backed test loggers.
    pub fn reopen_if_changed(&self, new_dir: &str) {
        let mut inner = self.inner.lock().expect("logger lock poisoned");
        let new_path = PathBuf::from(new_dir);
        if inner.log_path == new_path {
            return;
        }
        if matches!(inner.target, Target::Buffer(_)) {
            inner.log_path = new_path;
            return;
        }
        match open_service_log(&new_path) {
            Ok(file) => {
                inner.target = if self.daemon_mode {
                    Target::File(file)
                } else {
                    Target::FileAndStderr(file)
                };
                inner.log_path = new_path;
            }
            Err(()) => {
                // Keep the previous sink; the failure was already reported.
            }
        }
    }

    /// Creates the build logger for one deployment. Build logs are always
    /// file-backed regardless of mode; failures fall back to stderr.
    pub fn build_logger(&self, project_name: &str) -> BuildLogger {
        BuildLogger::new(&self.log_path(), project_name)
    }

    /// Closes the underlying file, flushing buffered lines.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("logger lock poisoned");
        match &mut inner.target {
            Target::File(f) | Target::FileAndStderr(f) => {
                let _ = f.flush();
            }
            _ => {}
        }
        inner.target = Target::Stderr;
    }
}

impl LogSink for Logger {
    fn log(&self, level: Level, project: Option<&str>, message: &str) {
        let line = format_line(level, project, message);
        let mut inner = self.inner.lock().expect("logger lock poisoned");
        inner.target.write_line(&line);
    }
}

struct BuildInner {
    target: Target,
}

/// Per-deployment build logger. Owned by exactly one deployment; the
/// pending file is renamed to its terminal name on [`BuildLogger::close`].
pub struct BuildLogger {
    inner: Mutex<BuildInner>,
    log_dir: PathBuf,
    project_name: String,
    start_time: DateTime<Local>,
    pending_path: Option<PathBuf>,
}

impl BuildLogger {
    fn new(log_dir: &Path, project_name: &str) -> Self {
        let start_time = Local::now();

        if let Err(e) = fs::create_dir_all(log_dir) {
            report_log_file_error("create directory", log_dir, &e, "0755");
            return BuildLogger {
                inner: Mutex::new(BuildInner {
                    target: Target::Stderr,
                }),
                log_dir: log_dir.to_path_buf(),
                project_name: project_name.to_string(),
                start_time,
                pending_path: None,
            };
        }

        let sanitized = sanitize_project_name(project_name);
        let stamp = start_time.format("%Y-%m-%d-%H%M");
        let pending = log_dir.join(format!("{}-{}-pending.log", sanitized, stamp));

        let (target, pending_path) = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&pending)
        {
            Ok(file) => (Target::File(file), Some(pending)),
            Err(e) => {
                report_log_file_error("open/create file", &pending, &e, "0644");
                (Target::Stderr, None)
            }
        };

        BuildLogger {
            inner: Mutex::new(BuildInner { target }),
            log_dir: log_dir.to_path_buf(),
            project_name: project_name.to_string(),
            start_time,
            pending_path,
        }
    }

    /// Closes the build log and renames it to encode the outcome.
    /// Returns the final path when the rename succeeded.
    pub fn close(self, success: bool) -> Option<PathBuf> {
        {
            let mut inner = self.inner.lock().expect("build logger lock poisoned");
            if let Target::File(f) = &mut inner.target {
                let _ = f.flush();
            }
            inner.target = Target::Stderr;
        }

        let pending = self.pending_path?;
        let status = if success { "success" } else { "fail" };
        let sanitized = sanitize_project_name(&self.project_name);
        let stamp = self.start_time.format("%Y-%m-%d-%H%M");
        let final_path = self
            .log_dir
            .join(format!("{}-{}-{}.log", sanitized, stamp, status));

        match fs::rename(&pending, &final_path) {
            Ok(()) => Some(final_path),
            Err(e) => {
                eprintln!("[sdeploy] Failed to rename build log file: {}", e);
                None
            }
        }
    }
}

impl LogSink for BuildLogger {
    fn log(&self, level: Level, project: Option<&str>, message: &str) {
        let line = format_line(level, project, message);
        let mut inner = self.inner.lock().expect("build logger lock poisoned");
        inner.target.write_line(&line);
    }
}

fn format_line(level: Level, project: Option<&str>, message: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    match project {
        Some(p) if !p.is_empty() => {
            format!("[{}] [{}] [{}] {}\n", timestamp, level.as_str(), p, message)
        }
        _ => format!("[{}] [{}] {}\n", timestamp, level.as_str(), message),
    }
}

fn open_service_log(log_path: &Path) -> std::result::Result<File, ()> {
    if let Err(e) = fs::create_dir_all(log_path) {
        report_log_file_error("create directory", log_path, &e, "0755");
        return Err(());
    }

    let main_log = log_path.join("main.log");
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&main_log)
        .map_err(|e| {
            report_log_file_error("open/create file", &main_log, &e, "0644");
        })
}

/// Replaces path separators in project names with underscores so that
/// names like `domain.com/project` never create nested log directories.
pub fn sanitize_project_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

/// Writes a detailed diagnostic to stderr when a log sink cannot be
/// opened, naming the path, the attempted mode, and the probable cause.
fn report_log_file_error(operation: &str, path: &Path, err: &std::io::Error, perms: &str) {
    eprintln!("\n[sdeploy] Log file error: failed to {}", operation);
    eprintln!("  Path: {}", path.display());
    eprintln!("  Error: {}", err);
    eprintln!("  Attempted permissions: {}", perms);

    match err.kind() {
        std::io::ErrorKind::PermissionDenied => {
            eprintln!("  Cause: Permission denied");
            eprintln!("  Suggestions:");
            eprintln!("    - Run sdeploy as root or with sudo");
            if let Some(parent) = path.parent() {
                eprintln!("    - Change ownership: sudo chown $USER {}", parent.display());
                eprintln!("    - Change permissions: sudo chmod 755 {}", parent.display());
            }
        }
        std::io::ErrorKind::NotFound => {
            eprintln!("  Cause: Path does not exist");
            eprintln!("  Suggestions:");
            if let Some(parent) = path.parent() {
                eprintln!("    - Create directory: sudo mkdir -p {}", parent.display());
                eprintln!("    - Set permissions: sudo chmod 755 {}", parent.display());
            }
        }
        _ => {
            eprintln!("  Suggestions:");
            eprintln!("    - Verify the path is valid and accessible");
            eprintln!("    - Check disk space and filesystem status");
        }
    }

    eprintln!("  Fallback: Logging to console (stderr)\n");
}
