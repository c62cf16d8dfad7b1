//! Configuration loading and validation.
//!
//! The configuration is a YAML file found through a fixed search order:
//! the explicit `-c` path, then `/etc/sdeploy.conf`, then `./sdeploy.conf`.
//! A parsed [`Config`] is validated before it is ever published; invariants
//! that fail produce a single error naming the offending project and field.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdeployError};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_LOG_PATH: &str = "/var/log/sdeploy";
pub const DEFAULT_GIT_BRANCH: &str = "main";

/// Search order for config files when no explicit path is given.
pub const CONFIG_SEARCH_PATHS: &[&str] = &["/etc/sdeploy.conf", "./sdeploy.conf"];

/// Global email/SMTP configuration. Email is enabled only when every
/// field is present and non-empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmailConfig {
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default)]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_user: String,
    #[serde(default)]
    pub smtp_pass: String,
    #[serde(default)]
    pub email_sender: String,
}

impl EmailConfig {
    /// Returns true when all five fields are set. Any empty element
    /// disables email globally.
    pub fn is_complete(&self) -> bool {
        !self.smtp_host.is_empty()
            && self.smtp_port != 0
            && !self.smtp_user.is_empty()
            && !self.smtp_pass.is_empty()
            && !self.email_sender.is_empty()
    }
}

/// Configuration for a single project.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub webhook_path: String,
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default)]
    pub git_repo: String,
    #[serde(default)]
    pub local_path: String,
    #[serde(default)]
    pub execute_path: String,
    #[serde(default)]
    pub git_branch: String,
    #[serde(default)]
    pub execute_command: String,
    #[serde(default)]
    pub git_update: bool,
    #[serde(default)]
    pub git_ssh_key_path: String,
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub email_recipients: Vec<String>,
}

impl ProjectConfig {
    /// The working directory for the build command. Defaults to
    /// `local_path` when `execute_path` is empty.
    pub fn effective_execute_path(&self) -> &str {
        if self.execute_path.is_empty() {
            &self.local_path
        } else {
            &self.execute_path
        }
    }
}

/// The complete sdeploy configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listen_port: u16,
    #[serde(default)]
    pub log_path: String,
    #[serde(default)]
    pub email_config: Option<EmailConfig>,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

impl Config {
    /// Returns true when email notifications are globally enabled.
    pub fn email_enabled(&self) -> bool {
        self.email_config
            .as_ref()
            .map(EmailConfig::is_complete)
            .unwrap_or(false)
    }

    /// Finds the project whose webhook_path exactly matches the request path.
    pub fn project_for_path(&self, path: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.webhook_path == path)
    }
}

/// Loads and validates a configuration from the given file path, applying
/// defaults for the listen port, log directory, and git branch.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).map_err(|e| {
        SdeployError::Config(format!("failed to read config file '{}': {}", path.display(), e))
    })?;

    let mut cfg: Config = serde_yaml::from_str(&data)
        .map_err(|e| SdeployError::Config(format!("failed to parse config YAML: {}", e)))?;

    if cfg.listen_port == 0 {
        cfg.listen_port = DEFAULT_PORT;
    }
    if cfg.log_path.is_empty() {
        cfg.log_path = DEFAULT_LOG_PATH.to_string();
    }

    validate_config(&mut cfg)?;
    Ok(cfg)
}

/// Validates the configuration. Also fills per-project defaults that
/// depend on validation (the git branch).
pub fn validate_config(cfg: &mut Config) -> Result<()> {
    let mut seen_paths = std::collections::HashSet::new();

    for (i, project) in cfg.projects.iter_mut().enumerate() {
        let ordinal = i + 1;

        if project.webhook_path.is_empty() {
            return Err(SdeployError::Config(format!(
                "project {}: webhook_path is required",
                ordinal
            )));
        }
        if project.webhook_secret.is_empty() {
            return Err(SdeployError::Config(format!(
                "project {} ({}): webhook_secret is required",
                ordinal, project.name
            )));
        }
        if project.execute_command.is_empty() {
            return Err(SdeployError::Config(format!(
                "project {} ({}): execute_command is required",
                ordinal, project.name
            )));
        }
        if !seen_paths.insert(project.webhook_path.clone()) {
            return Err(SdeployError::Config(format!(
                "duplicate webhook_path: {}",
                project.webhook_path
            )));
        }

        if project.git_branch.is_empty() {
            project.git_branch = DEFAULT_GIT_BRANCH.to_string();
        }
        validate_git_branch(&project.git_branch).map_err(|e| {
            SdeployError::Config(format!("project {} ({}): {}", ordinal, project.name, e))
        })?;

        if !project.git_ssh_key_path.is_empty() {
            validate_ssh_key_path(&project.git_ssh_key_path).map_err(|e| {
                SdeployError::Config(format!("project {} ({}): {}", ordinal, project.name, e))
            })?;
        }
    }

    Ok(())
}

/// Validates that a git branch name is safe to pass to a subprocess.
/// Only letters, numbers, dash, underscore, slash, and dot are accepted.
pub fn validate_git_branch(branch: &str) -> std::result::Result<(), String> {
    if branch.is_empty() {
        return Err("git_branch cannot be empty".to_string());
    }
    for ch in branch.chars() {
        if !(ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '/' | '.')) {
            return Err(format!(
                "git_branch contains invalid character '{}': branch names must only contain letters, numbers, dash, underscore, slash, or dot",
                ch
            ));
        }
    }
    Ok(())
}

/// Validates that the SSH key file exists, is a regular file, and is readable.
pub fn validate_ssh_key_path(key_path: &str) -> std::result::Result<(), String> {
    let meta = match fs::metadata(key_path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(format!("git_ssh_key_path file does not exist: {}", key_path));
        }
        Err(e) => return Err(format!("git_ssh_key_path file error: {}", e)),
    };

    if meta.is_dir() {
        return Err(format!(
            "git_ssh_key_path must be a file, not a directory: {}",
            key_path
        ));
    }

    if let Err(e) = File::open(key_path) {
        return Err(format!("git_ssh_key_path file is not readable: {}", e));
    }

    Ok(())
}

/// Finds a config file based on the search order: explicit `-c` path first,
/// then the system-wide path, then the current directory.
pub fn find_config_file(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        let path = Path::new(path);
        if path.exists() {
            return Some(path.to_path_buf());
        }
        return None;
    }

    CONFIG_SEARCH_PATHS
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}
