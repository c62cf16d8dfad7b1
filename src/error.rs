use std::io;

/// Custom error type for sdeploy operations
#[derive(Debug, thiserror::Error)]
pub enum SdeployError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Preflight check failed: {0}")]
    Preflight(String),

    #[error("Git operation failed: {operation}: {message}")]
    GitOperation { operation: String, message: String },

    #[error("Command execution failed: {0}")]
    Execution(String),

    #[error("command timed out after {0} seconds")]
    Timeout(u64),

    #[error("deployment cancelled during shutdown")]
    Cancelled,

    #[error("Notification failed: {0}")]
    Notify(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SdeployError {
    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        SdeployError::GitOperation {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Helper type for Results that use SdeployError
pub type Result<T> = std::result::Result<T, SdeployError>;
