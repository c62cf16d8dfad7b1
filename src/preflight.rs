//! Pre-deployment directory checks.

use std::fs;
use std::path::Path;

use crate::config::ProjectConfig;
use crate::error::{Result, SdeployError};
use crate::logging::LogSink;

/// Verifies (and creates when missing) the directories a deployment needs:
/// `local_path` and the effective `execute_path`. Empty paths are skipped;
/// a path that exists but is not a directory fails the deployment.
pub fn run_preflight_checks(project: &ProjectConfig, log: &dyn LogSink) -> Result<()> {
    log.info(Some(&project.name), "Running preflight checks");

    let effective_execute_path = project.effective_execute_path().to_string();

    if !project.local_path.is_empty() {
        ensure_directory_exists(&project.local_path, log, &project.name)
            .map_err(|e| SdeployError::Preflight(format!("failed to ensure local_path exists: {}", e)))?;
    }

    if !effective_execute_path.is_empty() && effective_execute_path != project.local_path {
        ensure_directory_exists(&effective_execute_path, log, &project.name)
            .map_err(|e| SdeployError::Preflight(format!("failed to ensure execute_path exists: {}", e)))?;
    }

    log.info(Some(&project.name), "Preflight checks completed");
    Ok(())
}

/// Ensures a directory exists, creating it recursively with standard
/// permissions when missing.
pub fn ensure_directory_exists(
    dir_path: &str,
    log: &dyn LogSink,
    project_name: &str,
) -> std::result::Result<(), String> {
    match fs::metadata(dir_path) {
        Ok(meta) => {
            if !meta.is_dir() {
                return Err(format!("path exists but is not a directory: {}", dir_path));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log.info(
                Some(project_name),
                &format!("Creating directory: {}", dir_path),
            );
            fs::create_dir_all(dir_path).map_err(|e| format!("failed to create directory: {}", e))
        }
        Err(e) => Err(format!("failed to stat directory: {}", e)),
    }
}

/// Ensures the parent of a clone target exists before `git clone` runs.
pub fn ensure_parent_dir_exists(
    local_path: &str,
    log: &dyn LogSink,
    project_name: &str,
) -> std::result::Result<(), String> {
    let parent = match Path::new(local_path).parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(()),
    };

    match fs::metadata(parent) {
        Ok(meta) => {
            if meta.is_dir() {
                Ok(())
            } else {
                Err(format!(
                    "parent path exists but is not a directory: {}",
                    parent.display()
                ))
            }
        }
        Err(_) => {
            log.info(
                Some(project_name),
                &format!("Creating parent directory: {}", parent.display()),
            );
            fs::create_dir_all(parent).map_err(|e| format!("failed to create directory: {}", e))
        }
    }
}
