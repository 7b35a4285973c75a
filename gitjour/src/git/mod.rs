pub mod instaweb;

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use shared::protocol::FALLBACK_DESCRIPTION;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to run git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git {command} exited with {status}")]
    ExternalCommand { command: String, status: ExitStatus },
}

/// Run `git <args>` with the terminal attached, failing on a non-zero exit
pub async fn run(args: &[&str]) -> Result<(), ProcessError> {
    let command = args.join(" ");
    tracing::debug!("Running git {}", command);

    let status = Command::new("git")
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|source| ProcessError::Spawn { command: command.clone(), source })?;

    check(command, status)
}

/// Run `git <args>` until it exits or `cancel` fires, killing it in the latter case
pub async fn run_until_cancelled(args: &[&str], cancel: CancellationToken) -> Result<(), ProcessError> {
    let command = args.join(" ");
    tracing::debug!("Running git {}", command);

    let mut child = Command::new("git")
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessError::Spawn { command: command.clone(), source })?;

    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
    };

    match status {
        Some(status) => {
            let status = status.map_err(|source| ProcessError::Spawn { command: command.clone(), source })?;
            check(command, status)
        }
        None => {
            tracing::info!("Stopping git {}", args.first().copied().unwrap_or_default());
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to stop git {}: {}", command, e);
            }
            Ok(())
        }
    }
}

/// `git config --get <key>`, or `None` when unset or git is unavailable
pub async fn config_get(key: &str) -> Option<String> {
    let output = Command::new("git")
        .args(["config", "--get", key])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

fn check(command: String, status: ExitStatus) -> Result<(), ProcessError> {
    if status.success() {
        Ok(())
    } else {
        Err(ProcessError::ExternalCommand { command, status })
    }
}

/// The name to announce a repository under.
///
/// A leading `^` opts out of prefixing and is stripped; otherwise the prefix
/// (when there is one) is joined on with a dash.
pub fn service_name(raw: &str, prefix: Option<&str>) -> String {
    if let Some(bare) = raw.strip_prefix('^') {
        return bare.to_string();
    }

    match prefix.map(str::trim).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}-{}", prefix, raw),
        None => raw.to_string(),
    }
}

/// Prefix for announced names: configured value, then
/// `git config gitjour.prefix`, then `$USER`
pub async fn resolve_prefix(configured: Option<&str>) -> Option<String> {
    if let Some(prefix) = configured.filter(|p| !p.is_empty()) {
        return Some(prefix.to_string());
    }

    if let Some(prefix) = config_get("gitjour.prefix").await {
        return Some(prefix);
    }

    std::env::var("USER").ok().filter(|user| !user.is_empty())
}

pub fn is_repository(path: &Path) -> bool {
    path.join(".git").exists()
}

/// Text of `<path>/.git/description`, or the fallback when it can't be read
pub fn describe_repository(path: &Path) -> String {
    match std::fs::read_to_string(path.join(".git").join("description")) {
        Ok(description) => description.trim().to_string(),
        Err(e) => {
            tracing::debug!("No description for {}: {}", path.display(), e);
            FALLBACK_DESCRIPTION.to_string()
        }
    }
}

/// Immediate subdirectories of `path` that are git repositories, sorted
pub fn child_repositories(path: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut repositories = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let child = entry?.path();
        if child.is_dir() && is_repository(&child) {
            repositories.push(child);
        }
    }
    repositories.sort();
    Ok(repositories)
}
