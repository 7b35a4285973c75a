use std::path::{Path, PathBuf};
use crate::git::{self, ProcessError};

/// A running `git instaweb` daemon for one repository.
///
/// Stop it with [`InstawebGuard::stop`]; a guard dropped while still running
/// stops the daemon synchronously.
pub struct InstawebGuard {
    repository: PathBuf,
    running: bool,
}

impl InstawebGuard {
    pub async fn start(repository: &Path, httpd: &str, port: u16) -> Result<Self, ProcessError> {
        let repository_arg = repository.to_string_lossy().into_owned();
        let httpd = format!("--httpd={}", httpd);
        let port = format!("--port={}", port);
        git::run(&[
            "-C",
            repository_arg.as_str(),
            "instaweb",
            httpd.as_str(),
            port.as_str(),
            "--browser=/dev/null",
        ])
        .await?;

        tracing::info!("Started instaweb for {} ({}, {})", repository.display(), httpd, port);
        Ok(Self {
            repository: repository.to_path_buf(),
            running: true,
        })
    }

    pub async fn stop(mut self) -> Result<(), ProcessError> {
        self.running = false;
        tracing::info!("Stopping instaweb...");
        let repository = self.repository.to_string_lossy().into_owned();
        git::run(&["-C", repository.as_str(), "instaweb", "stop"]).await
    }
}

impl Drop for InstawebGuard {
    fn drop(&mut self) {
        if !self.running {
            return;
        }

        tracing::warn!("Stopping instaweb for {} on drop", self.repository.display());
        let status = std::process::Command::new("git")
            .arg("-C")
            .arg(&self.repository)
            .args(["instaweb", "stop"])
            .status();
        if let Err(e) = status {
            tracing::error!("Failed to stop instaweb: {}", e);
        }
    }
}
