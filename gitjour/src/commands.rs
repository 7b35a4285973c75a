use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{anyhow, bail, Context, Result};
use tokio_util::sync::CancellationToken;
use shared::protocol::{GIT_SERVICE_TYPE, TXT_MARKER, TXT_MARKER_VALUE, WEB_SERVICE_TYPE};
use shared::types::ServiceRecord;
use crate::api::routes::{self, AppState};
use crate::cli::Command;
use crate::config::Config;
use crate::git::{self, instaweb::InstawebGuard};
use crate::lookup;
use crate::mdns::advertise::{repository_attributes, Announcer, Registration};
use crate::mdns::backend::MdnsBackend;
use crate::mdns::browser::DiscoveryClient;
use crate::registry;
use crate::snapshot::{self, DiscoveredSet};

pub async fn run(command: Command, config: Config) -> Result<()> {
    match command {
        Command::List => list(&config).await,
        Command::Clone { project, directory } => clone(&config, &project, directory).await,
        Command::Pull { project, branch } => pull(&config, &project, &branch).await,
        Command::Remote { project, name } => remote(&config, &project, name).await,
        Command::Serve { path, name, port } => serve(&config, &path, name, port).await,
        Command::Web { path, name, port, httpd } => web(&config, &path, name, port, httpd).await,
        Command::Browse { port, browser } => browse(&config, port, browser).await,
    }
}

fn start_backend(config: &Config) -> Result<MdnsBackend> {
    Ok(MdnsBackend::new(config.discovery.interface.as_deref())?)
}

/// An announcer that refuses names already advertised on the network
fn start_announcer(config: &Config, backend: &MdnsBackend) -> Announcer {
    let backend = Arc::new(backend.clone());
    Announcer::new(backend.clone())
        .with_conflict_check(DiscoveryClient::new(backend), config.discovery.conflict_check())
}

async fn list(config: &Config) -> Result<()> {
    let backend = start_backend(config)?;
    let client = DiscoveryClient::new(Arc::new(backend.clone()));
    let timeout = config.discovery.timeout();

    println!("Gathering for up to {} seconds...", timeout.as_secs());
    let services = snapshot::gather(&client, GIT_SERVICE_TYPE, timeout).await;
    backend.shutdown();

    print!("{}", format_listing(services?));
    Ok(())
}

/// Human-readable catalog of repositories, sorted by name
pub fn format_listing(services: DiscoveredSet) -> String {
    let mut records: Vec<ServiceRecord> = services.into_iter().collect();
    records.sort_by(|a, b| (a.name(), a.host(), a.port()).cmp(&(b.name(), b.host(), b.port())));

    let mut out = String::new();
    for record in &records {
        out.push_str(&format!("=== {} on {}:{} ===\n", record.name(), record.host(), record.port()));
        out.push_str(&format!("  gitjour (clone|pull) {}\n", record.name()));
        if let Some(description) = record.display_description() {
            out.push_str(&format!("  {}\n", description));
        }
        out.push('\n');
    }
    out
}

/// Find a served repository by exact name, or fail with a message naming it
async fn locate_repo(config: &Config, name: &str) -> Result<ServiceRecord> {
    let backend = start_backend(config)?;
    let client = DiscoveryClient::new(Arc::new(backend.clone()));
    let timeout = config.discovery.timeout();

    println!("Gathering for up to {} seconds...", timeout.as_secs());
    let found = lookup::locate(&client, GIT_SERVICE_TYPE, name, timeout).await;
    backend.shutdown();

    let service = found?.ok_or_else(|| anyhow!("Unable to find project named '{}'", name))?;
    println!("Connecting to {}:{}", service.host(), service.port());
    Ok(service)
}

async fn clone(config: &Config, project: &str, directory: Option<String>) -> Result<()> {
    let directory = directory.unwrap_or_else(|| project.to_string());
    if Path::new(&directory).exists() {
        bail!("Clone directory '{}' already exists.", directory);
    }

    println!("Cloning '{}' into directory '{}'...", project, directory);
    let service = locate_repo(config, project).await?;

    let url = service.git_url();
    git::run(&["clone", url.as_str(), directory.as_str()]).await?;
    Ok(())
}

async fn pull(config: &Config, project: &str, branch: &str) -> Result<()> {
    let service = locate_repo(config, project).await?;

    let url = service.git_url();
    git::run(&["pull", url.as_str(), branch]).await?;
    Ok(())
}

async fn remote(config: &Config, project: &str, name: Option<String>) -> Result<()> {
    let name = name.unwrap_or_else(|| project.to_string());
    let service = locate_repo(config, project).await?;

    let url = service.git_url();
    git::run(&["remote", "add", name.as_str(), url.as_str()]).await?;
    Ok(())
}

async fn announce_repository(
    announcer: &Announcer,
    path: &Path,
    name: &str,
    service_type: &str,
    port: u16,
    web: bool,
) -> Result<Registration> {
    let description = git::describe_repository(path);
    let registration = announcer
        .announce(name, service_type, port, repository_attributes(&description, web))
        .await
        .with_context(|| format!("Failed to announce {} from {}", name, path.display()))?;
    Ok(registration)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("No such directory: {}", path.display()))
}

fn directory_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| anyhow!("Can't name a project after {}", path.display()))
}

async fn announced_name(config: &Config, path: &Path, name: Option<String>) -> Result<String> {
    let raw = match name {
        Some(name) => name,
        None => directory_name(path)?,
    };
    let prefix = git::resolve_prefix(config.serve.prefix.as_deref()).await;
    Ok(git::service_name(&raw, prefix.as_deref()))
}

/// Cancelled on the first ctrl-c
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                token.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for ctrl-c: {}", e),
        }
    });
    cancel
}

async fn serve(config: &Config, path: &Path, name: Option<String>, port: Option<u16>) -> Result<()> {
    let path = absolute(path)?;
    let port = port.unwrap_or(config.serve.git_port);

    let backend = start_backend(config)?;
    let announcer = start_announcer(config, &backend);

    if git::is_repository(&path) {
        let name = announced_name(config, &path, name).await?;
        announce_repository(&announcer, &path, &name, GIT_SERVICE_TYPE, port, false).await?;
    } else {
        let repositories = git::child_repositories(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        for repository in repositories {
            let name = directory_name(&repository)?;
            announce_repository(&announcer, &repository, &name, GIT_SERVICE_TYPE, port, false).await?;
        }
    }

    if announcer.active().is_empty() {
        backend.shutdown();
        bail!("No git repositories found in {}", path.display());
    }

    let port_arg = format!("--port={}", port);
    let base_path_arg = format!("--base-path={}", path.display());
    let result = git::run_until_cancelled(
        &[
            "daemon",
            "--verbose",
            "--export-all",
            port_arg.as_str(),
            base_path_arg.as_str(),
            "--base-path-relaxed",
        ],
        cancel_on_ctrl_c(),
    )
    .await;

    announcer.withdraw_all();
    backend.shutdown();
    result?;
    Ok(())
}

async fn web(
    config: &Config,
    path: &Path,
    name: Option<String>,
    port: Option<u16>,
    httpd: Option<String>,
) -> Result<()> {
    let path = absolute(path)?;
    if !git::is_repository(&path) {
        bail!("You must specify a proper git project");
    }

    let port = port.unwrap_or(config.web.port);
    let httpd = httpd.unwrap_or_else(|| config.web.httpd.clone());
    let name = announced_name(config, &path, name).await?;

    let backend = start_backend(config)?;
    let announcer = start_announcer(config, &backend);

    let instaweb = InstawebGuard::start(&path, &httpd, port)
        .await
        .context("Unable to launch git instaweb")?;
    announce_repository(&announcer, &path, &name, WEB_SERVICE_TYPE, port, true).await?;

    println!("Serving {} at http://localhost:{} (ctrl-c to stop)", name, port);
    cancel_on_ctrl_c().cancelled().await;

    let stopped = instaweb.stop().await;
    announcer.withdraw_all();
    backend.shutdown();
    stopped?;
    Ok(())
}

async fn browse(config: &Config, port: Option<u16>, browser: Option<String>) -> Result<()> {
    let port = port.unwrap_or(config.browse.port);
    let browser = browser.or_else(|| config.browse.browser.clone());

    let backend = start_backend(config)?;
    let client = DiscoveryClient::new(Arc::new(backend.clone()));
    let (registry, subscription) = registry::track(
        &client,
        WEB_SERVICE_TYPE,
        Some((TXT_MARKER, TXT_MARKER_VALUE)),
        config.browse.membership,
    )?;

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind to port {}", port))?;
    let url = format!("http://localhost:{}", port);
    tracing::info!("Browse view listening on {}", url);

    let cancel = cancel_on_ctrl_c();
    let app = routes::router(AppState { registry });
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
    });

    let opened = match &browser {
        Some(browser) => git::run(&["web--browse", "-b", browser.as_str(), url.as_str()]).await,
        None => git::run(&["web--browse", "-c", "instaweb.browser", url.as_str()]).await,
    };
    if let Err(e) = opened {
        tracing::warn!("Failed to open a web browser, visit {} instead: {}", url, e);
    }

    let served = server.await;
    subscription.cancel();
    backend.shutdown();

    served
        .context("Browse server task failed")?
        .context("Browse server failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_listing() {
        let services: DiscoveredSet = [
            ServiceRecord::new("bob-docs", "desk.local", 9418, "Unnamed repository; edit this file"),
            ServiceRecord::new("alice-tools", "laptop.local", 9418, "Shared tooling\n"),
        ]
        .into_iter()
        .collect();

        let listing = format_listing(services);

        assert_eq!(
            listing,
            "=== alice-tools on laptop.local:9418 ===\n  gitjour (clone|pull) alice-tools\n  Shared tooling\n\n\
             === bob-docs on desk.local:9418 ===\n  gitjour (clone|pull) bob-docs\n\n"
        );
    }

    #[test]
    fn test_format_empty_listing() {
        assert_eq!(format_listing(DiscoveredSet::new()), "");
    }

    #[test]
    fn test_directory_name() {
        assert_eq!(directory_name(Path::new("/srv/git/tools")).unwrap(), "tools");
        assert!(directory_name(Path::new("/")).is_err());
    }
}
