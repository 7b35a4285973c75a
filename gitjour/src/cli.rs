use std::path::PathBuf;
use clap::{Parser, Subcommand};

/// Serve up and use git repositories via ZeroConf.
#[derive(Debug, Parser)]
#[command(name = "gitjour", version, arg_required_else_help = true)]
pub struct Cli {
    /// Configuration file (default: ~/.config/gitjour/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Lists available repositories.
    List,

    /// Clone a gitjour-served repository.
    Clone {
        project: String,
        directory: Option<String>,
    },

    /// Pull from a gitjour-served repository.
    Pull {
        project: String,
        #[arg(default_value = "master")]
        branch: String,
    },

    /// Add a ZeroConf remote into your current repository.
    Remote {
        project: String,
        /// Remote name; defaults to the project name
        name: Option<String>,
    },

    /// Serve up a project, or every project in a directory, via git daemon.
    ///
    /// The project name is prefixed with the configured prefix,
    /// `git config --get gitjour.prefix` or your username, in that order.
    /// Put a ^ in front of the name to announce it without a prefix.
    Serve {
        #[arg(default_value = ".")]
        path: PathBuf,
        name: Option<String>,
        port: Option<u16>,
    },

    /// Serve up a project via git instaweb for browsers.
    Web {
        #[arg(default_value = ".")]
        path: PathBuf,
        name: Option<String>,
        port: Option<u16>,
        /// httpd for instaweb, e.g. webrick, lighttpd or apache2
        httpd: Option<String>,
    },

    /// Browse repositories published with the `web` command.
    Browse {
        /// Port for the local web server
        port: Option<u16>,
        /// Web browser to open, see git-web--browse(1)
        browser: Option<String>,
    },
}
