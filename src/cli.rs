//! CLI argument parsing using Clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Ansible Lightspeed authentication demo CLI
#[derive(Parser, Debug)]
#[command(name = "lightspeed")]
#[command(version, about, long_about = None)]
#[command(after_help = "Examples:
  lightspeed                        Show the signed-in user and their WCA spaces
  lightspeed login                  Sign in to Ansible Lightspeed
  lightspeed status                 Report settings, extensions, and sessions
  lightspeed --url https://stage.ai.ansible.redhat.com whoami
")]
pub struct Cli {
    /// Lightspeed service URL (overrides settings)
    #[arg(long, env = "LIGHTSPEED_URL")]
    pub url: Option<String>,

    /// Settings file path
    #[arg(long, env = "LIGHTSPEED_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Auth file path
    #[arg(long, env = "LIGHTSPEED_AUTH_FILE")]
    pub auth_file: Option<PathBuf>,

    /// Extensions directory
    #[arg(long, env = "LIGHTSPEED_EXTENSIONS_DIR")]
    pub extensions_dir: Option<PathBuf>,

    /// Force verbose logging
    #[arg(long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the signed-in user and their WCA spaces (default)
    Whoami,
    /// Sign in to Ansible Lightspeed interactively
    Login,
    /// Remove stored credentials
    Logout,
    /// Report settings, extensions, and per-provider session state
    Status,
}
