//! Ansible Lightspeed authentication demo CLI.
//!
//! Resolves an authentication session (silent first, one interactive
//! fallback), then reports the signed-in user and their WCA spaces.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use lightspeed::api::{self, LightspeedClient};
use lightspeed::auth::{AuthStorage, StoredSessionGateway};
use lightspeed::cli::{Cli, Commands};
use lightspeed::config::Config;
use lightspeed::extensions::{ANSIBLE_EXTENSION, ExtensionDir};
use lightspeed::session::{
    AuthGateway, ExtensionRegistry, LIGHTSPEED_AUTH_ID, LIGHTSPEED_AUTH_REQUEST, RHSSO_AUTH_ID,
    SessionResolver,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = main_impl() {
        eprintln!("lightspeed: {err:#}");
        std::process::exit(1);
    }
}

fn main_impl() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let ctx = CliContext::from_cli(&cli)?;
    match cli.command.unwrap_or(Commands::Whoami) {
        Commands::Whoami => runtime.block_on(handle_whoami(&ctx)),
        Commands::Login => runtime.block_on(handle_login(&ctx)),
        Commands::Logout => handle_logout(&ctx),
        Commands::Status => runtime.block_on(handle_status(&ctx)),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "lightspeed=debug"
    } else {
        "lightspeed=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Paths and settings resolved from flags, environment, and the settings
/// file.
struct CliContext {
    config: Config,
    base_url: String,
    auth_path: PathBuf,
    extensions: ExtensionDir,
}

impl CliContext {
    fn from_cli(cli: &Cli) -> Result<Self> {
        let settings_path = match &cli.settings {
            Some(path) => path.clone(),
            None => Config::default_path()?,
        };
        let config = Config::load(&settings_path)?;

        let base_url = cli
            .url
            .clone()
            .unwrap_or_else(|| config.service_url().to_string())
            .trim_end_matches('/')
            .to_string();

        let auth_path = match &cli.auth_file {
            Some(path) => path.clone(),
            None => AuthStorage::default_path()?,
        };

        let extensions_root = match &cli.extensions_dir {
            Some(path) => path.clone(),
            None => ExtensionDir::default_root()?,
        };

        Ok(Self {
            config,
            base_url,
            auth_path,
            extensions: ExtensionDir::new(extensions_root),
        })
    }
}

async fn handle_whoami(ctx: &CliContext) -> Result<()> {
    if !ctx.extensions.is_installed(ANSIBLE_EXTENSION) {
        bail!("{ANSIBLE_EXTENSION} is not installed");
    }
    if !ctx.config.is_enabled() {
        bail!("Lightspeed is disabled in settings");
    }

    let http = api::http_client()?;

    // Keep startup predictable: refresh expired tokens before resolving so a
    // restart doesn't force a re-login while a refresh token is still good.
    let mut storage = AuthStorage::load(ctx.auth_path.clone())?;
    storage.refresh_expired(&http, &ctx.base_url).await?;

    let gateway = StoredSessionGateway::new(ctx.auth_path.clone(), http.clone(), &ctx.base_url);
    let resolver = SessionResolver::new(&gateway, &ctx.extensions);
    let Some(session) = resolver.resolve().await? else {
        bail!("No active session found. Run `lightspeed login` and try again.");
    };

    let client = LightspeedClient::new(http, &ctx.base_url);
    let user = client.me(&session.access_token).await?;
    let token = client.wca_token(&session.access_token).await?;
    let spaces = client
        .wca_spaces(&token.inference_url, &token.bearer_token.access_token)
        .await?;

    println!("{}", api::format_whoami(&user, &spaces));
    Ok(())
}

async fn handle_login(ctx: &CliContext) -> Result<()> {
    let http = api::http_client()?;
    let gateway = StoredSessionGateway::new(ctx.auth_path.clone(), http.clone(), &ctx.base_url);
    gateway.request_interactive(LIGHTSPEED_AUTH_REQUEST).await?;

    let Some(session) = gateway.silent_session(LIGHTSPEED_AUTH_ID, &[]).await? else {
        bail!("Login completed but no usable session was stored");
    };

    // Label the credential with the account name so `status` can show it.
    let client = LightspeedClient::new(http, &ctx.base_url);
    match client.me(&session.access_token).await {
        Ok(user) => {
            let mut storage = AuthStorage::load(ctx.auth_path.clone())?;
            if let Some(mut credential) = storage.get(LIGHTSPEED_AUTH_ID).cloned() {
                credential.account = Some(format!("{} {}", user.given_name, user.family_name));
                storage.set(LIGHTSPEED_AUTH_ID, credential);
                storage.save()?;
            }
            println!("Signed in as {} {}", user.given_name, user.family_name);
        }
        Err(err) => {
            warn!(%err, "could not fetch account identity");
            println!("Signed in ({})", session.provider);
        }
    }
    Ok(())
}

fn handle_logout(ctx: &CliContext) -> Result<()> {
    let mut storage = AuthStorage::load(ctx.auth_path.clone())?;
    let mut removed = false;
    for provider in [LIGHTSPEED_AUTH_ID, RHSSO_AUTH_ID] {
        removed |= storage.remove(provider);
    }

    if removed {
        storage.save()?;
        println!("Signed out");
    } else {
        println!("No stored credentials");
    }
    Ok(())
}

async fn handle_status(ctx: &CliContext) -> Result<()> {
    println!("Service URL: {}", ctx.base_url);
    println!(
        "Lightspeed:  {}",
        if ctx.config.is_enabled() {
            "enabled"
        } else {
            "disabled"
        }
    );

    let installed = ctx.extensions.list();
    if installed.is_empty() {
        println!(
            "Extensions:  none installed ({})",
            ctx.extensions.root().display()
        );
    } else {
        let ids: Vec<&str> = installed.iter().map(|m| m.id.as_str()).collect();
        println!("Extensions:  {}", ids.join(", "));
    }

    let http = api::http_client()?;
    let gateway = StoredSessionGateway::new(ctx.auth_path.clone(), http, &ctx.base_url);
    let resolver = SessionResolver::new(&gateway, &ctx.extensions);
    for provider in resolver.provider_order() {
        match gateway.silent_session(provider, &[]).await? {
            Some(session) => match &session.account {
                Some(account) => println!("{provider}: signed in as {account}"),
                None => println!("{provider}: signed in"),
            },
            None => println!("{provider}: no session"),
        }
    }
    Ok(())
}
