use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

use warden::authz::loader::load_catalog;
use warden::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Authorization decision engine")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "warden.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the authorization API (default)
    Serve,
    /// Load and validate the role catalog, then exit
    CheckCatalog,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    let state = load_catalog(&settings.catalog.path, settings.identity.clone())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::CheckCatalog => {
            let summary = serde_json::json!({
                "catalog": settings.catalog.path.display().to_string(),
                "roles": state.graph.role_count(),
                "permissions": state.graph.permission_count(),
                "open_roles": state.graph.open_roles().len(),
                "methods": state.methods.len(),
                "group_kinds": state.groups.kinds().collect::<Vec<_>>(),
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).into_diagnostic()?
            );
        }
        Command::Serve => {
            if settings.identity.deployment_identity.is_none() {
                tracing::warn!(
                    skip_auth = settings.identity.skip_auth_when_missing,
                    "No deployment identity configured; calls without credentials will not be treated as internal"
                );
            }
            warden::server::serve(&settings, Arc::new(state)).await?;
        }
    }
    Ok(())
}
