use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use sluice_api::app::{self, services::AppServices};
use sluice_api::config::Config;
use sluice_auth::Hs256JwtValidator;
use sluice_core::Username;

/// Authorization-data service: users, groups, policies and credentials.
#[derive(Parser, Debug)]
#[command(name = "sluice", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Migrate the schema, then serve the HTTP API.
    Run,
    /// Create (or reuse) an administrator and print a fresh credential for it.
    Superuser {
        /// Name of the administrator user.
        #[arg(long, env = "SLUICE_SUPERUSER_NAME")]
        user_name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;
    sluice_observability::init(config.log_format);

    match cli.command {
        Command::Run => run(&config).await,
        Command::Superuser { user_name } => superuser(&config, &user_name).await,
    }
}

async fn run(config: &Config) -> anyhow::Result<()> {
    let services = AppServices::postgres(&config.postgres)
        .await
        .context("connecting to postgres")?;
    let jwt = Arc::new(Hs256JwtValidator::new(config.auth.secret_key.as_bytes()));

    let router = app::build_app(Arc::new(services), jwt, config.request_timeout);

    let listener = tokio::net::TcpListener::bind(config.listen_address)
        .await
        .with_context(|| format!("binding {}", config.listen_address))?;
    tracing::info!(address = %listener.local_addr()?, "listening");

    axum::serve(listener, router).await.context("serving http")?;
    Ok(())
}

async fn superuser(config: &Config, user_name: &str) -> anyhow::Result<()> {
    let username = Username::new(user_name).context("invalid user name")?;
    let services = AppServices::postgres(&config.postgres)
        .await
        .context("connecting to postgres")?;

    let credential = services
        .ensure_superuser(&username)
        .await
        .context("creating superuser")?;

    println!("credentials:");
    println!("  username: {}", credential.username);
    println!("  access_key_id: {}", credential.access_key_id);
    println!("  secret_access_key: {}", credential.secret_access_key.expose());
    Ok(())
}
