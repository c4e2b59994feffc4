//! hearth-relay: household sync relay
//!
//! Accepts WebSocket sessions per household room, merges every update into
//! the room's server-side replica, persists it, and fans merged updates
//! out to the other members. Also serves invite issuance and login.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use hearth_sync::config::Config;
use hearth_sync::relay::{AccessGate, RelayState};
use hearth_sync::store::open_or_memory;

#[derive(Parser)]
#[command(name = "hearth-relay")]
#[command(about = "Household sync relay for Hearth")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "hearth.toml")]
    config: PathBuf,

    /// Data directory (overrides config file)
    #[arg(short, long, env = "HEARTH_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Bind address (overrides config file)
    #[arg(short, long, env = "HEARTH_BIND")]
    bind: Option<String>,

    /// Session token signing secret (overrides config file)
    #[arg(long, env = "HEARTH_JWT_SECRET")]
    jwt_secret: Option<String>,

    /// Bearer token allowed to issue invites (overrides config file)
    #[arg(long, env = "HEARTH_ADMIN_TOKEN")]
    admin_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hearth_sync=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(secret) = cli.jwt_secret {
        config.auth.jwt_secret = secret;
    }
    if let Some(token) = cli.admin_token {
        config.auth.admin_token = token;
    }

    let gate = AccessGate::new(
        &config.auth.jwt_secret,
        &config.auth.admin_token,
        std::time::Duration::from_secs(config.auth.session_ttl_secs),
    );
    let store = open_or_memory(&config.storage.data_dir);
    let state = Arc::new(RelayState::new(gate, store));
    let router = hearth_sync::relay::server::router(state);

    info!(bind = %config.server.bind, data_dir = %config.storage.data_dir.display(), "starting hearth-relay");
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
