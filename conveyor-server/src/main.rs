//! Conveyor API Server
//!
//! `serve` runs the HTTP API; `mint` issues bootstrap tokens for operators.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use conveyor_auth::{MintTokenOpts, TokenManager};
use conveyor_core::{init_logging, ConveyorConfig, User};
use conveyor_server::{ConveyorServerBuilder, MemoryStore, Seed};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Conveyor - CI/CD control plane API server
#[derive(Parser)]
#[command(name = "conveyor-server")]
#[command(about = "CI/CD control plane API server")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server
    Serve {
        /// Server host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Server port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// JSON file with initial users, repos, builds and secrets
        #[arg(long)]
        seed: Option<PathBuf>,
    },
    /// Mint a bootstrap token and print it
    Mint {
        #[arg(value_enum)]
        kind: MintKind,

        /// User name or worker hostname
        subject: String,

        /// Mark a user access token as platform admin
        #[arg(long)]
        admin: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum MintKind {
    UserAccess,
    WorkerRegister,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = ConveyorConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;

    match args.command {
        Command::Serve { host, port, seed } => serve(config, host, port, seed).await,
        Command::Mint {
            kind,
            subject,
            admin,
        } => mint(&config, kind, &subject, admin),
    }
}

async fn serve(
    config: ConveyorConfig,
    host: Option<String>,
    port: Option<u16>,
    seed: Option<PathBuf>,
) -> anyhow::Result<()> {
    init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    let store = match seed {
        Some(path) => MemoryStore::from_seed(
            Seed::load(&path).with_context(|| format!("failed to load seed {}", path.display()))?,
        ),
        None => MemoryStore::new(),
    };

    let mut builder = ConveyorServerBuilder::new(config).store(Arc::new(store));
    if let Some(host) = host {
        builder = builder.host(host);
    }
    if let Some(port) = port {
        builder = builder.port(port);
    }

    let server = builder.build().context("failed to build server")?;
    info!("Server built, starting");
    server.start().await.context("server failed")?;

    Ok(())
}

fn mint(config: &ConveyorConfig, kind: MintKind, subject: &str, admin: bool) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;
    let tokens = TokenManager::new(&config.auth);

    let opts = match kind {
        MintKind::UserAccess => {
            MintTokenOpts::user_access(&User::new(0, subject, String::new()).with_admin(admin))
        }
        MintKind::WorkerRegister => {
            anyhow::ensure!(!admin, "--admin only applies to user access tokens");
            MintTokenOpts::worker_register(subject)
        }
    };

    let issued = tokens.issue(&opts).context("failed to mint token")?;
    println!("{}", issued.token);
    eprintln!("expires at {}", issued.expires_at);
    Ok(())
}
