use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dialoguer::Password;
use tracing_subscriber::EnvFilter;

use family_locator::db::{self, Role, SessionRepo, UserRepo};
use family_locator::security::{hash_password, validate_new_password};
use family_locator::{ApiServerBuilder, Config};

/// Family Locator - location sharing for parents and children
#[derive(Parser)]
#[command(name = "family-locator", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/family-locator/config.toml)
    #[arg(short, long, env = "FAMILY_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(long)]
    bind: Option<IpAddr>,

    /// `SQLite` database file (overrides config)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the web server (default)
    Serve,
    /// Create an account from the command line
    CreateUser {
        /// Email address
        #[arg(short, long)]
        email: String,
        /// Account role: parent or child
        #[arg(short, long, default_value = "parent")]
        role: String,
    },
    /// Delete expired login sessions
    PurgeSessions,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,family_locator=info,tower_http=warn",
        1 => "info,family_locator=debug,tower_http=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load_with_options(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config).await,
        Command::CreateUser { email, role } => create_user(&config, &email, &role),
        Command::PurgeSessions => purge_sessions(&config),
    }
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    tracing::info!(
        database = %config.database_path.display(),
        port = config.server.port,
        "starting family locator"
    );

    let pool = db::init(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;

    ApiServerBuilder::from_config(pool, config)
        .build()
        .run()
        .await?;

    Ok(())
}

fn create_user(config: &Config, email: &str, role: &str) -> anyhow::Result<()> {
    let role = Role::parse(role).context("role must be parent or child")?;
    let email = db::user::normalize_email(email);
    db::user::validate_email(&email)?;

    let password = match std::env::var("FAMILY_PASSWORD") {
        Ok(password) => password,
        Err(_) => Password::new()
            .with_prompt("Password")
            .with_confirmation("Confirm password", "Passwords do not match")
            .interact()?,
    };
    validate_new_password(&password)?;

    let pool = db::init(&config.database_path)?;
    let hash = hash_password(&password, config.security.bcrypt_cost)?;
    let user = UserRepo::new(pool).create(&email, &hash, role)?;

    println!("Created {} account {} ({})", user.role, user.email, user.id);
    Ok(())
}

fn purge_sessions(config: &Config) -> anyhow::Result<()> {
    let pool = db::init(&config.database_path)?;
    let removed = SessionRepo::new(pool).purge_expired()?;

    println!("Removed {removed} expired session(s)");
    Ok(())
}
