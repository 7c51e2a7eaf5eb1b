use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use keyport::config::Config;
use keyport::credentials::{CredentialStore, SqliteCredentialStore};
use keyport::observability::{LogObserver, Observer};
use keyport::smoke::{self, SmokeOptions};
use std::path::PathBuf;
use std::sync::Arc;

/// keyport: store exchange API credentials behind a bearer token.
#[derive(Parser, Debug)]
#[command(name = "keyport")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir's config.toml).
    #[arg(long, global = true, env = "KEYPORT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP gateway.
    Serve {
        /// Override gateway.host
        #[arg(long)]
        host: Option<String>,

        /// Override gateway.port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Create the database file and the api_keys table.
    InitDb,

    /// Verify the api_keys table, its columns and the unique exchange index.
    CheckDb,

    /// Run end-to-end checks against a running gateway.
    Smoke {
        /// Base URL of the gateway.
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,

        /// Bearer token (defaults to the configured one).
        #[arg(long, env = "KEYPORT_AUTH_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Print the JSON schema of the config file.
    ConfigSchema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::ConfigSchema = cli.command {
        println!("{}", serde_json::to_string_pretty(&Config::json_schema())?);
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref())?;
    keyport::logging::init(&config.logging)?;
    if let Some(path) = &config.config_path {
        tracing::debug!(path = %path.display(), "Loaded config file");
    }

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            keyport::gateway::run_gateway(&config).await
        }
        Commands::InitDb => init_db(&config).await,
        Commands::CheckDb => check_db(&config).await,
        Commands::Smoke { url, token } => {
            let token = match token {
                Some(token) => token,
                None => config.require_auth_token()?.to_string(),
            };
            run_smoke(SmokeOptions::new(url, token)).await
        }
        Commands::ConfigSchema => Ok(()),
    }
}

fn open_store(config: &Config) -> Result<SqliteCredentialStore> {
    let observer: Arc<dyn Observer> = Arc::new(LogObserver::new());
    SqliteCredentialStore::open(&config.database, observer).with_context(|| {
        format!(
            "Failed to open database: {}",
            config.database.resolved_path().display()
        )
    })
}

async fn init_db(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    store
        .ensure_schema()
        .await
        .context("Failed to create api_keys table")?;
    println!("✓ Database ready at {}", store.db_path().display());
    Ok(())
}

async fn check_db(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    store
        .check_connectivity()
        .await
        .context("Database connectivity check failed")?;
    println!("✓ Connected to {}", store.db_path().display());

    let report = store.inspect_schema().await?;
    if report.is_healthy() {
        println!("✓ Table api_keys has all required columns");
        println!("✓ Unique index unique_exchange covers exchange");
        if let Some(rows) = report.row_count {
            println!("  {rows} credential record(s) stored");
        }
        return Ok(());
    }

    for problem in report.problems() {
        println!("✗ {problem}");
    }
    println!("  Run `keyport init-db` to create the schema.");
    bail!("Database schema is not healthy");
}

async fn run_smoke(options: SmokeOptions) -> Result<()> {
    println!("Smoke testing {}", options.base_url);
    let report = smoke::run_smoke(&options).await?;

    if !report.reachable {
        bail!(
            "Server at {} did not answer after {} attempts",
            options.base_url,
            options.attempts
        );
    }

    for check in &report.checks {
        let mark = if check.passed() { "✓" } else { "✗" };
        let actual = check
            .actual
            .map_or_else(|| "no response".to_string(), |s| s.to_string());
        println!(
            "{mark} {:<20} expected {} got {actual}",
            check.name, check.expected
        );
        if !check.passed() && !check.detail.is_empty() {
            println!("    {}", check.detail);
        }
    }

    if report.passed() {
        println!("All checks passed");
        Ok(())
    } else {
        bail!("Smoke test failed")
    }
}
