use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use crmauth::cli::output::{self, OutputMode};
use crmauth::cli::status::status_rows;
use crmauth::config::seconds_setting;
use crmauth::{CrmAuthError, ProviderKind, Sweeper};

#[derive(Parser)]
#[command(name = "crmauth", version, about = "OAuth2 credential lifecycle for Salesforce and HubSpot")]
struct Cli {
    /// Path to a crmauth.json config file
    #[arg(long, global = true, env = "CRMAUTH_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize a user against a provider through the browser
    Connect {
        /// Provider name (salesforce, hubspot)
        provider: String,

        /// Application user id that will own the credential
        #[arg(long)]
        user: String,

        /// How long to wait for the provider redirect, in milliseconds
        #[arg(long, env = "CRMAUTH_CONNECT_TIMEOUT_MS", default_value_t = 120_000)]
        timeout_ms: u64,
    },

    /// Show stored credentials and their expiry state
    Status {
        /// Only show credentials for this provider
        #[arg(long)]
        provider: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Refresh one stored credential now
    Refresh {
        /// Provider name
        provider: String,

        /// Application user id
        #[arg(long)]
        user: String,

        /// Only refresh when the token is inside the expiry buffer
        #[arg(long)]
        if_needed: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Refresh every credential that expires within the threshold
    Sweep {
        /// Only sweep this provider
        #[arg(long)]
        provider: Option<String>,

        /// Expiry threshold in seconds (defaults to sweep.thresholdSecs)
        #[arg(long)]
        threshold_secs: Option<u64>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run sweeps on the configured interval until interrupted
    Daemon,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CRMAUTH_LOG_LEVEL")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = match cli.command {
        Commands::Status { json, .. }
        | Commands::Refresh { json, .. }
        | Commands::Sweep { json, .. } => OutputMode::from_flag(json),
        _ => OutputMode::Pretty,
    };

    if let Err(e) = run(cli).await {
        output::print_error(&e, mode);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CrmAuthError> {
    let config = crmauth::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Connect {
            provider,
            user,
            timeout_ms,
        } => {
            let kind: ProviderKind = provider.parse()?;
            let refresher = crmauth::cli::build_refresher(&config)?;
            let exchange = refresher.client(kind)?;
            let credential = crmauth::oauth::connect(
                exchange,
                refresher.store().as_ref(),
                &user,
                Duration::from_millis(timeout_ms),
            )
            .await?;
            println!("{}", output::format_credential(&credential, OutputMode::Pretty));
            Ok(())
        }
        Commands::Status { provider, json } => {
            let kind = provider.as_deref().map(str::parse::<ProviderKind>).transpose()?;
            let store = crmauth::cli::open_store(&config);
            let credentials = store.list(kind).await?;
            let rows = status_rows(&credentials, chrono::Utc::now(), config.refresh_buffer()?);
            let is_tty = std::io::stdout().is_terminal();
            println!("{}", output::format_status(&rows, OutputMode::from_flag(json), is_tty));
            Ok(())
        }
        Commands::Refresh {
            provider,
            user,
            if_needed,
            json,
        } => {
            let kind: ProviderKind = provider.parse()?;
            let refresher = crmauth::cli::build_refresher(&config)?;
            let credential = refresher.store().load(&user, kind).await?;
            let refreshed = if if_needed {
                refresher.ensure_valid_token(&credential).await?
            } else {
                refresher.refresh_credential(&credential).await?
            };
            println!("{}", output::format_credential(&refreshed, OutputMode::from_flag(json)));
            Ok(())
        }
        Commands::Sweep {
            provider,
            threshold_secs,
            json,
        } => {
            let threshold = match threshold_secs {
                Some(secs) => seconds_setting("--threshold-secs", secs)?,
                None => config.sweep_threshold()?,
            };
            let sweeper = Sweeper::new(Arc::new(crmauth::cli::build_refresher(&config)?))
                .with_concurrency(config.sweep.concurrency);
            let outcomes = match provider {
                Some(name) => vec![sweeper.run(name.parse()?, threshold).await],
                None => sweeper.run_all(threshold).await,
            };
            println!("{}", output::format_sweep(&outcomes, OutputMode::from_flag(json)));
            Ok(())
        }
        Commands::Daemon => {
            let sweeper = Sweeper::new(Arc::new(crmauth::cli::build_refresher(&config)?))
                .with_concurrency(config.sweep.concurrency);
            let interval = config.sweep_interval()?;
            let threshold = config.sweep_threshold()?;
            tracing::info!(
                interval_secs = interval.as_secs(),
                threshold_secs = config.sweep.threshold_secs,
                "Starting sweep daemon"
            );

            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let handle = sweeper.spawn(interval, threshold, shutdown_rx);
            tokio::signal::ctrl_c().await?;
            let _ = shutdown_tx.send(true);
            handle
                .await
                .map_err(|e| CrmAuthError::TransportError(Box::new(e)))?;
            eprintln!("Sweep daemon stopped");
            Ok(())
        }
    }
}
