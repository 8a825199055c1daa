use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::io::BufReader;

use talon::config::{self, FileProfileStore, ProfileStore, SecretStorage};
use talon::export;
use talon::filter::{FilterConfig, FilterField};
use talon::render;
use talon::repl::{Repl, ReplDeps};
use talon::secret::{AesGcmSecretProvider, PlainSecretProvider, SecretProvider};
use talon::source::falcon::{FalconClient, FalconConfig};
use talon::{
    stats, AlertQuery, AlertStore, DateRange, ExportFormat, IngestPipeline, Result,
    SessionManager, SqliteAlertStore, TalonConfig, TalonError,
};

#[derive(Parser)]
#[command(
    name = "talon",
    version,
    about = "talon: interactive CrowdStrike Falcon alert monitor"
)]
struct Cli {
    /// Config file (default: ~/.talon/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Alert database (default: ~/.talon/alerts.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Without a subcommand, start the interactive shell
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export stored alerts to a file
    Export {
        /// csv or json
        format: ExportFormat,
        /// Output file
        path: PathBuf,
        /// Only alerts at or above this severity
        #[arg(long)]
        min_severity: Option<String>,
        /// Only these products (comma-separated)
        #[arg(long)]
        product: Option<String>,
    },
    /// Print alert statistics
    Stats {
        /// Day to summarize (YYYY-MM-DD, default: today)
        date: Option<NaiveDate>,
        /// Last day of a range starting at DATE
        #[arg(long, requires = "date")]
        until: Option<NaiveDate>,
        /// Summarize every stored alert
        #[arg(long, conflicts_with = "date")]
        all: bool,
    },
    /// Delete every stored alert
    Purge {
        /// Skip the confirmation
        #[arg(long)]
        yes: bool,
        /// Also reset polling cursors
        #[arg(long)]
        cursors: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("{} {e}", "[talon]".red().bold());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let db_path = match &cli.db {
        Some(path) => path.clone(),
        None => config::default_db_path()?,
    };
    let store = Arc::new(SqliteAlertStore::open(&db_path).await?);

    match cli.command {
        Some(Commands::Export {
            format,
            path,
            min_severity,
            product,
        }) => {
            let mut filter = FilterConfig::default();
            if let Some(sev) = min_severity {
                filter.set(FilterField::Severity, &sev)?;
            }
            if let Some(product) = product {
                filter.set(FilterField::Product, &product)?;
            }
            let mut query = AlertQuery::all().oldest_first();
            if !filter.is_empty() {
                query = query.with_filter(filter);
            }
            let written = export::export_to_file(store.as_ref(), &query, format, &path).await?;
            println!("Exported {} alerts to {}", written, path.display());
        }
        Some(Commands::Stats { date, until, all }) => {
            if all {
                let summary = stats::overall_summary(store.as_ref()).await?;
                print!("{}", render::summary_view("Alert Statistics (all stored)", &summary));
            } else {
                let first = date.unwrap_or_else(|| Utc::now().date_naive());
                let range = DateRange::new(first, until.unwrap_or(first))?;
                let days = stats::daily_summary(store.as_ref(), range).await?;
                print!("{}", render::daily_view(&days));
            }
        }
        Some(Commands::Purge { yes, cursors }) => {
            if !yes {
                return Err(TalonError::validation(
                    "purge",
                    "refusing to delete without --yes",
                ));
            }
            let removed = store.purge().await?;
            println!("Purged {} alerts from {}", removed, db_path.display());
            if cursors {
                let reset = store.reset_cursors().await?;
                println!("Reset {} polling cursors", reset);
            }
        }
        None => {
            let config_path = match &cli.config {
                Some(path) => path.clone(),
                None => config::default_config_path()?,
            };
            let profile_store = Arc::new(FileProfileStore::new(config_path));
            let config = profile_store.load()?;
            let secrets = secret_provider(&config)?;

            let falcon = Arc::new(FalconClient::new(FalconConfig::default())?);
            let sessions = Arc::new(SessionManager::new(falcon.clone(), secrets.clone()));
            let pipeline = Arc::new(IngestPipeline::new(
                falcon.clone(),
                store.clone(),
                sessions.clone(),
            ));

            let mut repl = Repl::new(ReplDeps {
                config,
                profile_store,
                secrets,
                sessions,
                source: falcon,
                pipeline,
            });
            repl.run(BufReader::new(tokio::io::stdin())).await?;
        }
    }

    Ok(())
}

fn secret_provider(config: &TalonConfig) -> Result<Arc<dyn SecretProvider>> {
    let provider: Arc<dyn SecretProvider> = match config.settings.secret_storage {
        SecretStorage::AesGcm => {
            Arc::new(AesGcmSecretProvider::from_key_file(&config::default_key_path()?)?)
        }
        SecretStorage::Plain => Arc::new(PlainSecretProvider),
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        let cmd = Cli::command();
        cmd.clone().debug_assert();
        let about = cmd.get_about().map(|s| s.to_string()).unwrap_or_default();
        assert_eq!(about, "talon: interactive CrowdStrike Falcon alert monitor");
        assert!(about.is_ascii());
    }
}
