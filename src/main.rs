//! QueryDesk - operator CLI entry point.
//!
//! A thin command surface over the service facade: list registered
//! connections, probe their health, and run saved or ad-hoc queries.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use querydesk::config::Config;
use querydesk::models::DateRange;
use querydesk::service::QueryDesk;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(name = "querydesk", version, about = "Saved-query service for external SQL data sources")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered connections with their health status.
    List,
    /// Probe a connection and update its health state.
    Probe {
        /// Connection id to probe
        connection_id: String,
    },
    /// Execute a saved query on behalf of a principal.
    Run {
        /// Saved query id
        query_id: String,
        /// Principal key used for the permission check
        #[arg(long)]
        principal: String,
        /// Start of the date window (YYYY-MM-DD)
        #[arg(long)]
        start_date: Option<NaiveDate>,
        /// End of the date window (YYYY-MM-DD)
        #[arg(long)]
        end_date: Option<NaiveDate>,
        /// Cache the result under this key
        #[arg(long)]
        cache_key: Option<String>,
    },
    /// Execute ad-hoc SQL against a connection.
    Exec {
        /// Connection id to run against
        connection_id: String,
        /// SQL text
        sql: String,
    },
}

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

fn date_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Option<DateRange>, String> {
    match (start, end) {
        (Some(start), Some(end)) => Ok(Some(DateRange::new(start, end))),
        (None, None) => Ok(None),
        _ => Err("--start-date and --end-date must be given together".to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    cli.config.validate()?;

    init_tracing(&cli.config);
    info!(
        data_dir = %cli.config.data_dir.display(),
        "Starting QueryDesk v{}",
        env!("CARGO_PKG_VERSION")
    );

    let desk = QueryDesk::new(&cli.config);

    match cli.command {
        Command::List => {
            for conn in desk.list_connections().await? {
                println!(
                    "{}  {:<24} {:<12} {}",
                    conn.id,
                    conn.name,
                    conn.status.to_string(),
                    conn.masked()
                );
            }
        }
        Command::Probe { connection_id } => match desk.probe_connection(&connection_id).await {
            Ok(()) => println!("{}: connected", connection_id),
            Err(e) => {
                eprintln!("{}: {}", connection_id, e);
                std::process::exit(1);
            }
        },
        Command::Run {
            query_id,
            principal,
            start_date,
            end_date,
            cache_key,
        } => {
            let range = date_range(start_date, end_date)?;
            let result = desk
                .run_saved_query(&query_id, &principal, range, cache_key.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Exec { connection_id, sql } => {
            let result = desk
                .execute_query(&connection_id, &sql, &[], None, None)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
