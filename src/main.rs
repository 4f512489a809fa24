//! neurodb - Main entry point.
//!
//! Runs one statement against MySQL, PostgreSQL or SQLite and prints the
//! result, optionally with performance telemetry or the execution plan.

use clap::Parser;
use neurodb::config::Config;
use neurodb::db::Database;
use neurodb::error::DbError;
use neurodb::models::QueryParams;
use neurodb::output::{OutputFormat, format_metrics, format_outcome};
use std::io::Write;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so stdout carries only query output.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(config: &Config) -> Result<String, Box<dyn std::error::Error>> {
    let db_config = config.parse_database()?;
    let params = config.parse_params()?;

    let database = Database::connect(&db_config.to_connection_config()?)
        .await?
        .with_query_timeout(config.query_timeout_duration());
    info!(db_type = %database.db_type(), "Connected to database");

    let start = Instant::now();
    let result = render(&database, config, params.as_ref(), start).await;
    database.close().await;
    result
}

/// Run the configured statement and render it for stdout.
async fn render(
    database: &Database,
    config: &Config,
    params: Option<&QueryParams>,
    start: Instant,
) -> Result<String, Box<dyn std::error::Error>> {
    if config.explain {
        let plan = database.explain(&config.query, params).await?;
        return Ok(format_outcome(
            &plan,
            config.format,
            Some(start.elapsed().as_secs_f64()),
        ));
    }

    let output = database
        .select(&config.query, params, config.telemetry)
        .await?;
    if config.format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(&output)? + "\n");
    }

    let elapsed = output
        .metrics
        .as_ref()
        .map(|m| m.execution_time)
        .unwrap_or_else(|| start.elapsed().as_secs_f64());
    let mut text = format_outcome(&output.result, config.format, Some(elapsed));
    if let Some(metrics) = &output.metrics {
        text.push('\n');
        text.push_str(&format_metrics(metrics, config.format));
    }
    Ok(text)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    match run(&config).await {
        Ok(text) => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = stdout.write_all(text.as_bytes()) {
                error!(error = %e, "Failed to write output");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Query failed");
            eprintln!("Error: {}", e);
            if let Some(suggestion) = e.downcast_ref::<DbError>().and_then(DbError::suggestion) {
                eprintln!("Hint: {}", suggestion);
            }
            ExitCode::FAILURE
        }
    }
}
