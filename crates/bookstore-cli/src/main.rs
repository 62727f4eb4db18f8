//! Bookstore query script
//!
//! Connects to MongoDB, runs the bookstore queries in order against
//! `plp_bookstore.books`, prints each result and closes the connection.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use bookstore_mongodb::{
    MongoStore, QueryRunner, RunSummary, StoreConfig, DEFAULT_DATABASE, DEFAULT_URI,
};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

mod report;

use report::ConsoleSink;

#[derive(Parser, Debug)]
#[command(name = "bookstore-queries")]
#[command(about = "Run the bookstore query script against MongoDB")]
struct Args {
    /// MongoDB connection string
    #[arg(short, long, default_value = DEFAULT_URI)]
    uri: String,

    /// Database holding the collection
    #[arg(short, long, default_value = DEFAULT_DATABASE)]
    database: String,

    /// Collection to query
    #[arg(short, long, default_value = "books")]
    collection: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    /// Connection timeout in seconds
    #[arg(long, default_value = "10")]
    connect_timeout_secs: u64,

    /// Server selection timeout in seconds
    #[arg(long, default_value = "30")]
    server_selection_timeout_secs: u64,
}

impl Args {
    fn store_config(&self) -> anyhow::Result<StoreConfig> {
        let config = StoreConfig::new(self.uri.clone(), &self.database, &self.collection)
            .context("Invalid store configuration")?
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_server_selection_timeout(Duration::from_secs(
                self.server_selection_timeout_secs,
            ));
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Results go to stdout, logs to stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&args).await {
        Ok(summary) => {
            info!(
                "Finished {} steps in {:?}",
                summary.steps_completed, summary.elapsed
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> anyhow::Result<RunSummary> {
    let config = args.store_config()?;
    let runner = QueryRunner::bookstore().context("Failed to build the query script")?;

    info!(
        "Running {} steps against {}.{}",
        runner.steps().len(),
        config.database,
        config.collection
    );

    let store = MongoStore::connect(&config)
        .await
        .with_context(|| format!("Failed to connect to {}", config.uri))?;

    let mut sink = ConsoleSink::new(std::io::stdout());
    let summary = runner
        .run(store, &mut sink)
        .await
        .context("Query script failed")?;
    Ok(summary)
}
