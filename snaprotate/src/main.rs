//! Snaprotate - Main entry point
//!
//! Runs every configured backup job once and exits. Meant to be started by
//! cron or a systemd timer.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use snaprotate::config::{default_search_paths, locate_config, ConfigDocument, LogLevel};
use snaprotate::modules::DefaultModuleFactory;
use snaprotate::orchestrator::Orchestrator;
use snaprotate::provider::aws::Ec2Connector;
use snaprotate::rotation::SystemClock;
use snaprotate::utils;

const EXIT_INVALID_CONFIG: u8 = 1;
const EXIT_JOB_FAILURES: u8 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log = match utils::logger::init("info") {
        Ok(log) => log,
        Err(e) => {
            eprintln!("Failed to initialise logging: {}", e);
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };

    tracing::info!("Starting snaprotate v{}", env!("CARGO_PKG_VERSION"));

    let document = match load_document(args.config.as_deref()) {
        Ok(document) => document,
        Err(e) => {
            tracing::error!("Failed to load configuration: {:#}", e);
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };

    let global = match document.global_config() {
        Ok(global) => global,
        Err(e) => {
            tracing::error!("Invalid global configuration: {}", e);
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };

    let level = args.log_level.unwrap_or(global.log_level);
    if let Err(e) = log.set_level(level) {
        tracing::error!("Failed to apply log level {}: {}", level, e);
        return ExitCode::from(EXIT_INVALID_CONFIG);
    }

    let factory = DefaultModuleFactory::new(Arc::new(Ec2Connector), Arc::new(SystemClock));
    let summary = Orchestrator::new(Arc::new(factory))
        .run(&document.jobs)
        .await;

    tracing::info!(
        attempted = summary.attempted(),
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        skipped = summary.skipped(),
        "Run finished"
    );

    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_JOB_FAILURES)
    }
}

fn load_document(explicit: Option<&std::path::Path>) -> anyhow::Result<ConfigDocument> {
    let path = locate_config(explicit, &default_search_paths())?;
    tracing::info!("Using configuration file {}", path.display());
    Ok(ConfigDocument::from_file(&path)?)
}
