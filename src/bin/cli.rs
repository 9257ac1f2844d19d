//! Course watcher CLI
//!
//! Polls the configured course pages and mails interesting changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use course_watch::{
    error::Result,
    models::{Config, LoggingConfig},
    pipeline::Watcher,
    services::{CourseScraper, LogNotifier, Notifier, SmtpConfig, SmtpNotifier},
    storage::{LocalStorage, StateStore},
    utils::{SystemClock, log::LogSink},
};
use tokio_util::sync::CancellationToken;

/// course-watch - Course availability watcher
#[derive(Parser, Debug)]
#[command(
    name = "course-watch",
    version,
    about = "Watches course booking tables and mails status changes"
)]
struct Cli {
    /// Directory holding state, error records and the log file
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Config file (default: {storage_dir}/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging and mirror the log to the console
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll courses until interrupted (default)
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Validate the configuration and mail settings
    Validate,

    /// Show saved state
    Info,
}

/// Initialize logging into the rotated log file.
fn init_logging(storage_dir: &Path, logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    builder.format_timestamp_secs();

    let path = storage_dir.join(&logging.file);
    match LogSink::open(&path, logging, verbose) {
        Ok(sink) => {
            builder.target(env_logger::Target::Pipe(Box::new(sink)));
            builder.init();
        }
        Err(e) => {
            builder.init();
            log::warn!("Cannot open log file {}: {e}. Logging to stderr.", path.display());
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.storage_dir.join("config.toml"));
    let (config, load_error) = match Config::load(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    init_logging(&cli.storage_dir, &config.logging, cli.verbose);
    match load_error {
        Some(e) => log::warn!(
            "Config load failed from {}: {e}. Using defaults.",
            config_path.display()
        ),
        None => log::info!("Loaded configuration from {}", config_path.display()),
    }

    let storage = LocalStorage::new(&cli.storage_dir);

    match cli.command.unwrap_or(Command::Run { once: false }) {
        Command::Run { once } => {
            config.validate()?;
            run(config, &config_path, storage, once).await?;
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {e}");
                return Err(e);
            }
            log::info!("✓ Config OK ({} courses)", config.courses.len());

            match SmtpConfig::from_env()? {
                Some(smtp) => {
                    SmtpNotifier::new(&smtp, Duration::from_secs(config.crawler.timeout_secs))?;
                    log::info!("✓ Mail OK ({} → {})", smtp.from, smtp.to.join(", "));
                }
                None => log::warn!("SMTP_SERVER not set, notifications will only be logged"),
            }

            log::info!("All validations passed!");
        }

        Command::Info => {
            log::info!("Storage directory: {}", cli.storage_dir.display());

            let snapshots = storage.load_snapshots().await?;
            if snapshots.is_empty() {
                log::info!("No snapshot found yet.");
            }
            for (name, snapshot) in &snapshots {
                log::info!(
                    "{name}: {} tables, {} rows, captured {}",
                    snapshot.tables.len(),
                    snapshot.row_count(),
                    snapshot.captured_at.to_rfc3339()
                );
            }

            for record in storage.load_error_records().await? {
                log::info!(
                    "Last {} notification: {}",
                    record.category,
                    record.last_notified.to_rfc3339()
                );
            }
        }
    }

    Ok(())
}

async fn run(config: Config, config_path: &Path, storage: LocalStorage, once: bool) -> Result<()> {
    let scraper = CourseScraper::new(&config.crawler, config.parser.clone())?;

    let notifier: Box<dyn Notifier> = match SmtpConfig::from_env()? {
        Some(smtp) => {
            log::info!("Sending notifications via {}:{}", smtp.server, smtp.port);
            Box::new(SmtpNotifier::new(
                &smtp,
                Duration::from_secs(config.crawler.timeout_secs),
            )?)
        }
        None => {
            log::warn!("SMTP_SERVER not set, notifications will only be logged");
            Box::new(LogNotifier)
        }
    };

    log::info!(
        "Watching {} course(s) every {}s",
        config.courses.len(),
        config.interval_secs
    );

    let mut watcher = Watcher::new(
        config,
        Box::new(scraper),
        notifier,
        Box::new(storage),
        Box::new(SystemClock),
    )
    .await?;
    if config_path.exists() {
        watcher = watcher.with_config_path(config_path);
    }

    let cancel = CancellationToken::new();
    if once {
        let report = watcher.run_cycle(&cancel).await;
        log::info!("{report}");
        return Ok(());
    }

    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupt received, shutting down after the current course");
            token.cancel();
        }
    });

    watcher.run(cancel).await;
    Ok(())
}
