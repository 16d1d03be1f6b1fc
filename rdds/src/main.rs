//! RDDS server binary
//!
//! Boots the registrar lookup services: loads and validates configuration,
//! initialises logging, builds the worker runtime, opens the database pool
//! and runs the RDAP and WHOIS listeners until SIGINT or SIGTERM.

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::Parser;
use rdds_lib::{
    ConfigManager, ConnectionPool, LoggingConfig, MySqlManager, RdapResponder, RdapServer,
    RddsError, ServerConfig, Services, TldAllowList, WhoisResponder, WhoisServer,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

const LOG_FILE_PREFIX: &str = "rdds";

/// CLI arguments for rdds
#[derive(Parser, Debug)]
#[command(name = "rdds")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Registrar WHOIS (port 43) and RDAP server")]
#[command(
    long_about = "Serve registrar domain registration data over WHOIS (RFC 3912) and RDAP (RFC 7480/7482).\n\nConfiguration is read from --config, then RDDS_CONFIG, then ./rdds.toml and /etc/rdds/rdds.toml."
)]
#[command(styles = STYLES)]
pub struct Args {
    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Validate the configuration, print a summary and exit
    #[arg(long = "check-config")]
    pub check_config: bool,

    /// Report which configuration file was loaded
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

fn main() {
    let args = Args::parse();

    let config = match ConfigManager::new(args.verbose).discover_and_load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if args.check_config {
        println!("Configuration OK: {}", config.summary());
        return;
    }

    let _log_guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialise logging: {}", e);
            process::exit(1);
        }
    };

    let workers = config.runtime.worker_threads();
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("rdds-worker")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            process::exit(1);
        }
    };

    info!(workers, "{}", config.summary());

    if let Err(e) = runtime.block_on(run(config)) {
        error!(error = %e, "rdds stopped with an error");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Open the pool, wire the services and serve until a shutdown signal.
async fn run(config: ServerConfig) -> Result<(), RddsError> {
    let manager = Arc::new(MySqlManager::new(&config.database));
    let pool = ConnectionPool::connect(
        manager,
        config.database.pool_size,
        config.database.checkout_timeout,
    )
    .await?;
    info!(size = config.database.pool_size, "database pool ready");

    let allow_list = load_allow_list(&config, &pool).await?;
    if allow_list.is_empty() {
        warn!("TLD allow-list is empty, every domain query will be rejected");
    } else {
        info!(tlds = allow_list.len(), "TLD allow-list loaded");
    }

    let services = Services::new(&config, allow_list, pool.clone());
    let sweeper = services.limiter.spawn_sweeper();

    let rdap = RdapServer::bind(&config.rdap, RdapResponder::new(services.clone())).await?;
    let whois = WhoisServer::bind(&config.whois, WhoisResponder::new(services)).await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested");
        let _ = stop_tx.send(true);
    });

    let result = tokio::try_join!(
        rdap.run_until_shutdown(stop_rx.clone()),
        whois.run_until_shutdown(stop_rx),
    );

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    pool.close();
    info!("rdds stopped");

    result.map(|_| ())
}

/// Configured extensions win; otherwise read the registrar's pricing table.
async fn load_allow_list(
    config: &ServerConfig,
    pool: &ConnectionPool,
) -> Result<TldAllowList, RddsError> {
    if let Some(tlds) = &config.policy.allowed_tlds {
        return Ok(TldAllowList::new(tlds));
    }

    let mut conn = pool.checkout().await?;
    let loaded = TldAllowList::load_from(&mut *conn).await;
    conn.release().await;
    Ok(loaded?)
}

/// Install the global subscriber: stdout always, plus a daily rolling file
/// when a log directory is configured. `RUST_LOG` overrides the level.
///
/// The returned guard flushes the file writer and must outlive the server.
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, String> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| format!("invalid log level '{}': {}", config.level, e))?,
    };

    let mut layers = Vec::new();

    let stdout = fmt::layer().with_target(false);
    layers.push(if config.json {
        stdout.json().boxed()
    } else {
        stdout.boxed()
    });

    let guard = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)
                .map_err(|e| format!("cannot create {}: {}", directory.display(), e))?;

            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .filename_suffix("log")
                .build(directory)
                .map_err(|e| e.to_string())?;
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let file = fmt::layer().with_writer(writer).with_ansi(false);
            layers.push(if config.json {
                file.json().boxed()
            } else {
                file.boxed()
            });
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .map_err(|e| e.to_string())?;

    Ok(guard)
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
