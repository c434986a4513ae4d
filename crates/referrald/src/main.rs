// # referrald - Referral Ledger Daemon
//
// This daemon is a thin integration layer over referral-core. It:
// 1. Reads configuration from environment variables
// 2. Initializes logging and the runtime
// 3. Selects the store backend (falling back to the volatile store)
// 4. Runs the trigger listener over stdin/stdout until stdin closes or a
//    shutdown signal arrives
//
// Triggers are read from stdin and responses written to stdout as JSON
// lines, so logs go to stderr.
//
// ## Configuration
//
// ### Main store
// - `REFERRAL_DB_USERNAME`, `REFERRAL_DB_PASSWORD`, `REFERRAL_DB_NAME`
// - `REFERRAL_DB_ADDRESS`: `host:port`
//
// ### Identity directory
// - `REFERRAL_DIRECTORY_DB_USERNAME`, `REFERRAL_DIRECTORY_DB_PASSWORD`,
//   `REFERRAL_DIRECTORY_DB_NAME`
// - `REFERRAL_DIRECTORY_DB_ADDRESS`: `host:port`
//
// Leaving either address unset runs the volatile store.
//
// ### Pool (applies to both stores)
// - `REFERRAL_POOL_MAX_CONNECTIONS` (default 50)
// - `REFERRAL_POOL_MIN_CONNECTIONS` (default 0, connections kept open when idle)
// - `REFERRAL_POOL_IDLE_TIMEOUT_SECS` (default 600)
// - `REFERRAL_POOL_MAX_LIFETIME_SECS` (default 43200)
// - `REFERRAL_POOL_ACQUIRE_TIMEOUT_SECS` (default 10)
//
// ### Logging
// - `REFERRAL_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export REFERRAL_DB_ADDRESS=db.internal:5432
// export REFERRAL_DB_USERNAME=referrals
// export REFERRAL_DB_NAME=referrals
// export REFERRAL_DIRECTORY_DB_ADDRESS=udb.internal:5432
// export REFERRAL_DIRECTORY_DB_USERNAME=reader
// export REFERRAL_DIRECTORY_DB_NAME=directory
//
// transport-bridge | referrald | transport-bridge --reply
// ```

use anyhow::{Context, Result};
use referral_core::config::split_host_port;
use referral_core::{
    DatabaseParams, JsonLinesTriggerSource, Listener, ListenerConfig, ListenerEvent, PoolConfig,
    Registrar, StoreConfig, select_backend,
};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum ReferralExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<ReferralExitCode> for ExitCode {
    fn from(code: ReferralExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    store: StoreConfig,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let main = database_params(&lookup, "REFERRAL_DB")?;
        let directory = database_params(&lookup, "REFERRAL_DIRECTORY_DB")?;

        let defaults = PoolConfig::default();
        let pool = PoolConfig {
            max_connections: parse_or(
                &lookup,
                "REFERRAL_POOL_MAX_CONNECTIONS",
                defaults.max_connections,
            )?,
            min_connections: parse_or(
                &lookup,
                "REFERRAL_POOL_MIN_CONNECTIONS",
                defaults.min_connections,
            )?,
            idle_timeout_secs: parse_or(
                &lookup,
                "REFERRAL_POOL_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout_secs,
            )?,
            max_lifetime_secs: parse_or(
                &lookup,
                "REFERRAL_POOL_MAX_LIFETIME_SECS",
                defaults.max_lifetime_secs,
            )?,
            acquire_timeout_secs: parse_or(
                &lookup,
                "REFERRAL_POOL_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout_secs,
            )?,
        };

        Ok(Self {
            store: StoreConfig::new(main, directory).with_pool(pool),
            log_level: lookup("REFERRAL_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.store
            .validate()
            .context("Invalid store configuration")?;

        self.log_level()?;
        Ok(())
    }

    fn log_level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "REFERRAL_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }
}

/// Read `<prefix>_USERNAME`, `_PASSWORD`, `_NAME` and `_ADDRESS`
fn database_params(
    lookup: &impl Fn(&str) -> Option<String>,
    prefix: &str,
) -> Result<DatabaseParams> {
    let var = |suffix: &str| lookup(&format!("{}_{}", prefix, suffix)).unwrap_or_default();

    let address = var("ADDRESS");
    let params = if address.is_empty() {
        DatabaseParams::default()
    } else {
        let (host, port) = split_host_port(&address)
            .with_context(|| format!("{}_ADDRESS is malformed", prefix))?;
        DatabaseParams::new(host, port)
    };

    Ok(params
        .with_credentials(var("USERNAME"), var("PASSWORD"))
        .with_db_name(var("NAME")))
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a number. Got: {}", key, raw)),
        _ => Ok(default),
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ReferralExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return ReferralExitCode::ConfigError.into();
    }

    let log_level = config.log_level().unwrap_or(Level::INFO);

    // stdout carries responses
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ReferralExitCode::ConfigError.into();
    }

    info!("Starting referrald");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ReferralExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            ReferralExitCode::RuntimeError
        } else {
            ReferralExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let backend = select_backend(&config.store).await;
    info!("Using {} store backend", backend.backend_name());

    let registrar = Arc::new(Registrar::new(Arc::clone(&backend)));
    let source = Arc::new(JsonLinesTriggerSource::new(
        tokio::io::stdin(),
        tokio::io::stdout(),
    ));

    let (listener, mut events) = Listener::new(source, registrar, ListenerConfig::default());

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ListenerEvent::Stopped { reason } => info!("Listener stopped: {}", reason),
                other => debug!("Listener event: {:?}", other),
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => {
                // Dropping the sender would stop the listener.
                warn!("Signal handling unavailable: {:#}", e);
                std::future::pending::<()>().await;
            }
        }
        let _ = shutdown_tx.send(());
    });

    info!("Ready to handle referral triggers");
    let result = listener.run(Some(shutdown_rx)).await;

    info!("Shutting down daemon");
    backend.close().await;
    result?;
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(name)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}
