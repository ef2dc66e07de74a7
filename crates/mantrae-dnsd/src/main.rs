// # mantrae-dnsd - Mantrae DNS Daemon
//
// Thin integration layer around `mantrae-dns-core`. Reconciliation logic
// lives in the core crate; this binary only:
//
// 1. Reads configuration from environment variables
// 2. Initializes logging and the runtime
// 3. Registers the provider adapters and the public IP detector
// 4. Runs the sync driver until SIGTERM / SIGINT
//
// ## Configuration
//
// - `MANTRAE_DNS_CONFIG`: Path to the JSON configuration document (required)
// - `MANTRAE_DNS_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
// - `MANTRAE_DNS_SYNC_INTERVAL_SECS`: Overrides the document's sync interval
// - `MANTRAE_DNS_IP_URL`: Comma-separated IP services for `auto_update`
//   providers (default: built-in list)
// - `MANTRAE_DNS_IP_FAMILY`: Restrict detected IPs to `v4` or `v6`
//
// ## Example
//
// ```bash
// export MANTRAE_DNS_CONFIG=/etc/mantrae/dns.json
// export MANTRAE_DNS_LOG_LEVEL=debug
//
// mantrae-dnsd
// ```

use anyhow::{Context, Result};
use mantrae_dns_core::{FileConfigStore, IpSource, ProviderRegistry, SyncDriver, SyncEvent};
use mantrae_dns_ip_http::{HttpIpSource, IpFamily};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info};
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
enum MantraeExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<MantraeExitCode> for ExitCode {
    fn from(code: MantraeExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration
#[derive(Debug)]
struct Config {
    config_path: PathBuf,
    log_level: String,
    sync_interval_secs: Option<u64>,
    ip_urls: Vec<String>,
    ip_family: Option<IpFamily>,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let config_path = env::var("MANTRAE_DNS_CONFIG").context(
            "MANTRAE_DNS_CONFIG is required. \
            Set it via: export MANTRAE_DNS_CONFIG=/etc/mantrae/dns.json",
        )?;

        let sync_interval_secs = match env::var("MANTRAE_DNS_SYNC_INTERVAL_SECS") {
            Ok(raw) => Some(raw.trim().parse::<u64>().with_context(|| {
                format!("MANTRAE_DNS_SYNC_INTERVAL_SECS is not a number: '{}'", raw)
            })?),
            Err(_) => None,
        };

        let ip_family = match env::var("MANTRAE_DNS_IP_FAMILY") {
            Ok(raw) => match raw.trim().to_lowercase().as_str() {
                "v4" | "ipv4" => Some(IpFamily::V4),
                "v6" | "ipv6" => Some(IpFamily::V6),
                "" | "any" => None,
                other => anyhow::bail!(
                    "MANTRAE_DNS_IP_FAMILY '{}' is not valid. Valid values: v4, v6, any",
                    other
                ),
            },
            Err(_) => None,
        };

        Ok(Self {
            config_path: PathBuf::from(config_path),
            log_level: env::var("MANTRAE_DNS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            sync_interval_secs,
            ip_urls: env::var("MANTRAE_DNS_IP_URL")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            ip_family,
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.config_path.as_os_str().is_empty() {
            anyhow::bail!("MANTRAE_DNS_CONFIG cannot be empty");
        }

        if let Some(interval) = self.sync_interval_secs
            && !(10..=86_400).contains(&interval)
        {
            anyhow::bail!(
                "MANTRAE_DNS_SYNC_INTERVAL_SECS must be between 10 and 86400 seconds. Got: {}",
                interval
            );
        }

        for url in &self.ip_urls {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                anyhow::bail!("MANTRAE_DNS_IP_URL must use HTTP or HTTPS scheme. Got: {}", url);
            }
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "MANTRAE_DNS_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    fn tracing_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return MantraeExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return MantraeExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.tracing_level())
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return MantraeExitCode::ConfigError.into();
    }

    info!("Starting mantrae-dnsd");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return MantraeExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        let daemon = match Daemon::setup(&config).await {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("Startup failed: {:#}", e);
                return MantraeExitCode::ConfigError;
            }
        };

        match daemon.run().await {
            Ok(()) => MantraeExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                MantraeExitCode::RuntimeError
            }
        }
    });

    code.into()
}

/// Wired components, ready to run
struct Daemon {
    driver: SyncDriver,
    events: mpsc::Receiver<SyncEvent>,
}

impl Daemon {
    async fn setup(config: &Config) -> Result<Self> {
        let registry = Arc::new(ProviderRegistry::new());
        mantrae_dns_provider_cloudflare::register(&registry);
        mantrae_dns_provider_powerdns::register(&registry);
        mantrae_dns_provider_technitium::register(&registry);
        mantrae_dns_provider_pihole::register(&registry);
        info!("Registered providers: {}", registry.list_providers().join(", "));

        let store = Arc::new(
            FileConfigStore::open(&config.config_path)
                .await
                .with_context(|| format!("Failed to load {}", config.config_path.display()))?,
        );

        let mut sync_config = store.sync_config().await;
        if let Some(interval) = config.sync_interval_secs {
            sync_config.interval_secs = interval;
        }

        let ip_source = if config.ip_urls.is_empty() {
            HttpIpSource::with_defaults(config.ip_family)
        } else {
            HttpIpSource::new(config.ip_urls.clone(), config.ip_family)
        }
        .context("Failed to create IP source")?;
        let ip_source: Arc<dyn IpSource> = Arc::new(ip_source);

        let (driver, _handle, events) = SyncDriver::new(
            registry,
            store.clone(),
            store,
            Some(ip_source),
            sync_config,
        )
        .context("Failed to create sync driver")?;

        Ok(Self { driver, events })
    }

    async fn run(self) -> Result<()> {
        let Daemon { driver, events } = self;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            match wait_for_shutdown().await {
                Ok(signal) => info!("Received shutdown signal: {}", signal),
                Err(e) => error!("Shutdown signal error: {:#}", e),
            }
            let _ = shutdown_tx.send(());
        });

        let logger = tokio::spawn(log_events(events));

        driver.run_with_shutdown(shutdown_rx).await?;

        // Dropping the driver closes the event channel
        drop(driver);
        let _ = logger.await;

        info!("mantrae-dnsd stopped");
        Ok(())
    }
}

/// Drain the driver's event channel
///
/// Per-record outcomes are already logged by the driver; cycle summaries are
/// repeated here at info level.
async fn log_events(mut events: mpsc::Receiver<SyncEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::CycleCompleted {
                report,
                completed_at,
            } => info!(
                "Sync cycle finished at {}: {} succeeded, {} failed, {} skipped",
                completed_at.to_rfc3339(),
                report.succeeded,
                report.failed,
                report.skipped
            ),
            other => debug!("Sync event: {:?}", other),
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for Ctrl-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}
