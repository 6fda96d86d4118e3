// # vmsyncd - VM Inventory Sync Daemon
//
// This is a thin integration layer: all reconciliation logic lives in
// vmsync-core. The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Building the entity store and endpoint caller through the registry
// 4. Seeding endpoint configuration into the store
// 5. Triggering reconciliation rounds on a fixed interval
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Store
// - `VMSYNC_STORE_TYPE`: Type of entity store (file, memory). Default: file
// - `VMSYNC_STORE_PATH`: Path to the snapshot file (for file store)
//
// ### Endpoints
// - `VMSYNC_ENDPOINTS_FILE`: JSON file holding an array of endpoint configs
//
// ### Schedule
// - `VMSYNC_INTERVAL_MINUTES`: Minutes between rounds. Default: 60
// - `VMSYNC_PLATFORMS`: Comma-separated platforms (vmware, nutanix). Default: all
// - `VMSYNC_RUN_ONCE`: Run a single round and exit (true/false)
//
// ### Engine
// - `VMSYNC_ENDPOINT_TIMEOUT_SECS`: Deadline per endpoint call. Default: 120
// - `VMSYNC_EMPTY_CONFIG_WARNING`: Report passes without endpoints as WARNING
// - `VMSYNC_LOG_LEVEL`: trace, debug, info, warn, error. Default: info
//
// ## Example
//
// ```bash
// export VMSYNC_STORE_TYPE=file
// export VMSYNC_STORE_PATH=/var/lib/vmsync/inventory.json
// export VMSYNC_ENDPOINTS_FILE=/etc/vmsync/endpoints.json
// export VMSYNC_INTERVAL_MINUTES=30
//
// vmsyncd
// ```

use anyhow::{Context, Result};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use vmsync_core::config::{EndpointConfig, EngineConfig, ScheduleConfig, StoreConfig, SyncConfig};
use vmsync_core::traits::{EndpointCaller, EntityStore};
use vmsync_core::{EngineEvent, Platform, Registry, RunStatus, SyncEngine};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum VmsyncExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<VmsyncExitCode> for ExitCode {
    fn from(code: VmsyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration
struct Config {
    sync: SyncConfig,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let store = match env::var("VMSYNC_STORE_TYPE")
            .unwrap_or_else(|_| "file".to_string())
            .as_str()
        {
            "memory" => StoreConfig::Memory,
            "file" => StoreConfig::File {
                path: env::var("VMSYNC_STORE_PATH").context(
                    "VMSYNC_STORE_PATH is required when VMSYNC_STORE_TYPE=file. \
                    Set it via: export VMSYNC_STORE_PATH=/var/lib/vmsync/inventory.json",
                )?,
            },
            other => anyhow::bail!(
                "VMSYNC_STORE_TYPE '{}' is not supported. Supported types: file, memory",
                other
            ),
        };

        let endpoints = match env::var("VMSYNC_ENDPOINTS_FILE") {
            Ok(path) => load_endpoints(&path)?,
            Err(_) => Vec::new(),
        };

        let mut engine = EngineConfig::default();
        if let Some(secs) = parse_var::<u64>("VMSYNC_ENDPOINT_TIMEOUT_SECS")? {
            engine.endpoint_timeout_secs = secs;
        }
        if let Some(flag) = parse_var::<bool>("VMSYNC_EMPTY_CONFIG_WARNING")? {
            engine.empty_configuration_is_warning = flag;
        }

        let mut schedule = ScheduleConfig::default();
        if let Some(minutes) = parse_var::<u64>("VMSYNC_INTERVAL_MINUTES")? {
            schedule.interval_minutes = minutes;
        }
        if let Some(run_once) = parse_var::<bool>("VMSYNC_RUN_ONCE")? {
            schedule.run_once = run_once;
        }
        if let Ok(platforms) = env::var("VMSYNC_PLATFORMS") {
            schedule.platforms = platforms
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse::<Platform>)
                .collect::<std::result::Result<Vec<_>, _>>()?;
        }

        Ok(Self {
            sync: SyncConfig {
                store,
                endpoints,
                engine,
                schedule,
            },
            log_level: env::var("VMSYNC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.sync.validate()?;

        if let StoreConfig::File { path } = &self.sync.store
            && let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "VMSYNC_STORE_PATH parent directory does not exist: {}. \
                Create it first: sudo mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "VMSYNC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }
}

/// Parse an optional environment variable
fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, raw, e)),
        Err(_) => Ok(None),
    }
}

/// Read the endpoints file (a JSON array of endpoint configs)
fn load_endpoints(path: &str) -> Result<Vec<EndpointConfig>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read VMSYNC_ENDPOINTS_FILE {}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid endpoints file {}", path))
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return VmsyncExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return VmsyncExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return VmsyncExitCode::ConfigError.into();
    }

    info!("Starting vmsyncd daemon");
    info!(
        "Configuration loaded: {} endpoint(s), store type {}",
        config.sync.endpoints.len(),
        config.sync.store.type_name()
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return VmsyncExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config.sync).await {
            error!("Daemon error: {:#}", e);
            VmsyncExitCode::RuntimeError
        } else {
            VmsyncExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: SyncConfig) -> Result<()> {
    let registry = Registry::with_builtin_stores();

    #[cfg(feature = "http")]
    {
        info!("Registering HTTP endpoint caller");
        vmsync_http::register(&registry);
    }

    let store: Arc<dyn EntityStore> = Arc::from(registry.create_store(&config.store).await?);
    let caller: Arc<dyn EndpointCaller> =
        Arc::from(registry.create_caller("http", &serde_json::Value::Null)?);

    // Endpoints dropped from the file stay on record but are never called
    store.replace_endpoints(&config.endpoints).await?;
    if config.endpoints.is_empty() {
        warn!("No endpoints configured, passes will not fetch anything");
    }

    let (engine, events) = SyncEngine::new(Arc::clone(&store), caller, config.engine.clone())?;
    let engine = Arc::new(engine);
    tokio::spawn(log_events(events));

    let schedule = config.schedule;

    if schedule.run_once {
        run_round(&engine, &schedule.platforms).await;
        store.flush().await?;
        info!("Single round finished");
        return Ok(());
    }

    let period = Duration::from_secs(schedule.interval_minutes.saturating_mul(60));
    let mut ticks = IntervalStream::new(tokio::time::interval(period));
    info!("Reconciling every {} minute(s)", schedule.interval_minutes);

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                let signal = signal?;
                info!("Received shutdown signal: {}", signal);
                break;
            }
            Some(_) = ticks.next() => {
                run_round(&engine, &schedule.platforms).await;
                if let Err(e) = store.flush().await {
                    error!("Failed to flush entity store: {}", e);
                }
            }
        }
    }

    info!("Shutting down daemon");
    store.flush().await?;

    Ok(())
}

/// Run one round: each platform's passes, platforms concurrently
async fn run_round(engine: &Arc<SyncEngine>, platforms: &[Platform]) {
    let mut tasks = JoinSet::new();

    for platform in platforms.iter().copied() {
        let engine = Arc::clone(engine);
        tasks.spawn(async move { engine.run_platform(platform).await });
    }

    while let Some(joined) = tasks.join_next().await {
        let results = match joined {
            Ok(results) => results,
            Err(e) => {
                error!("Reconciliation task failed: {}", e);
                continue;
            }
        };

        for result in results {
            let summary = format!(
                "{}: {} (seen={}, retired={}, changes={})",
                result.resource,
                result.status,
                result.records_seen,
                result.records_retired,
                result.changes_detected
            );
            match (result.status, &result.error) {
                (RunStatus::Failed, Some(e)) => error!("{}: {}", summary, e),
                (RunStatus::Warning, Some(e)) => warn!("{}: {}", summary, e),
                _ => info!("{}", summary),
            }
        }
    }
}

/// Drain engine events into the log
async fn log_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::EndpointFailed {
                run_id,
                endpoint,
                error,
            } => warn!("Run {}: endpoint {} failed: {}", run_id, endpoint, error),
            EngineEvent::VmResurrected { vm_id, vm_uuid } => {
                info!("VM {} ({}) is back in inventory", vm_uuid, vm_id)
            }
            other => debug!("Engine event: {:?}", other),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };

    Ok(signal)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
