// # wrtsyncd - Router Synchronization Daemon
//
// Thin integration layer around wrtsync-core. Device, presence and traffic
// logic all live in the core crate; this binary only wires it up:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Creating the SSH session, state store and entity registry
// 4. Running the engine until SIGTERM/SIGINT
// 5. Publishing each cycle's entity states as a JSON snapshot file
//
// ## Configuration
//
// ### Router
// - `WRTSYNC_HOST`: Router hostname or IP (required)
// - `WRTSYNC_PORT`: SSH port (default 22)
// - `WRTSYNC_USERNAME`: SSH username (required)
// - `WRTSYNC_PASSWORD`: SSH password
// - `WRTSYNC_SSH_KEY`: Path to a private key file
//
// Exactly one of `WRTSYNC_PASSWORD` and `WRTSYNC_SSH_KEY` must be set.
//
// ### Engine
// - `WRTSYNC_INSTANCE_ID`: Scopes persisted state keys (default "router")
// - `WRTSYNC_SECONDS_UNTIL_AWAY`: Presence grace period (default 180)
// - `WRTSYNC_POLL_INTERVAL`: Seconds between cycles (default 30)
// - `WRTSYNC_WAN_INTERFACE`: Skip reading `wan_ifname` from the router
// - `WRTSYNC_NEW_DEVICES_ENABLED`: Register discovered devices enabled (default false)
// - `WRTSYNC_PROBE_INTERVAL`: Seconds between reachability probes of enabled
//   devices, 0 disables (default 300)
//
// Devices remembered in the state directory are registered again at startup,
// so a restart does not announce them as new.
//
// ### Output
// - `WRTSYNC_STATE_DIR`: Directory for persisted state (default /var/lib/wrtsync)
// - `WRTSYNC_SNAPSHOT_PATH`: Where to write the per-cycle entity snapshot
// - `WRTSYNC_LOG_LEVEL`: trace, debug, info, warn or error (default info)
//
// ## Example
//
// ```bash
// export WRTSYNC_HOST=192.168.1.1
// export WRTSYNC_USERNAME=admin
// export WRTSYNC_SSH_KEY=/root/.ssh/id_ed25519
// export WRTSYNC_SNAPSHOT_PATH=/run/wrtsync/entities.json
//
// wrtsyncd
// ```

use anyhow::{Context, Result};
use serde_json::json;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use wrtsync_core::config::DEFAULT_PORT;
use wrtsync_core::traits::{EntityRegistry, RouterSessionFactory, TrackedEntity};
use wrtsync_core::{
    EngineConfig, FileStateStore, MemoryEntityRegistry, RouterAuth, RouterConfig, StateStore,
    SyncConfig, SyncEngine, SyncEvent,
};
use wrtsync_ssh::SshSessionFactory;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum WrtsyncExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<WrtsyncExitCode> for ExitCode {
    fn from(code: WrtsyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    host: String,
    port: u16,
    username: String,
    password: Option<String>,
    ssh_key: Option<PathBuf>,
    instance_id: String,
    seconds_until_away: u64,
    poll_interval_secs: u64,
    wan_interface: Option<String>,
    new_devices_enabled: bool,
    probe_interval_secs: u64,
    state_dir: PathBuf,
    snapshot_path: Option<PathBuf>,
    log_level: String,
}

/// Environment variables, looked up by name
struct Vars<F: Fn(&str) -> Option<String>>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn required(&self, name: &str) -> Result<String> {
        self.nonempty(name)
            .with_context(|| format!("{} is required", name))
    }

    fn nonempty(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    /// Parse an optional number, rejecting garbage instead of defaulting
    fn number<T: std::str::FromStr>(&self, name: &str, default: T) -> Result<T> {
        match self.nonempty(name) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("{} must be a number. Got: {}", name, raw)),
            None => Ok(default),
        }
    }

    fn flag(&self, name: &str, default: bool) -> Result<bool> {
        match self.nonempty(name) {
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => anyhow::bail!("{} must be true or false. Got: {}", name, raw),
            },
            None => Ok(default),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(lookup);
        let defaults = EngineConfig::default();
        Ok(Self {
            host: vars.required("WRTSYNC_HOST")?,
            port: vars.number("WRTSYNC_PORT", DEFAULT_PORT)?,
            username: vars.required("WRTSYNC_USERNAME")?,
            password: vars.nonempty("WRTSYNC_PASSWORD"),
            ssh_key: vars.nonempty("WRTSYNC_SSH_KEY").map(PathBuf::from),
            instance_id: vars
                .nonempty("WRTSYNC_INSTANCE_ID")
                .unwrap_or_else(|| "router".to_string()),
            seconds_until_away: vars
                .number("WRTSYNC_SECONDS_UNTIL_AWAY", defaults.seconds_until_away)?,
            poll_interval_secs: vars.number("WRTSYNC_POLL_INTERVAL", defaults.poll_interval_secs)?,
            wan_interface: vars.nonempty("WRTSYNC_WAN_INTERFACE"),
            new_devices_enabled: vars
                .flag("WRTSYNC_NEW_DEVICES_ENABLED", defaults.new_devices_enabled)?,
            probe_interval_secs: vars
                .number("WRTSYNC_PROBE_INTERVAL", defaults.probe_interval_secs)?,
            state_dir: vars
                .nonempty("WRTSYNC_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/var/lib/wrtsync")),
            snapshot_path: vars.nonempty("WRTSYNC_SNAPSHOT_PATH").map(PathBuf::from),
            log_level: vars
                .nonempty("WRTSYNC_LOG_LEVEL")
                .unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate daemon-level settings; the core validates the rest
    fn validate(&self) -> Result<()> {
        match (&self.password, &self.ssh_key) {
            (Some(_), Some(_)) => anyhow::bail!(
                "Set only one of WRTSYNC_PASSWORD and WRTSYNC_SSH_KEY, not both"
            ),
            (None, None) => anyhow::bail!(
                "One of WRTSYNC_PASSWORD or WRTSYNC_SSH_KEY is required. \
                Set it via: export WRTSYNC_SSH_KEY=/root/.ssh/id_ed25519"
            ),
            (None, Some(key)) if !key.is_file() => {
                anyhow::bail!("WRTSYNC_SSH_KEY does not exist: {}", key.display())
            }
            _ => {}
        }

        if !(5..=3600).contains(&self.poll_interval_secs) {
            anyhow::bail!(
                "WRTSYNC_POLL_INTERVAL must be between 5 and 3600 seconds. Got: {}",
                self.poll_interval_secs
            );
        }

        if self.probe_interval_secs != 0 && !(60..=86400).contains(&self.probe_interval_secs) {
            anyhow::bail!(
                "WRTSYNC_PROBE_INTERVAL must be 0 or between 60 and 86400 seconds. Got: {}",
                self.probe_interval_secs
            );
        }

        if let Some(parent) = self.snapshot_path.as_deref().and_then(|p| p.parent())
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "WRTSYNC_SNAPSHOT_PATH parent directory does not exist: {}. \
                Create it first: sudo mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "WRTSYNC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        self.sync_config().validate()?;
        Ok(())
    }

    fn sync_config(&self) -> SyncConfig {
        let auth = match (&self.password, &self.ssh_key) {
            (_, Some(path)) => RouterAuth::KeyFile { path: path.clone() },
            (Some(password), None) => RouterAuth::Password {
                password: password.clone(),
            },
            (None, None) => RouterAuth::Password {
                password: String::new(),
            },
        };

        SyncConfig {
            instance_id: self.instance_id.clone(),
            router: RouterConfig {
                host: self.host.clone(),
                port: self.port,
                username: self.username.clone(),
                auth,
            },
            engine: EngineConfig {
                poll_interval_secs: self.poll_interval_secs,
                seconds_until_away: self.seconds_until_away,
                wan_interface: self.wan_interface.clone(),
                new_devices_enabled: self.new_devices_enabled,
                probe_interval_secs: self.probe_interval_secs,
                ..EngineConfig::default()
            },
        }
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return WrtsyncExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return WrtsyncExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return WrtsyncExitCode::ConfigError.into();
    }

    info!("Starting wrtsyncd daemon");
    info!(
        "Router {}@{}:{}, polling every {}s",
        config.username, config.host, config.port, config.poll_interval_secs
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return WrtsyncExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            WrtsyncExitCode::RuntimeError
        } else {
            WrtsyncExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let sync_config = config.sync_config();

    let session = SshSessionFactory
        .create(&sync_config.router, &sync_config.engine)
        .context("Failed to create router session")?;
    let state_store = FileStateStore::new(&config.state_dir)
        .await
        .context("Failed to open state directory")?;
    info!("State directory: {}", state_store.dir().display());

    let registry = Arc::new(MemoryEntityRegistry::new());
    let seeded = seed_registry(
        &state_store,
        &sync_config.presence_key(),
        registry.as_ref(),
        sync_config.engine.new_devices_enabled,
    )
    .await;
    info!("Registered {} remembered device(s)", seeded);

    let (mut engine, event_rx) =
        SyncEngine::new(session, Box::new(state_store), registry, sync_config)
            .context("Failed to create engine")?;
    engine.restore().await;

    let publisher = tokio::spawn(publish_events(event_rx, config.snapshot_path.clone()));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Shutdown handler error: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    engine.run_with_shutdown(Some(shutdown_rx)).await?;

    // Closing the event channel ends the publisher
    drop(engine);
    if let Err(e) = publisher.await {
        warn!("Event publisher ended abnormally: {}", e);
    }

    info!("Shutting down daemon");
    Ok(())
}

/// Register every device in the persisted presence document
///
/// Returns the number of devices registered. A missing or unreadable document
/// registers nothing.
async fn seed_registry(
    store: &dyn StateStore,
    presence_key: &str,
    registry: &dyn EntityRegistry,
    enabled: bool,
) -> usize {
    let document = match store.load(presence_key).await {
        Ok(Some(document)) => document,
        Ok(None) => return 0,
        Err(e) => {
            warn!("Failed to read remembered devices: {}", e);
            return 0;
        }
    };

    let Some(devices) = document.as_object() else {
        return 0;
    };

    let mut registered = 0;
    for mac in devices.keys() {
        match registry.register(TrackedEntity::device_tracker(mac, enabled)) {
            Ok(()) => registered += 1,
            Err(e) => warn!("Failed to register {}: {}", mac, e),
        }
    }
    registered
}

/// Log engine events and write each cycle's entities to the snapshot file
async fn publish_events(mut event_rx: mpsc::Receiver<SyncEvent>, snapshot_path: Option<PathBuf>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            SyncEvent::Started { instance_id } => info!("Engine started ({})", instance_id),
            SyncEvent::CycleCompleted { snapshot, entities } => {
                debug!(
                    "Cycle completed: {} device(s), WAN sample: {}",
                    snapshot.devices.len(),
                    snapshot.wan.is_some()
                );
                if let Some(path) = &snapshot_path {
                    let document = json!({
                        "devices": snapshot.devices,
                        "wan": snapshot.wan,
                        "entities": entities,
                    });
                    if let Err(e) = write_snapshot(path, &document).await {
                        warn!("Failed to write snapshot {}: {:#}", path.display(), e);
                    }
                }
            }
            SyncEvent::DevicesDiscovered { devices } => {
                for device in devices {
                    info!("New device: {} ({})", device.mac, device.hostname);
                }
            }
            SyncEvent::DevicesPruned { macs } => {
                info!("Forgot {} device(s): {}", macs.len(), macs.join(", "));
            }
            SyncEvent::UpdateFailed { error } => warn!("Router update failed: {}", error),
            SyncEvent::Stopped { reason } => info!("Engine stopped: {}", reason),
        }
    }
}

/// Replace the snapshot file atomically
async fn write_snapshot(path: &std::path::Path, document: &serde_json::Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(document)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Wait for SIGTERM or SIGINT
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

/// Fallback for non-Unix platforms: CTRL-C only
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use wrtsync_core::MemoryStateStore;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|name| vars.get(name).cloned())
    }

    const BASE: [(&str, &str); 3] = [
        ("WRTSYNC_HOST", "192.168.1.1"),
        ("WRTSYNC_USERNAME", "admin"),
        ("WRTSYNC_PASSWORD", "secret"),
    ];

    #[test]
    fn test_engine_defaults() {
        let engine = config(&BASE).unwrap().sync_config().engine;
        assert!(!engine.new_devices_enabled);
        assert_eq!(engine.probe_interval_secs, 300);
        assert_eq!(engine.poll_interval_secs, 30);
    }

    #[test]
    fn test_probe_and_enable_settings_reach_engine() {
        let mut vars = BASE.to_vec();
        vars.push(("WRTSYNC_NEW_DEVICES_ENABLED", "true"));
        vars.push(("WRTSYNC_PROBE_INTERVAL", "600"));

        let config = config(&vars).unwrap();
        config.validate().unwrap();
        let engine = config.sync_config().engine;
        assert!(engine.new_devices_enabled);
        assert_eq!(engine.probe_interval_secs, 600);
    }

    #[test]
    fn test_probe_can_be_disabled() {
        let mut vars = BASE.to_vec();
        vars.push(("WRTSYNC_PROBE_INTERVAL", "0"));

        let config = config(&vars).unwrap();
        config.validate().unwrap();
        assert!(config.sync_config().engine.probe_interval().is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut vars = BASE.to_vec();
        vars.push(("WRTSYNC_NEW_DEVICES_ENABLED", "maybe"));
        assert!(config(&vars).is_err());

        let mut vars = BASE.to_vec();
        vars.push(("WRTSYNC_PROBE_INTERVAL", "10"));
        assert!(config(&vars).unwrap().validate().is_err());

        assert!(config(&BASE[..2]).unwrap().validate().is_err(), "no credential");
        assert!(config(&BASE[1..]).is_err(), "no host");
    }

    #[tokio::test]
    async fn test_remembered_devices_registered_at_startup() {
        let store = MemoryStateStore::new();
        store
            .save(
                "router_last_seen",
                &json!({
                    "AA:00:00:00:00:01": {"last_seen": "2025-01-09T12:00:00Z"},
                    "AA:00:00:00:00:02": {"last_seen": "2025-01-08T12:00:00Z", "hostname": "tv"},
                }),
            )
            .await
            .unwrap();
        let registry = MemoryEntityRegistry::new();

        let seeded = seed_registry(&store, "router_last_seen", &registry, true).await;

        assert_eq!(seeded, 2);
        assert_eq!(
            registry.device_trackers().unwrap(),
            vec![
                TrackedEntity::device_tracker("AA:00:00:00:00:01", true),
                TrackedEntity::device_tracker("AA:00:00:00:00:02", true),
            ]
        );
    }

    #[tokio::test]
    async fn test_nothing_remembered_registers_nothing() {
        let registry = MemoryEntityRegistry::new();
        let seeded =
            seed_registry(&MemoryStateStore::new(), "router_last_seen", &registry, false).await;
        assert_eq!(seeded, 0);
        assert!(registry.is_empty());
    }
}
