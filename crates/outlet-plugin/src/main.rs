//! Outlet plugin entry point.
//!
//! The host controller starts this process and tells it where to connect.
//! The binary acts as the supervisor for the two library subsystems:
//!
//! ```text
//! main()
//!  ├─ load PluginConfig (file, then CLI overrides)
//!  ├─ DeviceRegistry::load()          -- devices + debug flag from settings.toml
//!  │    └─ subscribe: keep the session's debug forwarding in sync
//!  ├─ SessionManager::connect()       -- retried per config
//!  ├─ drain host callbacks
//!  └─ wait for Ctrl+C or host connection loss, then shutdown()
//! ```
//!
//! # Usage
//!
//! ```text
//! outlet-plugin [OPTIONS]
//!
//! Options:
//!   --host     <HOST>  Host controller address   [env: OUTLET_HOST]
//!   --port     <PORT>  Host controller RPC port  [env: OUTLET_PORT]
//!   --instance <NAME>  Friendly instance name    [env: OUTLET_INSTANCE]
//!   --config   <FILE>  Plugin config file        [env: OUTLET_CONFIG]
//!   --settings <FILE>  Device settings file      [env: OUTLET_SETTINGS]
//! ```
//!
//! CLI values override the config file; absent values keep the file's (or the
//! built-in default) value.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use outlet_plugin::application::device_registry::DeviceRegistry;
use outlet_plugin::infrastructure::network::{
    ChannelOptions, SessionManager, TcpChannelConnector,
};
use outlet_plugin::infrastructure::storage::config::{
    config_file_path, load_config_from, settings_file_path, PluginConfig,
};
use outlet_plugin::infrastructure::storage::secret_codec::FixedKeyCodec;
use outlet_plugin::infrastructure::storage::settings_file::TomlSettingsStore;
use outlet_core::protocol::messages::HostCallbackMessage;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Power-strip monitoring plugin for a home-automation host controller.
#[derive(Debug, Parser)]
#[command(name = "outlet-plugin", version)]
struct Cli {
    /// Hostname or IP address of the host controller.
    #[arg(long, env = "OUTLET_HOST")]
    host: Option<String>,

    /// RPC port of the host controller.
    #[arg(long, env = "OUTLET_PORT")]
    port: Option<u16>,

    /// Friendly instance name announced during registration.
    #[arg(long, env = "OUTLET_INSTANCE")]
    instance: Option<String>,

    /// Path to the plugin config file.  Defaults to the platform config dir.
    #[arg(long, env = "OUTLET_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the device settings file.
    #[arg(long, env = "OUTLET_SETTINGS")]
    settings: Option<PathBuf>,
}

impl Cli {
    /// Overlays the CLI values that were given onto `config`.
    fn apply_to(&self, config: &mut PluginConfig) {
        if let Some(host) = &self.host {
            config.host.address = host.clone();
        }
        if let Some(port) = self.port {
            config.host.port = port;
        }
        if let Some(instance) = &self.instance {
            config.plugin.instance_name = instance.clone();
        }
        if let Some(settings) = &self.settings {
            config.storage.settings_file = Some(settings.clone());
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config_file_path().context("cannot locate the plugin config directory")?,
    };
    let mut config = load_config_from(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    cli.apply_to(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.plugin.log_level)),
        )
        .init();

    info!(
        host = %config.host.address,
        port = config.host.port,
        instance = %config.plugin.instance_name,
        "outlet plugin starting"
    );

    // ── Device registry ───────────────────────────────────────────────────────
    let settings_path = settings_file_path(&config).context("cannot locate the settings file")?;
    let store = Arc::new(TomlSettingsStore::new(&settings_path));
    let registry = Arc::new(
        DeviceRegistry::load(store, Arc::new(FixedKeyCodec::default()))
            .with_context(|| format!("failed to load settings from {}", settings_path.display()))?,
    );

    // ── Session ───────────────────────────────────────────────────────────────
    let connector = TcpChannelConnector::new(ChannelOptions {
        connect_timeout: config.plugin.call_timeout(),
        call_timeout: config.plugin.call_timeout(),
    });
    debug!(plugin_id = connector.plugin_id(), "session identity assigned");
    let session = Arc::new(SessionManager::new(
        Arc::new(connector),
        config.plugin.instance_name.clone(),
    ));
    session.set_debug_logging(registry.get_debug_logging());

    let _settings_subscription = {
        let registry_ref = Arc::downgrade(&registry);
        let session = Arc::clone(&session);
        registry.subscribe(move || {
            if let Some(registry) = registry_ref.upgrade() {
                let debug_logging = registry.get_debug_logging();
                session.set_debug_logging(debug_logging);
                info!(devices = registry.len(), debug_logging, "device settings changed");
            }
        })
    };

    connect_with_retry(&session, &config).await?;
    session
        .log_info(format!("managing {} device(s)", registry.len()))
        .await;

    if let Some(callbacks) = session.take_callbacks() {
        tokio::spawn(drain_callbacks(callbacks));
    }

    // ── Run until stopped ─────────────────────────────────────────────────────
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("received Ctrl+C; shutting down"),
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        },
        _ = session.wait_for_shutdown_or_disconnect() => {
            warn!("host connection lost; shutting down");
        }
    }

    session.shutdown().await;
    registry.close();
    info!("outlet plugin stopped");
    Ok(())
}

/// Runs the connect sequence up to `connect_attempts` times.
async fn connect_with_retry(session: &SessionManager, config: &PluginConfig) -> anyhow::Result<()> {
    let attempts = config.plugin.connect_attempts.max(1);
    let mut attempt = 1;
    loop {
        match session.connect(&config.host.address, config.host.port).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                warn!(
                    attempt,
                    attempts,
                    error = %e,
                    "connect failed; retrying in {:?}",
                    config.plugin.retry_interval()
                );
                tokio::time::sleep(config.plugin.retry_interval()).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "could not connect to host at {}:{} after {attempts} attempt(s)",
                        config.host.address, config.host.port
                    )
                })
            }
        }
    }
}

/// Host callbacks drive device polling, which lives outside this crate; they
/// are only traced here.
async fn drain_callbacks(mut callbacks: mpsc::Receiver<HostCallbackMessage>) {
    while let Some(callback) = callbacks.recv().await {
        debug!(
            method = %callback.method,
            bytes = callback.payload.len(),
            "host callback received"
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
