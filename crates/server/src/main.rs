//! usb-rights Server
//!
//! Standalone maintenance daemon for the USB access-rights store. Keeps the
//! grant database tidy by running the cleanup sweep on an interval; the
//! interactive grant path is driven by embedders of the library crate.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use server::audit::AuditLog;
use server::config::ServerConfig;
use server::consent::NoConsentUi;
use server::manager::{RightsManager, SWEEP_ALL};
use server::providers::{Identity, LocalIdentity, NoAppMetadata, PasswdAccounts, SystemClock};
use store::RightsStore;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "usb-rights-server")]
#[command(author, version, about = "USB access-rights maintenance service")]
#[command(long_about = "
Keeps the USB access-rights database tidy: removes session grants, expired
timed grants, and grants held by uninstalled apps or deleted OS accounts.

EXAMPLES:
    # Run the periodic sweep with default config
    usb-rights-server

    # Run one sweep and exit
    usb-rights-server --once

    # Run with custom config
    usb-rights-server --config /path/to/server.toml

    # Run with debug logging
    usb-rights-server --log-level debug

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-rights/server.toml
    3. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Run a single cleanup sweep and exit
    #[arg(long)]
    once: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = ServerConfig::default();
        let path = ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.service.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-rights Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.storage.database_path.display());

    let store = Arc::new(
        RightsStore::open(&config.storage.database_path)
            .context("Failed to open rights database")?,
    );
    let identity = Arc::new(LocalIdentity);
    let mut manager = RightsManager::new(
        store,
        Arc::new(NoAppMetadata),
        identity.clone(),
        Arc::new(PasswdAccounts::new()),
        Arc::new(NoConsentUi),
        Arc::new(SystemClock),
    )
    .with_consent_timeout(Duration::from_secs(config.rights.consent_timeout_secs));
    if config.audit.enabled {
        let audit = AuditLog::open(&config.audit).context("Failed to open audit log")?;
        manager = manager.with_audit(Arc::new(audit));
    }

    if args.once {
        manager
            .tidy_up(identity.current_user_id(), SWEEP_ALL)
            .context("Cleanup sweep failed")?;
        info!("Cleanup sweep complete");
        return Ok(());
    }

    let interval = Duration::from_secs(config.service.sweep_interval_secs.max(1));
    info!("Sweeping every {:?}, press Ctrl+C to stop", interval);
    loop {
        if let Err(e) = manager.tidy_up(identity.current_user_id(), SWEEP_ALL) {
            tracing::error!("cleanup sweep failed: {:#}", e);
        }
        std::thread::sleep(interval);
    }
}
