//! # Keystone - Wayland Display Server
//!
//! Command-line entry point: loads the configuration, picks the buffer
//! importer and runs the server until SIGINT or SIGTERM.

use anyhow::Result;
use clap::Parser;
use keystone::buffer::{GbmImporter, GpuImporter, PassthroughImporter};
use keystone::config::{expand_home, KeystoneConfig};
use keystone::KeystoneServer;
use log::{error, info, warn};

#[derive(Parser)]
#[command(name = "keystone")]
#[command(about = "A Wayland display-server core with supervised XWayland")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/keystone/keystone.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Never touch the GPU; DMA-BUF imports are accepted without a device
    #[arg(long, default_value_t = false)]
    headless: bool,

    /// Do not start XWayland
    #[arg(long)]
    no_xwayland: bool,

    /// Socket name to bind instead of the first free wayland-N
    #[arg(long)]
    socket: Option<String>,
}

fn select_importer(config: &KeystoneConfig, headless: bool) -> Box<dyn GpuImporter> {
    if headless || !config.dmabuf.gpu_import {
        info!("🧱 Using pass-through buffer importer");
        return Box::new(PassthroughImporter::new());
    }
    let node = match expand_home(&config.dmabuf.render_node) {
        Ok(node) => node,
        Err(e) => {
            warn!("⚠️ Bad render node path: {}", e);
            return Box::new(PassthroughImporter::new());
        }
    };
    match GbmImporter::open(&node) {
        Ok(importer) => {
            info!("🎮 GBM importer on {}", node.display());
            Box::new(importer)
        }
        Err(e) => {
            warn!("⚠️ GBM unavailable on {} ({}), falling back to pass-through", node.display(), e);
            Box::new(PassthroughImporter::new())
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("🚀 Starting Keystone - Wayland Display Server");
    info!(
        "📄 Version: {} ({}, built {})",
        keystone::VERSION,
        keystone::GIT_COMMIT.unwrap_or("unknown commit"),
        keystone::BUILD_DATE
    );

    // Load configuration
    let config = match KeystoneConfig::load(&cli.config) {
        Ok(config) => {
            info!("✅ Configuration loaded from: {}", cli.config);
            config
        }
        Err(e) => {
            error!("❌ Failed to load configuration: {}", e);
            info!("📝 Using default configuration");
            KeystoneConfig::default()
        }
    };

    // Override config with CLI flags
    let mut config = config;
    if cli.debug {
        config.general.debug = true;
    }
    if cli.no_xwayland {
        config.xwayland.enabled = false;
        info!("🚫 XWayland disabled via CLI flag");
    }
    if let Some(socket) = cli.socket {
        info!("🔌 Socket name {} from CLI", socket);
        config.general.socket_name = Some(socket);
    }
    config.validate()?;

    let importer = select_importer(&config, cli.headless);
    let server = KeystoneServer::new(&config, importer, None)?;

    let signal = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("📴 Shutdown requested");
        signal.stop();
        signal.wakeup();
    })?;

    server.run()?;
    info!("👋 Keystone exited cleanly");
    Ok(())
}
