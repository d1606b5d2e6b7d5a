//! # Keystone Wayland Display Server Library
//!
//! The protocol core of a Wayland display server: client and surface
//! lifecycle, output management, the DMA-BUF import path, the optional
//! protocol extensions and a supervised XWayland server.
//!
//! ## Architecture
//!
//! Keystone is split into a pure core and a thin wire layer:
//! - `resource`: Per-client protocol object table with typed dispatch tags
//! - `compositor`: Client / surface / output graph, roles, seat focus
//! - `output`: Output layout and the primary-output rule
//! - `buffer`: DMA-BUF descriptors, format negotiation and GPU import
//! - `protocols`: layer-shell, presentation-time, viewporter and linux-dmabuf
//! - `xwayland`: XWayland process supervision and X11 window correlation
//! - `config`: Configuration parsing and validation
//! - `server`: wayland-server dispatch and the calloop event loop
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keystone::buffer::PassthroughImporter;
//! use keystone::{KeystoneConfig, KeystoneServer};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = KeystoneConfig::default();
//!     let server = KeystoneServer::new(&config, Box::new(PassthroughImporter::new()), None)?;
//!     server.run()
//! }
//! ```

pub mod buffer;
pub mod compositor;
pub mod config;
pub mod geometry;
pub mod ids;
pub mod output;
pub mod protocols;
pub mod resource;
pub mod server;
pub mod xwayland;

// Re-export main types for easy access
pub use compositor::{Compositor, CompositorEvent, CompositorObserver};
pub use config::KeystoneConfig;
pub use output::{Output, OutputInfo, OutputManager};
pub use protocols::ProtocolRegistry;
pub use resource::{ResourceKind, ResourceRegistry};
pub use server::KeystoneServer;
pub use xwayland::XWaylandSupervisor;

// Re-export common error types
pub use anyhow::{Context, Error, Result};

/// Version information for Keystone
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
pub const BUILD_DATE: &str = env!("BUILD_DATE");
pub const GIT_COMMIT: Option<&str> = option_env!("KEYSTONE_GIT_COMMIT");
