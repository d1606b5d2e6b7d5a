//! Configuration management for Keystone
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files. Every section has defaults, so an empty file (or no
//! file at all) gives a working headless server.

use crate::geometry::{Rectangle, Size};
use crate::output::OutputInfo;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration struct containing all Keystone settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeystoneConfig {
    /// General server settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Outputs created at startup
    #[serde(default = "default_outputs")]
    pub outputs: Vec<OutputConfig>,

    /// Linux DMA-BUF import
    #[serde(default)]
    pub dmabuf: DmabufConfig,

    #[serde(default)]
    pub layer_shell: ExtensionConfig,

    #[serde(default)]
    pub presentation: ExtensionConfig,

    #[serde(default)]
    pub viewporter: ExtensionConfig,

    /// XWayland configuration
    #[serde(default)]
    pub xwayland: XWaylandConfig,
}

/// General server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Socket name under `$XDG_RUNTIME_DIR`; `None` picks `wayland-N` automatically
    pub socket_name: Option<String>,

    /// Name advertised by `wl_seat`
    pub seat_name: String,

    /// Client dispatch interval in milliseconds
    pub dispatch_interval_ms: u64,

    /// Enable debug logging
    pub debug: bool,
}

/// One output created at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub name: String,
    pub make: String,
    pub model: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    /// Physical width in millimeters
    pub physical_width: i32,
    /// Physical height in millimeters
    pub physical_height: i32,
    pub scale: i32,
    /// Refresh rate in millihertz
    pub refresh_mhz: i32,
    pub enabled: bool,
    pub primary: bool,
}

/// DMA-BUF import settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DmabufConfig {
    pub enabled: bool,

    /// DRM render node opened for GPU import
    pub render_node: PathBuf,

    /// Import through GBM; when false buffers are only validated
    pub gpu_import: bool,
}

/// On/off switch shared by the simple extensions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtensionConfig {
    pub enabled: bool,
}

/// XWayland configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct XWaylandConfig {
    /// Enable XWayland support
    pub enabled: bool,

    /// Xwayland binary; searched in `PATH` and the usual locations when unset
    pub binary: Option<PathBuf>,

    /// Delay before restarting a crashed server (milliseconds)
    pub restart_delay_ms: u64,

    /// Consecutive crashes after which XWayland is disabled
    pub restart_limit: u32,

    /// Uptime after which the crash count resets (seconds)
    pub stable_period_secs: u64,

    /// How long to wait for the display number on startup (milliseconds)
    pub ready_timeout_ms: u64,

    /// Grace period for a stopping server before it is killed (milliseconds)
    pub stop_timeout_ms: u64,

    /// Additional arguments passed to Xwayland
    pub extra_args: Vec<String>,
}

impl Default for KeystoneConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            outputs: default_outputs(),
            dmabuf: DmabufConfig::default(),
            layer_shell: ExtensionConfig::default(),
            presentation: ExtensionConfig::default(),
            viewporter: ExtensionConfig::default(),
            xwayland: XWaylandConfig::default(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            socket_name: None,
            seat_name: "seat0".to_string(),
            dispatch_interval_ms: 4,
            debug: false,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        let info = OutputInfo::default();
        Self {
            name: info.name,
            make: info.make,
            model: info.model,
            x: info.geometry.x,
            y: info.geometry.y,
            width: info.geometry.width,
            height: info.geometry.height,
            physical_width: info.physical_size.width,
            physical_height: info.physical_size.height,
            scale: info.scale,
            refresh_mhz: info.refresh_mhz,
            enabled: info.enabled,
            primary: false,
        }
    }
}

impl Default for DmabufConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            render_node: PathBuf::from("/dev/dri/renderD128"),
            gpu_import: true,
        }
    }
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for XWaylandConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: None,
            restart_delay_ms: 1000,
            restart_limit: 3,
            stable_period_secs: 30,
            ready_timeout_ms: 10_000,
            stop_timeout_ms: 2000,
            extra_args: Vec::new(),
        }
    }
}

fn default_outputs() -> Vec<OutputConfig> {
    vec![OutputConfig::default()]
}

impl OutputConfig {
    pub fn to_info(&self) -> OutputInfo {
        OutputInfo {
            name: self.name.clone(),
            make: self.make.clone(),
            model: self.model.clone(),
            geometry: Rectangle::new(self.x, self.y, self.width, self.height),
            physical_size: Size::new(self.physical_width, self.physical_height),
            scale: self.scale,
            refresh_mhz: self.refresh_mhz,
            enabled: self.enabled,
            primary: self.primary,
        }
    }
}

impl GeneralConfig {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }
}

impl XWaylandConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn stable_period(&self) -> Duration {
        Duration::from_secs(self.stable_period_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Expands a leading `~` to `$HOME`.
pub fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Ok(Path::new(&home).join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

impl KeystoneConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let expanded_path = expand_home(path.as_ref())?;

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let mut config: KeystoneConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.dmabuf.render_node = expand_home(&config.dmabuf.render_node)?;
        if let Some(binary) = config.xwayland.binary.take() {
            config.xwayland.binary = Some(expand_home(&binary)?);
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.general.seat_name.is_empty() {
            anyhow::bail!("Invalid seat_name: must not be empty");
        }
        if self.general.dispatch_interval_ms == 0 || self.general.dispatch_interval_ms > 1000 {
            anyhow::bail!("Invalid dispatch_interval_ms: must be between 1 and 1000");
        }
        if let Some(socket) = &self.general.socket_name {
            if socket.is_empty() || socket.contains('/') {
                anyhow::bail!("Invalid socket_name: {:?}", socket);
            }
        }

        let mut names = HashSet::new();
        let mut primaries = 0;
        for output in &self.outputs {
            if !names.insert(output.name.as_str()) {
                anyhow::bail!("Duplicate output name: {}", output.name);
            }
            if output.width <= 0 || output.height <= 0 {
                anyhow::bail!(
                    "Invalid mode for output {}: {}x{}",
                    output.name,
                    output.width,
                    output.height
                );
            }
            if output.scale < 1 {
                anyhow::bail!("Invalid scale for output {}: {}", output.name, output.scale);
            }
            if output.refresh_mhz <= 0 {
                anyhow::bail!(
                    "Invalid refresh_mhz for output {}: {}",
                    output.name,
                    output.refresh_mhz
                );
            }
            if output.primary {
                primaries += 1;
            }
        }
        if primaries > 1 {
            anyhow::bail!("At most one output may be marked primary");
        }

        if self.xwayland.ready_timeout_ms == 0 {
            anyhow::bail!("Invalid xwayland.ready_timeout_ms: must be positive");
        }
        if self.xwayland.restart_delay_ms > 60_000 {
            anyhow::bail!("Invalid xwayland.restart_delay_ms: must be at most 60000");
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }
}


#[cfg(test)]
mod property_tests;
