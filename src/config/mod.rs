//! Configuration management for Harbor
//!
//! This module handles loading, parsing, and validating the startup
//! configuration from TOML files: socket naming, shared-memory formats,
//! hardware buffer integration preferences, keyboard layout and the
//! initial output topology.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::buffer::ShmFormat;
use crate::error::CompositorError;

/// Main configuration struct containing all Harbor settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HarborConfig {
    /// Listening socket settings
    #[serde(default)]
    pub socket: SocketConfig,

    /// Shared-memory buffer settings
    #[serde(default)]
    pub shm: ShmConfig,

    /// Hardware buffer integration settings
    #[serde(default)]
    pub hardware: HardwareConfig,

    /// Keymap and repeat settings for seat keyboards
    #[serde(default)]
    pub keyboard: KeyboardConfig,

    /// Outputs created at startup; the first one becomes the default output
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,

    /// General compositor settings
    #[serde(default)]
    pub general: GeneralConfig,
}

/// Listening socket configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct SocketConfig {
    /// Socket name relative to XDG_RUNTIME_DIR (auto-allocated when unset)
    pub name: Option<String>,
}

/// Shared-memory configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ShmConfig {
    /// Formats advertised on top of argb8888 and xrgb8888
    pub additional_formats: Vec<ShmFormat>,
}

/// Hardware buffer integration configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct HardwareConfig {
    /// Advertise the hardware-integration extension to clients
    pub use_extension: bool,

    /// Preferred client buffer integrations, used when the environment names none
    pub client_buffer_integrations: Vec<String>,

    /// Server buffer integration, used when the environment names none
    pub server_buffer_integration: Option<String>,
}

/// Keyboard configuration (xkb rule names plus repeat behaviour)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct KeyboardConfig {
    pub rules: String,
    pub model: String,
    pub layout: String,
    pub variant: String,
    pub options: Option<String>,

    /// Keyboard repeat rate (per second)
    pub repeat_rate: i32,

    /// Keyboard repeat delay (milliseconds)
    pub repeat_delay: i32,
}

/// A statically configured output
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
    /// Refresh rate in mHz
    pub refresh_mhz: i32,
    pub scale: i32,
    pub physical_width_mm: i32,
    pub physical_height_mm: i32,
}

/// General compositor settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Name of the seat created when no seat was set up explicitly
    pub seat_name: String,

    /// Keep a copy of the clipboard selection when its owner goes away
    pub retain_selection: bool,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            rules: String::new(),
            model: String::new(),
            layout: "us".to_string(),
            variant: String::new(),
            options: None,
            repeat_rate: 25,
            repeat_delay: 600,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            name: "HARBOR-1".to_string(),
            make: "Harbor".to_string(),
            model: "Virtual".to_string(),
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
            refresh_mhz: 60_000,
            scale: 1,
            physical_width_mm: 520,
            physical_height_mm: 290,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            seat_name: "seat0".to_string(),
            retain_selection: false,
        }
    }
}

impl HarborConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let expanded_path = expand_home(path.as_ref())?;

        let load_error = |reason: String| CompositorError::Config {
            path: expanded_path.clone(),
            reason,
        };
        let contents = fs::read_to_string(&expanded_path).map_err(|e| load_error(e.to_string()))?;
        let config: HarborConfig = toml::from_str(&contents).map_err(|e| load_error(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.socket.name {
            if name.trim().is_empty() {
                anyhow::bail!("Invalid socket name: must not be empty");
            }
        }

        if self.keyboard.repeat_rate < 0 {
            anyhow::bail!("Invalid repeat_rate: must not be negative");
        }
        if self.keyboard.repeat_delay < 0 {
            anyhow::bail!("Invalid repeat_delay: must not be negative");
        }

        if self.general.seat_name.is_empty() {
            anyhow::bail!("Invalid seat_name: must not be empty");
        }

        for (index, output) in self.outputs.iter().enumerate() {
            if output.width <= 0 || output.height <= 0 {
                anyhow::bail!("Invalid output {}: mode must have a positive size", output.name);
            }
            if output.scale < 1 {
                anyhow::bail!("Invalid output {}: scale must be at least 1", output.name);
            }
            if self.outputs[..index].iter().any(|o| o.name == output.name) {
                anyhow::bail!("Duplicate output name: {}", output.name);
            }
        }

        for name in &self.hardware.client_buffer_integrations {
            if name.contains(';') {
                anyhow::bail!("Invalid client buffer integration name: {}", name);
            }
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

/// Expand a leading `~` to the home directory
fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Ok(Path::new(&home).join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}
