//! Configuration
//!
//! Everything lives in a fixed `~/.slate` directory: `config.toml` (created
//! with defaults on first run), the command socket, and an optional `rc`
//! startup script evaluated through the interpreter at startup. Failure to
//! set the directory up is logged and non-fatal; the affected features
//! degrade instead of aborting.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Well-known paths under the configuration directory.
#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
    pub socket: PathBuf,
    pub rc: PathBuf,
    pub config: PathBuf,
}

impl Paths {
    /// Locate `~/.slate`, creating it if absent.
    pub fn discover() -> Result<Self> {
        let base = dirs::home_dir()
            .context("failed to determine home directory")?
            .join(".slate");
        fs::create_dir_all(&base)
            .with_context(|| format!("failed to create {}", base.display()))?;
        Ok(Self {
            socket: base.join("socket"),
            rc: base.join("rc"),
            config: base.join("config.toml"),
            base,
        })
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduler time slice per outer iteration, in milliseconds.
    pub time_slice_ms: u64,
    /// Whether the pointer-follow focus task is active.
    pub focus_follows_pointer: bool,
    /// Log every raw X event.
    pub trace_events: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            time_slice_ms: 20,
            focus_follows_pointer: true,
            trace_events: false,
        }
    }
}

impl Config {
    /// Load configuration, auto-generating the default file on first run.
    pub fn load(paths: &Paths) -> Result<Self> {
        if !paths.config.exists() {
            info!(
                "config file not found at {}, using defaults",
                paths.config.display()
            );
            if let Err(e) = Self::save_default(paths) {
                warn!("failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        let content =
            fs::read_to_string(&paths.config).context("failed to read config file")?;
        let config: Config = toml::from_str(&content).context("failed to parse config file")?;
        info!("configuration loaded from {}", paths.config.display());
        debug!("config: {:?}", config);
        Ok(config)
    }

    fn save_default(paths: &Paths) -> Result<()> {
        let toml_string = toml::to_string_pretty(&Self::default())
            .context("failed to serialize default config")?;
        fs::write(&paths.config, toml_string).context("failed to write default config file")?;
        info!("created default config file at {}", paths.config.display());
        Ok(())
    }
}
