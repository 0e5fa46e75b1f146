//! Configuration management

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Output settings
    pub general: GeneralConfig,
    /// Bundle walk settings
    pub bundle: BundleConfig,
    /// Live image settings
    pub live: LiveConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory receiving Payload/ and the packaged .ipa
    pub output_dir: PathBuf,
    /// Zip Payload/ into an .ipa when the run finishes
    pub package: bool,
    /// Keep Payload/ after packaging
    pub keep_payload: bool,
    /// Copy source modification times onto written files
    pub preserve_mtime: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            package: true,
            keep_payload: false,
            preserve_mtime: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BundleConfig {
    /// Directory names never copied out of the bundle
    pub skip_dirs: Vec<String>,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            skip_dirs: vec!["_CodeSignature".to_string(), "SC_Info".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LiveConfig {
    /// Address the captured memory images were mapped at
    pub dump_base: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            dump_base: 0x1_0000_0000,
        }
    }
}

/// Get the config directory path for the current platform
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        // Linux: ~/.config/unseal
        dirs_next().map(|p| p.join("unseal"))
    }

    #[cfg(target_os = "windows")]
    {
        // Windows: %APPDATA%\unseal
        std::env::var("APPDATA")
            .ok()
            .map(|p| PathBuf::from(p).join("unseal"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        // macOS and the rest: ~/.config/unseal, like other CLI tools
        std::env::var("HOME")
            .ok()
            .map(|p| PathBuf::from(p).join(".config/unseal"))
    }
}

#[cfg(target_os = "linux")]
fn dirs_next() -> Option<PathBuf> {
    // Check XDG_CONFIG_HOME first, then fall back to ~/.config
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("HOME").ok().map(|p| PathBuf::from(p).join(".config")))
}

/// Get the config file path
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|p| p.join("config.toml"))
}

/// Default configuration file content, with comments
fn default_config() -> &'static str {
    r##"# unseal configuration

[general]
# Where Payload/ and the packaged .ipa are written
output_dir = "."
# Zip Payload/ into <name>.ipa when done
package = true
# Keep Payload/ next to the .ipa
keep_payload = false
# Copy modification times from the bundle onto written files
preserve_mtime = true

[bundle]
# Directories left out of the output
skip_dirs = ["_CodeSignature", "SC_Info"]

[live]
# Base address the memory images were captured at
dump_base = 0x100000000
"##
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist and parse. Without one the default location
    /// is used, a commented default file is created there if missing, and any
    /// problem with it falls back to the built-in defaults.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        if let Some(path) = path {
            let content = fs::read_to_string(path).map_err(|e| {
                AppError::Config(format!("cannot read {}: {}", path.display(), e))
            })?;
            return Self::parse(&content)
                .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)));
        }

        let Some(config_path) = config_file() else {
            warn!("Could not determine config directory, using defaults");
            return Ok(Config::default());
        };

        // Create config directory if it doesn't exist
        if let Some(config_dir) = config_path.parent()
            && !config_dir.exists()
            && let Err(e) = fs::create_dir_all(config_dir)
        {
            warn!("Could not create config directory: {}", e);
            return Ok(Config::default());
        }

        // Create default config if it doesn't exist
        if !config_path.exists()
            && let Err(e) = fs::write(&config_path, default_config())
        {
            warn!("Could not create config file: {}", e);
            return Ok(Config::default());
        }

        match fs::read_to_string(&config_path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => {
                    debug!("Loaded configuration from {}", config_path.display());
                    Ok(config)
                }
                Err(e) => {
                    warn!("Could not parse {}: {}", config_path.display(), e);
                    warn!("Using default configuration");
                    Ok(Config::default())
                }
            },
            Err(e) => {
                warn!("Could not read {}: {}", config_path.display(), e);
                Ok(Config::default())
            }
        }
    }

    fn parse(content: &str) -> Result<Self, toml_edit::de::Error> {
        toml_edit::de::from_str(content)
    }
}
