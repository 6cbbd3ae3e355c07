//! Configuration file resolution and TOML loading

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "IMGCLASS_CONFIG";

/// File name looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "imgclass.toml";

/// Where the active configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Path given on the command line
    CommandLine(PathBuf),
    /// Path taken from the environment variable
    Environment(PathBuf),
    /// Platform config file (`~/.config/imgclass/imgclass.toml` and friends)
    PlatformFile(PathBuf),
    /// No file found; compiled defaults apply
    Defaults,
}

impl ConfigSource {
    /// Config file path, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::CommandLine(p)
            | ConfigSource::Environment(p)
            | ConfigSource::PlatformFile(p) => Some(p),
            ConfigSource::Defaults => None,
        }
    }
}

/// Resolve the config file following the priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. Platform config file
/// 4. Compiled defaults (fallback)
///
/// Explicit paths (1 and 2) are returned even if the file does not exist so
/// that loading reports the missing file instead of silently using defaults.
pub fn resolve_config_source(cli_arg: Option<&Path>, env_var_name: &str) -> ConfigSource {
    if let Some(path) = cli_arg {
        return ConfigSource::CommandLine(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return ConfigSource::Environment(PathBuf::from(path));
        }
    }

    if let Some(path) = platform_config_file() {
        if path.exists() {
            return ConfigSource::PlatformFile(path);
        }
    }

    ConfigSource::Defaults
}

/// Platform config file location
fn platform_config_file() -> Option<PathBuf> {
    if cfg!(target_os = "linux") {
        let user_config = dirs::config_dir().map(|d| d.join("imgclass").join(CONFIG_FILE_NAME));
        if let Some(path) = user_config {
            if path.exists() {
                return Some(path);
            }
        }
        Some(PathBuf::from("/etc/imgclass").join(CONFIG_FILE_NAME))
    } else {
        dirs::config_dir().map(|d| d.join("imgclass").join(CONFIG_FILE_NAME))
    }
}

/// Read and parse a TOML file into `T`
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::Config(format!("Config file not found: {}", path.display()))
        } else {
            Error::Io(e)
        }
    })?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Load `T` from the resolved source, or `T::default()` when there is none
pub fn load_or_default<T: DeserializeOwned + Default>(source: &ConfigSource) -> Result<T> {
    match source.path() {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration file");
            load_toml(path)
        }
        None => {
            tracing::info!("No configuration file found, using compiled defaults");
            Ok(T::default())
        }
    }
}

/// Serialize `value` as TOML and write it atomically (temp file + rename)
pub fn write_toml<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(value)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
