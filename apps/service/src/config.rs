use std::{env, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not read config file: {0}")]
    Read(std::io::Error),
    #[error("could not write config file: {0}")]
    Write(std::io::Error),
    #[error("could not parse config file: {0}")]
    Parse(toml::de::Error),
    #[error("could not serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("no usable config directory")]
    ConfigPathUnavailable,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub probes: ProbeConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Hard upper bound for one ICMP probe, seconds.
    pub timeout_seconds: u64,
    /// TCP connect timeout, milliseconds.
    pub tcp_timeout_millis: u64,
    /// Cap on concurrently running probes across all maps.
    pub max_in_flight: usize,
    /// Bulk checks report members still unfinished after this as timed out.
    pub bulk_deadline_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig { path: "pulsemap.db".to_string() },
            probes: ProbeConfig {
                timeout_seconds: 5,
                tcp_timeout_millis: 1000,
                max_in_flight: 64,
                bulk_deadline_seconds: 10,
            },
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/pulsemap/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("pulsemap/config.toml"))
}

impl Config {
    /// Read the config from file, creating one with defaults on first run.
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::Read)?;
            toml::from_str(raw_string.as_str()).map_err(Error::Parse)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str = toml::to_string_pretty(self).map_err(Error::Serialize)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::Write)?;
        }

        fs::write(path, config_str).map_err(Error::Write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_roundtrip_through_toml() {
        let config = Config::default();
        let raw = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.probes.timeout_seconds, config.probes.timeout_seconds);
        assert_eq!(parsed.database.path, config.database.path);
    }

    #[test]
    fn first_run_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::from_config(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(config.probes.max_in_flight, 64);
    }

    #[test]
    fn non_toml_extension_is_normalized() {
        assert_eq!(
            normalize_toml_path(path::Path::new("/tmp/pulsemap/config.yaml")),
            path::PathBuf::from("/tmp/pulsemap/config.toml")
        );
    }
}
