// Configuration loader
// Loads ~/.marten/config.toml, then applies environment overrides

use super::constants::{CONFIG_DIR, CONFIG_FILE};
use super::settings::Config;
use crate::tools::hosts::HostConfig;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Load configuration from ~/.marten/config.toml
pub fn load_config() -> Result<Config> {
    load_config_from_path(&default_config_path()?)
}

/// Load and validate a config file. A missing file yields the defaults.
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let mut config = read_config_file(path)?;
    config.apply_env(|name| std::env::var(name).ok().filter(|v| !v.is_empty()));
    config
        .validate()
        .context("Configuration validation failed")?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!(path = %path.display(), "No config file, using defaults");
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Where `ToolHostManager::reload` gets the desired host set
pub trait HostConfigSource: Send + Sync {
    fn load_hosts(&self) -> Result<BTreeMap<String, HostConfig>>;
}

/// Re-reads the `[hosts]` tables of a config file on every call
pub struct FileHostSource {
    path: PathBuf,
}

impl FileHostSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HostConfigSource for FileHostSource {
    fn load_hosts(&self) -> Result<BTreeMap<String, HostConfig>> {
        Ok(read_config_file(&self.path)?.effective_hosts())
    }
}

/// In-memory host set, for embedders and tests
#[derive(Default)]
pub struct StaticHostSource {
    hosts: Mutex<BTreeMap<String, HostConfig>>,
}

impl StaticHostSource {
    pub fn new(hosts: BTreeMap<String, HostConfig>) -> Self {
        Self {
            hosts: Mutex::new(hosts),
        }
    }

    pub fn replace(&self, hosts: BTreeMap<String, HostConfig>) {
        if let Ok(mut current) = self.hosts.lock() {
            *current = hosts;
        }
    }

    pub fn insert(&self, host_id: impl Into<String>, config: HostConfig) {
        if let Ok(mut current) = self.hosts.lock() {
            current.insert(host_id.into(), config);
        }
    }

    pub fn remove(&self, host_id: &str) -> Option<HostConfig> {
        self.hosts.lock().ok().and_then(|mut h| h.remove(host_id))
    }
}

impl HostConfigSource for StaticHostSource {
    fn load_hosts(&self) -> Result<BTreeMap<String, HostConfig>> {
        self.hosts
            .lock()
            .map(|hosts| hosts.clone())
            .map_err(|_| anyhow::anyhow!("host source lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::BUILTIN_HOST_ID;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = load_config_from_path(&dir.path().join("absent.toml")).unwrap();
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[backend\n").unwrap();
        let err = load_config_from_path(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("config.toml"));
    }

    #[test]
    fn test_file_source_rereads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[hosts.a]\ntransport = \"stdio\"\ncommand = \"a\"\n").unwrap();

        let source = FileHostSource::new(&path);
        let hosts = source.load_hosts().unwrap();
        assert!(hosts.contains_key("a"));
        assert!(hosts.contains_key(BUILTIN_HOST_ID));

        fs::write(&path, "[hosts.b]\ntransport = \"sse\"\nurl = \"http://localhost:9\"\n").unwrap();
        let hosts = source.load_hosts().unwrap();
        assert!(!hosts.contains_key("a"));
        assert!(hosts.contains_key("b"));
    }

    #[test]
    fn test_static_source_mutation() {
        let source = StaticHostSource::default();
        source.insert("x", HostConfig::in_process());
        assert_eq!(source.load_hosts().unwrap().len(), 1);
        assert!(source.remove("x").is_some());
        assert!(source.load_hosts().unwrap().is_empty());
    }
}
