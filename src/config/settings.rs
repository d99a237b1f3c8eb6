// Configuration structs

use super::constants::*;
use crate::stream::StreamDialect;
use crate::tools::hosts::HostConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Model backend connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub dialect: StreamDialect,

    /// Defaults to the dialect's public endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Defaults per dialect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature; the backend's default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_backend_timeout() -> u64 {
    DEFAULT_BACKEND_TIMEOUT_SECS
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            dialect: StreamDialect::default(),
            base_url: None,
            model: None,
            api_key: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            system_prompt: None,
            timeout_secs: DEFAULT_BACKEND_TIMEOUT_SECS,
        }
    }
}

impl BackendConfig {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(match self.dialect {
            StreamDialect::Anthropic => DEFAULT_ANTHROPIC_URL,
            StreamDialect::OpenAi => DEFAULT_OPENAI_URL,
            StreamDialect::Ollama => DEFAULT_OLLAMA_URL,
        })
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(match self.dialect {
            StreamDialect::Anthropic => DEFAULT_ANTHROPIC_MODEL,
            StreamDialect::OpenAi => DEFAULT_OPENAI_MODEL,
            StreamDialect::Ollama => DEFAULT_OLLAMA_MODEL,
        })
    }

    /// Provider-specific environment variable holding the API key
    fn key_variable(&self) -> Option<&'static str> {
        match self.dialect {
            StreamDialect::Anthropic => Some("ANTHROPIC_API_KEY"),
            StreamDialect::OpenAi => Some("OPENAI_API_KEY"),
            StreamDialect::Ollama => None,
        }
    }
}

/// Feature flags configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    /// Auto-approve all tools (skip confirmation prompts)
    /// ⚠️  Use with caution - tools can modify files
    #[serde(default)]
    pub auto_approve_tools: bool,

    /// Ask before every tool call, ignoring remembered approvals
    #[serde(default)]
    pub always_ask: bool,

    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// Enable debug logging for troubleshooting
    #[serde(default)]
    pub debug_logging: bool,
}

fn default_max_tool_rounds() -> usize {
    DEFAULT_MAX_TOOL_ROUNDS
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            auto_approve_tools: false, // Safe default: require confirmations
            always_ask: false,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            debug_logging: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// Defaults to ~/.marten/permissions.json
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
}

fn default_ttl_hours() -> i64 {
    crate::tools::permissions::DEFAULT_TTL_HOURS
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            path: None,
            ttl_hours: default_ttl_hours(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub features: FeaturesConfig,

    #[serde(default)]
    pub permissions: PermissionsConfig,

    /// Tool hosts by id
    #[serde(default)]
    pub hosts: BTreeMap<String, HostConfig>,
}

impl Config {
    /// Validate configuration and return helpful errors.
    ///
    /// Host entries are not checked here: a bad host is reported when it
    /// fails to connect and must not keep the others from starting.
    pub fn validate(&self) -> Result<()> {
        if self.backend.max_tokens == 0 {
            bail!("backend.max_tokens must be greater than 0");
        }
        if let Some(temperature) = self.backend.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                bail!("backend.temperature must be between 0 and 2, got {}", temperature);
            }
        }
        if self.backend.timeout_secs == 0 {
            bail!("backend.timeout_secs must be greater than 0");
        }
        let url = self.backend.base_url();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("backend.base_url must be an http or https URL, got '{}'", url);
        }
        if self.features.max_tool_rounds == 0 {
            bail!("features.max_tool_rounds must be at least 1");
        }
        if self.permissions.ttl_hours <= 0 {
            bail!("permissions.ttl_hours must be positive");
        }
        Ok(())
    }

    /// Fill in values from the environment: `MARTEN_API_KEY` (falling back
    /// to the dialect's usual variable) when no key is configured, and
    /// `MARTEN_MODEL` over the configured model.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.backend.api_key.is_none() {
            self.backend.api_key = lookup("MARTEN_API_KEY")
                .or_else(|| self.backend.key_variable().and_then(&lookup));
        }
        if let Some(model) = lookup("MARTEN_MODEL") {
            self.backend.model = Some(model);
        }
    }

    pub fn permissions_path(&self) -> Result<PathBuf> {
        match &self.permissions.path {
            Some(path) => Ok(path.clone()),
            None => Ok(dirs::home_dir()
                .context("Could not determine home directory")?
                .join(CONFIG_DIR)
                .join(PERMISSIONS_FILE)),
        }
    }

    /// Configured hosts plus the built-in host, unless the file defines its
    /// own `builtin` entry
    pub fn effective_hosts(&self) -> BTreeMap<String, HostConfig> {
        let mut hosts = self.hosts.clone();
        hosts
            .entry(BUILTIN_HOST_ID.to_string())
            .or_insert_with(HostConfig::in_process);
        hosts
    }
}
