// Tool host configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// How a host is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Tools compiled into this process
    #[serde(alias = "builtin")]
    InProcess,
    /// Local process speaking JSON-RPC over stdin/stdout
    #[serde(alias = "stdio")]
    ChildProcess,
    /// Long-lived SSE stream plus POSTed requests
    #[serde(alias = "sse")]
    NetworkStream,
    /// One HTTP POST per request
    #[serde(alias = "http")]
    NetworkRequest,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TransportKind::InProcess => "in-process",
            TransportKind::ChildProcess => "child-process",
            TransportKind::NetworkStream => "network-stream",
            TransportKind::NetworkRequest => "network-request",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    pub transport: TransportKind,

    /// Command to execute (child-process)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Command arguments (child-process)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Extra environment variables (child-process)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Working directory (child-process)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Endpoint (network-stream, network-request)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Extra request headers (network-stream, network-request)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-request timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl HostConfig {
    fn with_transport(transport: TransportKind) -> Self {
        Self {
            transport,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            url: None,
            headers: BTreeMap::new(),
            enabled: true,
            timeout_secs: None,
        }
    }

    pub fn in_process() -> Self {
        Self::with_transport(TransportKind::InProcess)
    }

    pub fn child_process(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: Some(command.into()),
            args,
            ..Self::with_transport(TransportKind::ChildProcess)
        }
    }

    pub fn network_stream(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::with_transport(TransportKind::NetworkStream)
        }
    }

    pub fn network_request(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::with_transport(TransportKind::NetworkRequest)
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    /// Validate the configuration
    pub fn validate(&self, name: &str) -> anyhow::Result<()> {
        match self.transport {
            TransportKind::InProcess => {}
            TransportKind::ChildProcess => {
                if self.command.as_deref().map_or(true, str::is_empty) {
                    anyhow::bail!(
                        "Tool host '{}': child-process transport requires 'command' field",
                        name
                    );
                }
            }
            TransportKind::NetworkStream | TransportKind::NetworkRequest => {
                let Some(url) = &self.url else {
                    anyhow::bail!(
                        "Tool host '{}': {} transport requires 'url' field",
                        name,
                        self.transport
                    );
                };
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    anyhow::bail!("Tool host '{}': url must be http or https, got '{}'", name, url);
                }
            }
        }
        Ok(())
    }

    /// Copy with `${VAR}` placeholders replaced from the process environment
    pub fn expanded(&self) -> Self {
        self.expanded_with(|name| std::env::var(name).ok())
    }

    pub fn expanded_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let expand = |s: &String| expand_env_vars(s, &lookup);
        Self {
            transport: self.transport,
            command: self.command.as_ref().map(expand),
            args: self.args.iter().map(expand).collect(),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), expand(v)))
                .collect(),
            cwd: self
                .cwd
                .as_ref()
                .map(|p| PathBuf::from(expand(&p.to_string_lossy().into_owned()))),
            url: self.url.as_ref().map(expand),
            headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), expand(v)))
                .collect(),
            enabled: self.enabled,
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Replace `${NAME}` placeholders. Unset variables expand to an empty string.
pub fn expand_env_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    static PLACEHOLDER: OnceLock<regex::Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid")
    });

    re.replace_all(input, |caps: &regex::Captures| {
        let name = &caps[1];
        lookup(name).unwrap_or_else(|| {
            warn!(variable = %name, "Environment variable not set, expanding to empty string");
            String::new()
        })
    })
    .into_owned()
}
