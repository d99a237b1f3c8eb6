// Project-wide constants
//
// Centralised here so file locations and defaults have one source of truth.
// Import via `use crate::config::constants::*;`.

/// Directory under the user's home holding config and permission files
pub const CONFIG_DIR: &str = ".marten";

pub const CONFIG_FILE: &str = "config.toml";

pub const PERMISSIONS_FILE: &str = "permissions.json";

/// Host id of the in-process tool host
pub const BUILTIN_HOST_ID: &str = "builtin";

/// Default maximum tokens per backend request.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Rounds that may all request tools before a turn is stopped.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 25;

/// Whole-request timeout for backend calls, streaming included.
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Ollama listens on 11434 unless told otherwise.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";
