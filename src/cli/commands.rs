// Slash command handling

use anyhow::Result;

use crate::tools::hosts::ToolHostManager;
use crate::tools::permissions::PermissionStore;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    /// Start a fresh conversation
    Clear,
    Tools,
    Hosts,
    Reload,
    Enable(String),
    Disable(String),
    /// Drop every remembered approval
    Forget,
    AlwaysAsk(bool),
}

impl Command {
    pub fn parse(input: &str) -> Option<Self> {
        let mut words = input.split_whitespace();
        let command = match (words.next()?, words.next()) {
            ("/help", None) => Command::Help,
            ("/quit" | "/exit", None) => Command::Quit,
            ("/clear", None) => Command::Clear,
            ("/tools", None) => Command::Tools,
            ("/hosts", None) => Command::Hosts,
            ("/reload", None) => Command::Reload,
            ("/enable", Some(id)) => Command::Enable(id.to_string()),
            ("/disable", Some(id)) => Command::Disable(id.to_string()),
            ("/forget", None) => Command::Forget,
            ("/always-ask", Some("on")) => Command::AlwaysAsk(true),
            ("/always-ask", Some("off")) => Command::AlwaysAsk(false),
            _ => return None,
        };
        if words.next().is_some() {
            return None;
        }
        Some(command)
    }
}

/// Run a command that does not touch the conversation
pub async fn handle_command(
    command: Command,
    hosts: &ToolHostManager,
    permissions: &Mutex<PermissionStore>,
) -> Result<String> {
    match command {
        Command::Help => Ok(format_help()),
        Command::Quit => Ok("Goodbye!".to_string()),
        Command::Clear => Ok("Conversation cleared".to_string()),
        Command::Tools => Ok(format_tools(hosts).await),
        Command::Hosts => Ok(format_hosts(hosts).await),
        Command::Reload => {
            let report = hosts.reload().await?;
            Ok(format!(
                "added: {}\nremoved: {}\nexisting: {}\nskipped: {}",
                list(&report.added),
                list(&report.removed),
                list(&report.existing),
                list(&report.skipped),
            ))
        }
        Command::Enable(id) => {
            let count = hosts.enable(&id).await?;
            Ok(format!("Host '{}' enabled ({} tools)", id, count))
        }
        Command::Disable(id) => {
            let report = hosts.disable(&id).await?;
            Ok(format!(
                "Host '{}' disabled ({} tools removed)",
                id, report.tool_count
            ))
        }
        Command::Forget => {
            permissions.lock().await.clear()?;
            Ok("Remembered approvals cleared".to_string())
        }
        Command::AlwaysAsk(on) => {
            permissions.lock().await.set_always_ask(on)?;
            Ok(format!("Always ask: {}", if on { "on" } else { "off" }))
        }
    }
}

fn format_help() -> String {
    r#"Available commands:
  /help              - Show this help message
  /quit              - Exit (Ctrl-D also works)
  /clear             - Start a new conversation
  /tools             - List available tools
  /hosts             - Show tool host status
  /reload            - Re-read host configuration
  /enable <host>     - Re-enable a disabled host
  /disable <host>    - Disconnect a host and keep it off
  /forget            - Clear remembered approvals
  /always-ask on|off - Ask before every tool call

Ctrl-C cancels the running turn."#
        .to_string()
}

async fn format_tools(hosts: &ToolHostManager) -> String {
    let tools = hosts.tool_descriptors().await;
    if tools.is_empty() {
        return "No tools available".to_string();
    }
    tools
        .iter()
        .map(|t| format!("{} ({}): {}", t.name, t.owner_host_id, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn format_hosts(hosts: &ToolHostManager) -> String {
    let connections = hosts.connections().await;
    if connections.is_empty() {
        return "No tool hosts".to_string();
    }
    connections
        .iter()
        .map(|c| {
            let mut line = format!(
                "{} [{}] {} - {} tools",
                c.host_id,
                c.transport_kind,
                c.status,
                c.tool_names.len()
            );
            if let Some(error) = &c.last_error {
                line.push_str(&format!(" ({})", error));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn list(ids: &[String]) -> String {
    if ids.is_empty() {
        "-".to_string()
    } else {
        ids.join(", ")
    }
}
