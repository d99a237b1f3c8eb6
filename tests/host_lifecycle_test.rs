// Integration tests for tool host lifecycle: reload, child-process hosts and
// cancellation of in-flight calls
#![cfg(unix)]

use anyhow::Result;
use marten::config::StaticHostSource;
use marten::conversation::Conversation;
use marten::errors::{HostError, OrchestratorError};
use marten::orchestrator::ToolCallOrchestrator;
use marten::providers::{ScriptedProvider, ScriptedResponse};
use marten::stream::StreamDialect;
use marten::tools::approval::AllowAll;
use marten::tools::hosts::{HostConfig, HostObserver, HostStatus, ToolHostManager};
use marten::tools::permissions::PermissionStore;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Line-oriented JSON-RPC tool server. TOOL names the single tool it offers;
/// SLOW makes tools/call hang.
const SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-06-18","capabilities":{},"serverInfo":{"name":"sh"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"%s","inputSchema":{"type":"object"}}]}}\n' "$id" "$TOOL" ;;
    *'"method":"tools/call"'*)
      [ -n "$SLOW" ] && sleep 30
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"%s done"}]}}\n' "$id" "$TOOL" ;;
  esac
done
"#;

fn server(tool: &str) -> HostConfig {
    HostConfig::child_process("sh", vec!["-c".to_string(), SERVER.to_string()])
        .with_env("TOOL", tool)
}

#[derive(Default)]
struct Events(Mutex<Vec<String>>);

impl Events {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl HostObserver for Events {
    fn on_disconnected(&self, host_id: &str, tool_count: usize) {
        self.0
            .lock()
            .unwrap()
            .push(format!("disconnected {} {}", host_id, tool_count));
    }

    fn on_failed(&self, host_id: &str, _error: &str) {
        self.0.lock().unwrap().push(format!("failed {}", host_id));
    }
}

#[tokio::test]
async fn test_reload_child_process_hosts() -> Result<()> {
    let source = Arc::new(StaticHostSource::new(BTreeMap::from([
        ("alpha".to_string(), server("alpha_tool")),
        ("beta".to_string(), server("beta_tool")),
    ])));
    let events = Arc::new(Events::default());
    let manager = ToolHostManager::new(source.clone()).with_observer(events.clone());

    let report = manager.reload().await?;
    assert_eq!(report.added, vec!["alpha", "beta"]);
    let output = manager.execute_tool("beta_tool", json!({})).await?;
    assert_eq!(output.content, "beta_tool done");

    source.remove("beta");
    source.insert("gamma", server("gamma_tool"));
    source.insert(
        "broken",
        HostConfig::child_process("/nonexistent/marten-host", vec![]),
    );
    let report = manager.reload().await?;
    assert_eq!(report.added, vec!["broken", "gamma"]);
    assert_eq!(report.removed, vec!["beta"]);
    assert_eq!(report.existing, vec!["alpha"]);
    assert!(events.take().contains(&"disconnected beta 1".to_string()));

    assert!(matches!(
        manager.execute_tool("beta_tool", json!({})).await,
        Err(HostError::ToolNotFound(_))
    ));
    assert_eq!(
        manager.execute_tool("gamma_tool", json!({})).await?.content,
        "gamma_tool done"
    );

    let broken = manager.connection("broken").await.unwrap();
    assert_eq!(broken.status, HostStatus::Failed);
    assert!(broken.last_error.is_some());
    assert!(broken.tool_names.is_empty());

    manager.shutdown_all().await;
    assert!(manager.tool_descriptors().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cancel_stops_child_process_host() -> Result<()> {
    let source = Arc::new(StaticHostSource::new(BTreeMap::from([(
        "slow".to_string(),
        server("slow_tool").with_env("SLOW", "1"),
    )])));
    let hosts = Arc::new(ToolHostManager::new(source));
    hosts.reload().await?;

    let provider = Arc::new(ScriptedProvider::new(
        StreamDialect::Anthropic,
        vec![ScriptedResponse::anthropic_tool_call(
            "",
            "call1",
            "slow_tool",
            &["{}"],
        )],
    ));
    let orchestrator = ToolCallOrchestrator::new(
        provider,
        hosts.clone(),
        Arc::new(tokio::sync::Mutex::new(PermissionStore::in_memory())),
        Arc::new(AllowAll),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let mut conversation = Conversation::new();
    conversation.push_user("run the slow tool");
    let tools = hosts.tool_descriptors().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let started = Instant::now();
    let result = orchestrator
        .run_turn(&mut conversation, &tools, &tx, &cancel)
        .await;

    assert!(matches!(result, Err(OrchestratorError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(conversation.len(), 1);
    assert!(hosts.connection("slow").await.is_none());
    assert!(hosts.tool_descriptors().await.is_empty());
    Ok(())
}
