// Tool host manager - connection lifecycle and the merged tool registry
//
// Every host gets a slot holding its config and a HostConnection record.
// Slots carry a generation number; the registry is rebuilt in generation
// order whenever a host leaves, so a name taken over by a later host falls
// back to the earlier one instead of disappearing.

use super::config::{HostConfig, TransportKind};
use super::{connect_child_process, connect_network_request, connect_network_stream, ToolHost};
use crate::config::HostConfigSource;
use crate::errors::HostError;
use crate::tools::builtin::BuiltinHost;
use crate::tools::registry::ToolRegistry;
use crate::tools::types::{ToolDescriptor, ToolOutput};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Connected,
    Disabled,
    Failed,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HostStatus::Connected => "connected",
            HostStatus::Disabled => "disabled",
            HostStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostConnection {
    pub host_id: String,
    pub transport_kind: TransportKind,
    pub status: HostStatus,
    pub last_error: Option<String>,
    pub tool_names: BTreeSet<String>,
}

/// Lifecycle notifications. Called after the manager's state is updated.
pub trait HostObserver: Send + Sync {
    fn on_connected(&self, _connection: &HostConnection) {}

    fn on_disconnected(&self, _host_id: &str, _tool_count: usize) {}

    fn on_failed(&self, _host_id: &str, _error: &str) {}
}

/// Creates a connected host from its configuration
#[async_trait]
pub trait HostFactory: Send + Sync {
    async fn connect(&self, host_id: &str, config: &HostConfig)
        -> Result<Arc<dyn ToolHost>, HostError>;
}

/// Picks the host implementation by transport kind
pub struct DefaultHostFactory;

#[async_trait]
impl HostFactory for DefaultHostFactory {
    async fn connect(
        &self,
        host_id: &str,
        config: &HostConfig,
    ) -> Result<Arc<dyn ToolHost>, HostError> {
        let host: Arc<dyn ToolHost> = match config.transport {
            TransportKind::InProcess => Arc::new(BuiltinHost::with_default_tools(host_id).map_err(
                |e| HostError::ConnectFailed {
                    host: host_id.to_string(),
                    reason: format!("{:#}", e),
                },
            )?),
            TransportKind::ChildProcess => Arc::new(connect_child_process(host_id, config).await?),
            TransportKind::NetworkStream => {
                Arc::new(connect_network_stream(host_id, config).await?)
            }
            TransportKind::NetworkRequest => {
                Arc::new(connect_network_request(host_id, config).await?)
            }
        };
        Ok(host)
    }
}

#[derive(Debug)]
pub struct DisconnectReport {
    pub tool_count: usize,
    /// Teardown failure. The tools were removed regardless.
    pub error: Option<HostError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostOutcome {
    Connected { tool_count: usize },
    Failed { error: String },
}

/// Result of `reload`. Every list is sorted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReloadReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub existing: Vec<String>,
    /// In the config but disabled
    pub skipped: Vec<String>,
    /// Connect attempts made by this reload
    pub outcomes: BTreeMap<String, HostOutcome>,
}

struct HostSlot {
    host: Option<Arc<dyn ToolHost>>,
    connection: HostConnection,
    config: HostConfig,
    generation: u64,
}

#[derive(Default)]
struct ManagerState {
    slots: HashMap<String, HostSlot>,
    registry: ToolRegistry,
    /// Hosts that must not be connected until enabled again
    disabled: HashSet<String>,
    next_generation: u64,
}

impl ManagerState {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn rebuild_registry(&mut self) {
        let mut live: Vec<(u64, Arc<dyn ToolHost>)> = self
            .slots
            .values()
            .filter_map(|slot| slot.host.as_ref().map(|h| (slot.generation, Arc::clone(h))))
            .collect();
        live.sort_by_key(|(generation, _)| *generation);

        self.registry.clear();
        for (_, host) in live {
            self.registry.register_host(host);
        }
    }
}

pub struct ToolHostManager {
    state: Arc<RwLock<ManagerState>>,
    factory: Arc<dyn HostFactory>,
    source: Arc<dyn HostConfigSource>,
    observer: Option<Arc<dyn HostObserver>>,
}

impl ToolHostManager {
    pub fn new(source: Arc<dyn HostConfigSource>) -> Self {
        Self {
            state: Arc::new(RwLock::new(ManagerState::default())),
            factory: Arc::new(DefaultHostFactory),
            source,
            observer: None,
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn HostFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn HostObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Connect a host and merge its tools. An existing host with the same id
    /// is replaced. Returns the number of tools the host advertised.
    pub async fn connect(&self, host_id: &str, config: HostConfig) -> Result<usize, HostError> {
        if self.state.read().await.disabled.contains(host_id) {
            return Err(HostError::HostDisabled(host_id.to_string()));
        }

        let expanded = config.expanded();
        if let Err(e) = expanded.validate(host_id) {
            let err = HostError::InvalidConfig {
                host: host_id.to_string(),
                reason: format!("{:#}", e),
            };
            self.record_failure(host_id, config, &err).await;
            return Err(err);
        }

        let previous = {
            let mut state = self.state.write().await;
            let previous = state.slots.remove(host_id);
            if previous.is_some() {
                state.rebuild_registry();
            }
            previous
        };
        if let Some(host) = previous.and_then(|slot| slot.host) {
            debug!(host = %host_id, "Replacing connected host");
            if let Err(e) = host.shutdown().await {
                warn!(host = %host_id, "Teardown of replaced host failed: {}", e);
            }
        }

        match self.factory.connect(host_id, &expanded).await {
            Ok(host) => Ok(self.install(host_id, host, config).await),
            Err(e) => {
                self.record_failure(host_id, config, &e).await;
                Err(e)
            }
        }
    }

    async fn install(&self, host_id: &str, host: Arc<dyn ToolHost>, config: HostConfig) -> usize {
        let tool_names: BTreeSet<String> = host.tools().into_iter().map(|t| t.name).collect();
        let connection = HostConnection {
            host_id: host_id.to_string(),
            transport_kind: host.transport_kind(),
            status: HostStatus::Connected,
            last_error: None,
            tool_names,
        };

        let generation = {
            let mut state = self.state.write().await;
            let generation = state.next_generation();
            for name in state.registry.register_host(Arc::clone(&host)) {
                info!(host = %host_id, tool = %name, "Tool now served by this host");
            }
            state.slots.insert(
                host_id.to_string(),
                HostSlot {
                    host: Some(Arc::clone(&host)),
                    connection: connection.clone(),
                    config,
                    generation,
                },
            );
            generation
        };

        if let Some(token) = host.closed() {
            self.watch_exit(host_id.to_string(), generation, token);
        }

        info!(
            host = %host_id,
            transport = %connection.transport_kind,
            tools = connection.tool_names.len(),
            "Connected tool host"
        );
        if let Some(observer) = &self.observer {
            observer.on_connected(&connection);
        }
        connection.tool_names.len()
    }

    async fn record_failure(&self, host_id: &str, config: HostConfig, error: &HostError) {
        warn!(host = %host_id, "Failed to connect tool host: {}", error);
        {
            let mut state = self.state.write().await;
            let generation = state.next_generation();
            state.slots.insert(
                host_id.to_string(),
                HostSlot {
                    host: None,
                    connection: HostConnection {
                        host_id: host_id.to_string(),
                        transport_kind: config.transport,
                        status: HostStatus::Failed,
                        last_error: Some(error.to_string()),
                        tool_names: BTreeSet::new(),
                    },
                    config,
                    generation,
                },
            );
        }
        if let Some(observer) = &self.observer {
            observer.on_failed(host_id, &error.to_string());
        }
    }

    /// Turn an unexpected exit into an implicit disconnect
    fn watch_exit(&self, host_id: String, generation: u64, token: CancellationToken) {
        let state = Arc::clone(&self.state);
        let observer = self.observer.clone();
        tokio::spawn(async move {
            token.cancelled().await;

            let reason = "host exited unexpectedly".to_string();
            {
                let mut state = state.write().await;
                let Some(slot) = state.slots.get_mut(&host_id) else {
                    return;
                };
                if slot.generation != generation || slot.host.is_none() {
                    return;
                }
                slot.host = None;
                slot.connection.status = HostStatus::Failed;
                slot.connection.last_error = Some(reason.clone());
                slot.connection.tool_names.clear();
                state.rebuild_registry();
            }

            warn!(host = %host_id, "Tool host exited unexpectedly, its tools were removed");
            if let Some(observer) = observer {
                observer.on_failed(&host_id, &reason);
            }
        });
    }

    /// Tear a host down and forget it. Its tools leave the registry even
    /// when teardown fails.
    pub async fn disconnect(&self, host_id: &str) -> Result<DisconnectReport, HostError> {
        let slot = {
            let mut state = self.state.write().await;
            let slot = state
                .slots
                .remove(host_id)
                .ok_or_else(|| HostError::HostNotConnected(host_id.to_string()))?;
            state.rebuild_registry();
            slot
        };
        Ok(self.teardown(host_id, slot.host, slot.connection.tool_names.len()).await)
    }

    async fn teardown(
        &self,
        host_id: &str,
        host: Option<Arc<dyn ToolHost>>,
        tool_count: usize,
    ) -> DisconnectReport {
        let error = match host {
            Some(host) => host.shutdown().await.err(),
            None => None,
        };
        match &error {
            Some(e) => warn!(host = %host_id, "Teardown failed, tools removed anyway: {}", e),
            None => info!(host = %host_id, tools = tool_count, "Disconnected tool host"),
        }
        if let Some(observer) = &self.observer {
            observer.on_disconnected(host_id, tool_count);
        }
        DisconnectReport { tool_count, error }
    }

    /// Disconnect and keep the host from being reconnected by `reload`
    pub async fn disable(&self, host_id: &str) -> Result<DisconnectReport, HostError> {
        let (host, tool_count) = {
            let mut state = self.state.write().await;
            let slot = state
                .slots
                .get_mut(host_id)
                .ok_or_else(|| HostError::HostNotConnected(host_id.to_string()))?;
            let host = slot.host.take();
            let tool_count = slot.connection.tool_names.len();
            slot.connection.status = HostStatus::Disabled;
            slot.connection.last_error = None;
            slot.connection.tool_names.clear();
            state.disabled.insert(host_id.to_string());
            state.rebuild_registry();
            (host, tool_count)
        };
        Ok(self.teardown(host_id, host, tool_count).await)
    }

    /// Clear the disable marker and connect with the last known config
    /// (or the configured one if the host was never seen)
    pub async fn enable(&self, host_id: &str) -> Result<usize, HostError> {
        let known = {
            let mut state = self.state.write().await;
            state.disabled.remove(host_id);
            state.slots.get(host_id).map(|slot| slot.config.clone())
        };
        let config = match known {
            Some(config) => config,
            None => self
                .load_hosts()
                .map_err(|e| HostError::InvalidConfig {
                    host: host_id.to_string(),
                    reason: format!("{:#}", e),
                })?
                .remove(host_id)
                .ok_or_else(|| HostError::HostNotConnected(host_id.to_string()))?,
        };
        self.connect(host_id, config).await
    }

    fn load_hosts(&self) -> anyhow::Result<BTreeMap<String, HostConfig>> {
        self.source
            .load_hosts()
            .context("Failed to load tool host configuration")
    }

    /// Re-read host configuration and converge on it. A host that fails to
    /// connect is reported in `outcomes` and does not stop the others.
    pub async fn reload(&self) -> anyhow::Result<ReloadReport> {
        let desired = self.load_hosts()?;

        let (current, disabled) = {
            let state = self.state.read().await;
            let current: HashMap<String, (HostConfig, HostStatus)> = state
                .slots
                .iter()
                .map(|(id, slot)| (id.clone(), (slot.config.clone(), slot.connection.status)))
                .collect();
            (current, state.disabled.clone())
        };

        let mut report = ReloadReport::default();
        report.removed = current
            .keys()
            .filter(|id| !desired.contains_key(*id))
            .cloned()
            .collect();
        report.removed.sort();

        for id in &report.removed {
            if let Err(e) = self.disconnect(id).await {
                debug!(host = %id, "Already gone during reload: {}", e);
            }
        }

        for (id, config) in desired {
            if !config.enabled || disabled.contains(&id) {
                if matches!(current.get(&id), Some((_, HostStatus::Connected))) {
                    if let Err(e) = self.disconnect(&id).await {
                        debug!(host = %id, "Already gone during reload: {}", e);
                    }
                }
                report.skipped.push(id);
                continue;
            }

            match current.get(&id) {
                Some((previous, status)) => {
                    report.existing.push(id.clone());
                    if previous == &config && *status == HostStatus::Connected {
                        continue;
                    }
                    debug!(host = %id, "Reconnecting host with changed or failed config");
                }
                None => report.added.push(id.clone()),
            }

            let outcome = match self.connect(&id, config).await {
                Ok(tool_count) => HostOutcome::Connected { tool_count },
                Err(e) => HostOutcome::Failed {
                    error: e.to_string(),
                },
            };
            report.outcomes.insert(id, outcome);
        }

        info!(
            added = report.added.len(),
            removed = report.removed.len(),
            existing = report.existing.len(),
            skipped = report.skipped.len(),
            "Reloaded tool hosts"
        );
        Ok(report)
    }

    /// Run a tool on the host that currently serves its name
    pub async fn execute_tool(&self, name: &str, input: Value) -> Result<ToolOutput, HostError> {
        let host = {
            let state = self.state.read().await;
            state
                .registry
                .get(name)
                .map(|entry| Arc::clone(&entry.host))
                .ok_or_else(|| HostError::ToolNotFound(name.to_string()))?
        };
        host.call_tool(name, input).await
    }

    /// Host id and transport serving a tool
    pub async fn owner_of(&self, name: &str) -> Option<(String, TransportKind)> {
        let state = self.state.read().await;
        state
            .registry
            .get(name)
            .map(|entry| (entry.host.id().to_string(), entry.host.transport_kind()))
    }

    pub async fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        self.state.read().await.registry.descriptors()
    }

    pub async fn connection(&self, host_id: &str) -> Option<HostConnection> {
        let state = self.state.read().await;
        state.slots.get(host_id).map(|slot| slot.connection.clone())
    }

    /// Every known host, sorted by id
    pub async fn connections(&self) -> Vec<HostConnection> {
        let state = self.state.read().await;
        let mut connections: Vec<HostConnection> =
            state.slots.values().map(|s| s.connection.clone()).collect();
        connections.sort_by(|a, b| a.host_id.cmp(&b.host_id));
        connections
    }

    /// Disconnect everything, e.g. at process exit
    pub async fn shutdown_all(&self) {
        let slots: Vec<(String, HostSlot)> = {
            let mut state = self.state.write().await;
            state.registry.clear();
            state.slots.drain().collect()
        };
        for (id, slot) in slots {
            if let Some(host) = slot.host {
                if let Err(e) = host.shutdown().await {
                    warn!(host = %id, "Failed to shut down tool host: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticHostSource;
    use crate::tools::hosts::StaticHost;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Builds StaticHosts from a table of host id -> tool names
    #[derive(Default)]
    struct TableFactory {
        tools: HashMap<String, Vec<String>>,
        failing: HashSet<String>,
        created: Mutex<Vec<Arc<StaticHost>>>,
        configs: Mutex<Vec<HostConfig>>,
    }

    impl TableFactory {
        fn with(mut self, host: &str, tools: &[&str]) -> Self {
            self.tools
                .insert(host.to_string(), tools.iter().map(|t| t.to_string()).collect());
            self
        }

        fn failing(mut self, host: &str) -> Self {
            self.failing.insert(host.to_string());
            self
        }

        fn last(&self, host: &str) -> Arc<StaticHost> {
            self.created
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|h| h.id() == host)
                .cloned()
                .unwrap()
        }

        fn connects(&self) -> usize {
            self.created.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HostFactory for TableFactory {
        async fn connect(
            &self,
            host_id: &str,
            config: &HostConfig,
        ) -> Result<Arc<dyn ToolHost>, HostError> {
            self.configs.lock().unwrap().push(config.clone());
            if self.failing.contains(host_id) {
                return Err(HostError::ConnectFailed {
                    host: host_id.to_string(),
                    reason: "refused".to_string(),
                });
            }
            let names: Vec<&str> = self
                .tools
                .get(host_id)
                .map(|t| t.iter().map(String::as_str).collect())
                .unwrap_or_default();
            let host = Arc::new(StaticHost::new(host_id, &names));
            self.created.lock().unwrap().push(Arc::clone(&host));
            Ok(host)
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl HostObserver for Recorder {
        fn on_connected(&self, connection: &HostConnection) {
            self.events
                .lock()
                .unwrap()
                .push(format!("connected:{}", connection.host_id));
        }

        fn on_disconnected(&self, host_id: &str, tool_count: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("disconnected:{}:{}", host_id, tool_count));
        }

        fn on_failed(&self, host_id: &str, _error: &str) {
            self.events.lock().unwrap().push(format!("failed:{}", host_id));
        }
    }

    fn child(tag: &str) -> HostConfig {
        HostConfig::child_process("server", vec![tag.to_string()])
    }

    fn hosts(entries: &[(&str, HostConfig)]) -> BTreeMap<String, HostConfig> {
        entries
            .iter()
            .map(|(id, config)| (id.to_string(), config.clone()))
            .collect()
    }

    fn manager(
        factory: Arc<TableFactory>,
        source: Arc<StaticHostSource>,
    ) -> (ToolHostManager, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let manager = ToolHostManager::new(source)
            .with_factory(factory)
            .with_observer(recorder.clone());
        (manager, recorder)
    }

    fn factory() -> Arc<TableFactory> {
        Arc::new(
            TableFactory::default()
                .with("a", &["search", "read"])
                .with("b", &["search"])
                .with("c", &["deploy"]),
        )
    }

    #[tokio::test]
    async fn test_last_connected_wins_and_falls_back() {
        let factory = factory();
        let (manager, _) = manager(factory.clone(), Arc::new(StaticHostSource::default()));

        manager.connect("a", child("a")).await.unwrap();
        manager.connect("b", child("b")).await.unwrap();
        assert_eq!(manager.owner_of("search").await.unwrap().0, "b");

        let report = manager.disconnect("b").await.unwrap();
        assert_eq!(report.tool_count, 1);
        assert!(report.error.is_none());
        assert_eq!(factory.last("b").shutdown_count(), 1);
        assert_eq!(manager.owner_of("search").await.unwrap().0, "a");
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let (manager, _) = manager(factory(), Arc::new(StaticHostSource::default()));
        manager.connect("a", child("a")).await.unwrap();

        let err = manager.execute_tool("deploy", json!({})).await.unwrap_err();
        assert!(matches!(err, HostError::ToolNotFound(name) if name == "deploy"));

        let output = manager
            .execute_tool("read", json!({"path": "x"}))
            .await
            .unwrap();
        assert_eq!(output.content, r#"{"path":"x"}"#);
    }

    #[tokio::test]
    async fn test_disconnect_unknown_host() {
        let (manager, _) = manager(factory(), Arc::new(StaticHostSource::default()));
        assert!(matches!(
            manager.disconnect("ghost").await,
            Err(HostError::HostNotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_recorded_as_failed() {
        let (manager, recorder) = manager(factory(), Arc::new(StaticHostSource::default()));
        let err = manager
            .connect("a", HostConfig::child_process("", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::InvalidConfig { .. }));

        let connection = manager.connection("a").await.unwrap();
        assert_eq!(connection.status, HostStatus::Failed);
        assert!(connection.last_error.is_some());
        assert_eq!(*recorder.events.lock().unwrap(), vec!["failed:a"]);
    }

    #[tokio::test]
    async fn test_placeholders_expand_before_validation() {
        std::env::set_var("MARTEN_TEST_TOOLS_BASE", "http://127.0.0.1:9");
        let config = HostConfig::network_request("${MARTEN_TEST_TOOLS_BASE}/mcp")
            .with_header("Authorization", "Bearer ${MARTEN_TEST_UNSET_TOKEN}");
        let factory = Arc::new(TableFactory::default().with("remote", &["lookup"]));
        let source = Arc::new(StaticHostSource::new(hosts(&[("remote", config.clone())])));
        let (manager, _) = manager(factory.clone(), source);

        assert_eq!(manager.connect("remote", config).await.unwrap(), 1);
        let seen = factory.configs.lock().unwrap()[0].clone();
        assert_eq!(seen.url.as_deref(), Some("http://127.0.0.1:9/mcp"));
        assert_eq!(seen.headers["Authorization"], "Bearer ");

        // the slot keeps the unexpanded form, so an unchanged file is not a change
        let report = manager.reload().await.unwrap();
        assert_eq!(report.existing, vec!["remote"]);
        assert!(report.outcomes.is_empty());
        assert_eq!(factory.connects(), 1);
    }

    #[tokio::test]
    async fn test_reload_diff() {
        let factory = factory();
        let source = Arc::new(StaticHostSource::new(hosts(&[("a", child("a")), ("b", child("b"))])));
        let (manager, _) = manager(factory.clone(), source.clone());

        let first = manager.reload().await.unwrap();
        assert_eq!(first.added, vec!["a", "b"]);
        assert_eq!(factory.connects(), 2);

        source.replace(hosts(&[("a", child("a")), ("c", child("c"))]));
        let report = manager.reload().await.unwrap();

        assert_eq!(report.added, vec!["c"]);
        assert_eq!(report.removed, vec!["b"]);
        assert_eq!(report.existing, vec!["a"]);
        assert_eq!(
            report.outcomes.get("c"),
            Some(&HostOutcome::Connected { tool_count: 1 })
        );
        assert!(!report.outcomes.contains_key("a"));
        assert_eq!(factory.connects(), 3);
        assert!(manager.connection("b").await.is_none());
        assert_eq!(manager.owner_of("search").await.unwrap().0, "a");
    }

    #[tokio::test]
    async fn test_reload_isolates_failures() {
        let factory = Arc::new(
            TableFactory::default()
                .with("a", &["search"])
                .with("c", &["deploy"])
                .failing("b"),
        );
        let source = Arc::new(StaticHostSource::new(hosts(&[
            ("a", child("a")),
            ("b", child("b")),
            ("c", child("c")),
        ])));
        let (manager, _) = manager(factory, source);

        let report = manager.reload().await.unwrap();
        assert_eq!(report.added, vec!["a", "b", "c"]);
        assert!(matches!(report.outcomes["b"], HostOutcome::Failed { .. }));
        assert_eq!(manager.tool_descriptors().await.len(), 2);
        assert_eq!(
            manager.connection("b").await.unwrap().status,
            HostStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_reload_reconnects_changed_config() {
        let factory = factory();
        let source = Arc::new(StaticHostSource::new(hosts(&[("a", child("a"))])));
        let (manager, _) = manager(factory.clone(), source.clone());
        manager.reload().await.unwrap();

        source.replace(hosts(&[("a", child("a").with_env("MODE", "fast"))]));
        let report = manager.reload().await.unwrap();
        assert_eq!(report.existing, vec!["a"]);
        assert!(report.outcomes.contains_key("a"));
        assert_eq!(factory.connects(), 2);
        assert_eq!(factory.created.lock().unwrap()[0].shutdown_count(), 1);
    }

    #[tokio::test]
    async fn test_disable_and_enable() {
        let factory = factory();
        let source = Arc::new(StaticHostSource::new(hosts(&[("a", child("a"))])));
        let (manager, recorder) = manager(factory.clone(), source);
        manager.reload().await.unwrap();

        let report = manager.disable("a").await.unwrap();
        assert_eq!(report.tool_count, 2);
        assert!(manager.tool_descriptors().await.is_empty());
        assert_eq!(
            manager.connection("a").await.unwrap().status,
            HostStatus::Disabled
        );
        assert!(matches!(
            manager.connect("a", child("a")).await,
            Err(HostError::HostDisabled(_))
        ));

        let report = manager.reload().await.unwrap();
        assert_eq!(report.skipped, vec!["a"]);
        assert_eq!(factory.connects(), 1);

        assert_eq!(manager.enable("a").await.unwrap(), 2);
        assert_eq!(factory.connects(), 2);
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["connected:a", "disconnected:a:2", "connected:a"]
        );
    }

    #[tokio::test]
    async fn test_enabled_false_is_skipped() {
        let mut off = child("a");
        off.enabled = false;
        let source = Arc::new(StaticHostSource::new(hosts(&[("a", off)])));
        let (manager, _) = manager(factory(), source);

        let report = manager.reload().await.unwrap();
        assert_eq!(report.skipped, vec!["a"]);
        assert!(report.added.is_empty());
        assert!(manager.connections().await.is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_exit_clears_tools() {
        let factory = factory();
        let (manager, recorder) = manager(factory.clone(), Arc::new(StaticHostSource::default()));
        manager.connect("c", child("c")).await.unwrap();

        factory.last("c").close();

        let mut status = HostStatus::Connected;
        for _ in 0..100 {
            status = manager.connection("c").await.unwrap().status;
            if status == HostStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, HostStatus::Failed);
        assert!(manager.connection("c").await.unwrap().tool_names.is_empty());
        assert!(matches!(
            manager.execute_tool("deploy", json!({})).await,
            Err(HostError::ToolNotFound(_))
        ));
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["connected:c", "failed:c"]
        );
    }

    #[tokio::test]
    async fn test_deliberate_disconnect_is_not_a_failure() {
        let factory = factory();
        let (manager, recorder) = manager(factory.clone(), Arc::new(StaticHostSource::default()));
        manager.connect("c", child("c")).await.unwrap();
        manager.disconnect("c").await.unwrap();
        factory.last("c").close();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["connected:c", "disconnected:c:1"]
        );
    }
}
