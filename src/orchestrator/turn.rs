// Turn loop
//
// A round never touches the conversation. It returns the assistant text and
// the (invocation, result) pairs, and only a completed round is appended, so
// a cancelled or failed round leaves the history as it was.

use super::pending::{PendingCalls, PendingToolCall};
use super::{TurnFragment, TurnOutcome};
use crate::config::constants::{DEFAULT_MAX_TOKENS, DEFAULT_MAX_TOOL_ROUNDS};
use crate::config::Config;
use crate::conversation::{ContentBlock, Conversation, Message, Role, ToolResult, ToolUse};
use crate::errors::OrchestratorError;
use crate::providers::{LlmProvider, ProviderRequest};
use crate::stream::{StreamDialectParser, StreamEvent};
use crate::tools::approval::{ApprovalGate, ApprovalRequest};
use crate::tools::hosts::{ToolHostManager, TransportKind};
use crate::tools::permissions::PermissionStore;
use crate::tools::types::ToolDescriptor;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_rounds: usize,
    /// Provider default when unset
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            system_prompt: None,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_rounds: config.features.max_tool_rounds,
            model: config.backend.model.clone(),
            max_tokens: config.backend.max_tokens,
            temperature: config.backend.temperature,
            system_prompt: config.backend.system_prompt.clone(),
        }
    }
}

#[derive(Default)]
struct RoundState {
    text: String,
    pending: PendingCalls,
    completed: Vec<(ToolUse, ToolResult)>,
}

/// Progress sink that tolerates a caller who stopped listening
struct Fragments<'a>(&'a mpsc::UnboundedSender<TurnFragment>);

impl Fragments<'_> {
    fn emit(&self, fragment: TurnFragment) {
        let _ = self.0.send(fragment);
    }
}

pub struct ToolCallOrchestrator {
    provider: Arc<dyn LlmProvider>,
    hosts: Arc<ToolHostManager>,
    permissions: Arc<Mutex<PermissionStore>>,
    approval: Arc<dyn ApprovalGate>,
    settings: OrchestratorSettings,
}

impl ToolCallOrchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        hosts: Arc<ToolHostManager>,
        permissions: Arc<Mutex<PermissionStore>>,
        approval: Arc<dyn ApprovalGate>,
    ) -> Self {
        Self {
            provider,
            hosts,
            permissions,
            approval,
            settings: OrchestratorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn hosts(&self) -> &Arc<ToolHostManager> {
        &self.hosts
    }

    pub fn permissions(&self) -> &Arc<Mutex<PermissionStore>> {
        &self.permissions
    }

    /// Run rounds until the model answers without calling tools.
    ///
    /// Completed rounds are appended to `conversation`; progress goes to
    /// `out`. Backend failures end the turn with an error; tool failures and
    /// declined calls become error results the model gets to see.
    #[instrument(skip_all, fields(provider = self.provider.name()))]
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        tools: &[ToolDescriptor],
        out: &mpsc::UnboundedSender<TurnFragment>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, OrchestratorError> {
        let out = Fragments(out);
        let mut tool_calls = 0;

        for round in 1..=self.settings.max_rounds {
            let in_flight = std::sync::Mutex::new(None::<String>);

            let state = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let tool = in_flight.lock().ok().and_then(|mut t| t.take());
                    self.abandon(tool).await;
                    return Err(OrchestratorError::Cancelled);
                }
                state = self.run_round(conversation.messages(), tools, &out, &in_flight) => state?,
            };

            if state.completed.is_empty() {
                debug!(round, "Round finished without tool calls");
                conversation.push(Message::assistant(state.text.clone()));
                out.emit(TurnFragment::RoundFinished {
                    round,
                    tool_calls: 0,
                });
                return Ok(TurnOutcome {
                    rounds: round,
                    final_text: state.text,
                    tool_calls,
                });
            }

            let count = state.completed.len();
            tool_calls += count;
            debug!(round, tool_calls = count, "Round finished with tool calls");

            let mut invocations = Vec::with_capacity(count + 1);
            if !state.text.is_empty() {
                invocations.push(ContentBlock::text(state.text));
            }
            let mut results = Vec::with_capacity(count);
            for (tool_use, result) in state.completed {
                invocations.push(ContentBlock::from(tool_use));
                results.push(ContentBlock::from(result));
            }
            conversation.push(Message::with_blocks(Role::Assistant, invocations));
            conversation.push(Message::with_blocks(Role::User, results));

            out.emit(TurnFragment::RoundFinished {
                round,
                tool_calls: count,
            });
        }

        warn!(max_rounds = self.settings.max_rounds, "Tool round limit reached");
        Err(OrchestratorError::RoundLimit(self.settings.max_rounds))
    }

    fn build_request(&self, messages: &[Message], tools: &[ToolDescriptor]) -> ProviderRequest {
        let mut request = ProviderRequest::new(messages.to_vec())
            .with_max_tokens(self.settings.max_tokens)
            .with_tools(tools.to_vec());
        if let Some(model) = &self.settings.model {
            request = request.with_model(model);
        }
        if let Some(system) = &self.settings.system_prompt {
            request = request.with_system(system);
        }
        if let Some(temperature) = self.settings.temperature {
            request = request.with_temperature(temperature);
        }
        request.sanitize_messages();
        request
    }

    async fn run_round(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        out: &Fragments<'_>,
        in_flight: &std::sync::Mutex<Option<String>>,
    ) -> Result<RoundState, OrchestratorError> {
        let request = self.build_request(messages, tools);
        let mut chunks = self.provider.send_message_stream(&request).await?;
        let mut parser = StreamDialectParser::new(self.provider.dialect());
        let mut state = RoundState::default();

        while let Some(chunk) = chunks.recv().await {
            let chunk = chunk?;
            for event in parser.feed(&chunk) {
                self.handle_event(event, &mut state, out, in_flight).await;
            }
        }
        for event in parser.flush() {
            self.handle_event(event, &mut state, out, in_flight).await;
        }
        Ok(state)
    }

    async fn handle_event(
        &self,
        event: StreamEvent,
        state: &mut RoundState,
        out: &Fragments<'_>,
        in_flight: &std::sync::Mutex<Option<String>>,
    ) {
        match event {
            StreamEvent::TextDelta(text) => {
                state.text.push_str(&text);
                out.emit(TurnFragment::Text(text));
            }
            StreamEvent::ToolCallStart { call_id, tool_name } => {
                state.pending.open(&call_id, &tool_name);
            }
            StreamEvent::ToolCallArgDelta { call_id, fragment } => {
                if !state.pending.append(&call_id, &fragment) {
                    debug!(call_id = %call_id, "Argument fragment for unknown call");
                }
            }
            StreamEvent::ToolCallEnd { call_id } => {
                if let Some(call) = state.pending.take(&call_id) {
                    let completed = self.complete_call(call, out, in_flight).await;
                    state.completed.push(completed);
                }
            }
            StreamEvent::TurnEnd => {
                if !state.pending.is_empty() {
                    debug!("Turn ended with calls still open");
                }
            }
        }
    }

    /// Gate and execute one finalized call
    #[instrument(skip_all, fields(tool = %call.tool_name, id = %call.call_id))]
    async fn complete_call(
        &self,
        call: PendingToolCall,
        out: &Fragments<'_>,
        in_flight: &std::sync::Mutex<Option<String>>,
    ) -> (ToolUse, ToolResult) {
        let call_id = &call.call_id;
        let tool_name = &call.tool_name;

        let input = match call.parse_input() {
            Ok(input) => input,
            Err(reason) => {
                warn!("Tool call arguments are not valid JSON: {}", reason);
                let result = ToolResult::error(
                    call_id.clone(),
                    format!("Invalid JSON arguments for tool '{}': {}", tool_name, reason),
                );
                self.report_result(&result, tool_name, out);
                return (tool_use(&call, json!({})), result);
            }
        };

        out.emit(TurnFragment::ToolRequested {
            call_id: call_id.clone(),
            tool_name: tool_name.clone(),
            input: input.clone(),
        });

        let result = if self.authorize(tool_name, &input).await {
            if let Ok(mut slot) = in_flight.lock() {
                *slot = Some(tool_name.clone());
            }
            let result = match self.hosts.execute_tool(tool_name, input.clone()).await {
                Ok(output) => output.into_result(call_id.clone()),
                Err(e) => {
                    warn!("Tool call failed: {}", e);
                    ToolResult::error(call_id.clone(), format!("Tool error: {}", e))
                }
            };
            if let Ok(mut slot) = in_flight.lock() {
                *slot = None;
            }
            result
        } else {
            out.emit(TurnFragment::ToolDeclined {
                call_id: call_id.clone(),
                tool_name: tool_name.clone(),
            });
            ToolResult::error(
                call_id.clone(),
                format!("User declined to run tool '{}'.", tool_name),
            )
        };

        self.report_result(&result, tool_name, out);
        (tool_use(&call, input), result)
    }

    fn report_result(&self, result: &ToolResult, tool_name: &str, out: &Fragments<'_>) {
        out.emit(TurnFragment::ToolCompleted {
            call_id: result.tool_use_id.clone(),
            tool_name: tool_name.to_string(),
            is_error: result.is_error,
            content: result.content.clone(),
        });
    }

    /// Remembered approval, or ask the gate
    async fn authorize(&self, tool_name: &str, input: &Value) -> bool {
        if self.permissions.lock().await.is_approved(tool_name, input) {
            debug!("Approved by remembered decision");
            return true;
        }

        let decision = self
            .approval
            .ask_approval(&ApprovalRequest::new(tool_name, input))
            .await;
        if !decision.approved {
            info!(tool = %tool_name, "Tool call declined");
            return false;
        }
        if decision.remember {
            if let Err(e) = self.permissions.lock().await.approve(tool_name, input, true) {
                warn!("Failed to persist approval: {:#}", e);
            }
        }
        true
    }

    /// Stop the child-process host running an interrupted call
    async fn abandon(&self, in_flight: Option<String>) {
        let Some(tool_name) = in_flight else {
            info!("Turn cancelled");
            return;
        };
        match self.hosts.owner_of(&tool_name).await {
            Some((host_id, TransportKind::ChildProcess)) => {
                info!(host = %host_id, tool = %tool_name, "Turn cancelled, stopping tool host");
                match self.hosts.disconnect(&host_id).await {
                    Ok(report) => {
                        if let Some(e) = report.error {
                            warn!(host = %host_id, "Tool host did not stop cleanly: {}", e);
                        }
                    }
                    Err(e) => debug!(host = %host_id, "Tool host already gone: {}", e),
                }
            }
            _ => info!(tool = %tool_name, "Turn cancelled during tool call"),
        }
    }
}

fn tool_use(call: &PendingToolCall, input: Value) -> ToolUse {
    ToolUse {
        id: call.call_id.clone(),
        name: call.tool_name.clone(),
        input,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticHostSource;
    use crate::errors::{BackendError, HostError};
    use crate::providers::{ScriptedProvider, ScriptedResponse};
    use crate::stream::StreamDialect;
    use crate::tools::approval::{ApprovalDecision, ScriptedApproval};
    use crate::tools::hosts::{HostConfig, HostFactory, StaticHost, ToolHost};
    use crate::tools::types::ToolOutput;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Prebuilt(Arc<StaticHost>);

    #[async_trait]
    impl HostFactory for Prebuilt {
        async fn connect(
            &self,
            _host_id: &str,
            _config: &HostConfig,
        ) -> Result<Arc<dyn ToolHost>, HostError> {
            Ok(self.0.clone())
        }
    }

    struct Fixture {
        orchestrator: ToolCallOrchestrator,
        provider: Arc<ScriptedProvider>,
        approval: Arc<ScriptedApproval>,
        host: Arc<StaticHost>,
    }

    async fn fixture(
        responses: Vec<ScriptedResponse>,
        answers: Vec<ApprovalDecision>,
        host: StaticHost,
    ) -> Fixture {
        let host = Arc::new(host);
        let manager = ToolHostManager::new(Arc::new(StaticHostSource::default()))
            .with_factory(Arc::new(Prebuilt(host.clone())));
        manager
            .connect(host.id(), HostConfig::in_process())
            .await
            .unwrap();

        let provider = Arc::new(ScriptedProvider::new(StreamDialect::Anthropic, responses));
        let approval = Arc::new(ScriptedApproval::new(answers));
        let orchestrator = ToolCallOrchestrator::new(
            provider.clone(),
            Arc::new(manager),
            Arc::new(Mutex::new(PermissionStore::in_memory())),
            approval.clone(),
        );
        Fixture {
            orchestrator,
            provider,
            approval,
            host,
        }
    }

    async fn run(
        fixture: &Fixture,
        conversation: &mut Conversation,
    ) -> (Result<TurnOutcome, OrchestratorError>, Vec<TurnFragment>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tools = fixture.orchestrator.hosts().tool_descriptors().await;
        let result = fixture
            .orchestrator
            .run_turn(conversation, &tools, &tx, &CancellationToken::new())
            .await;
        drop(tx);
        let mut fragments = Vec::new();
        while let Some(fragment) = rx.recv().await {
            fragments.push(fragment);
        }
        (result, fragments)
    }

    fn last_result(conversation: &Conversation) -> ContentBlock {
        let blocks = conversation.messages()[2].blocks();
        blocks[0].clone()
    }

    #[tokio::test]
    async fn test_plain_answer_single_round() {
        let fixture = fixture(
            vec![ScriptedResponse::anthropic_text("Hello there")],
            vec![],
            StaticHost::new("local", &["file_list"]),
        )
        .await;
        let mut conversation = Conversation::new();
        conversation.push_user("hi");

        let (result, fragments) = run(&fixture, &mut conversation).await;
        let outcome = result.unwrap();
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.final_text, "Hello there");
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.messages()[1].text(), "Hello there");
        assert_eq!(fragments[0], TurnFragment::Text("Hello there".into()));

        let request = &fixture.provider.requests().await[0];
        assert_eq!(request.tools.as_ref().unwrap()[0].name, "file_list");
    }

    #[tokio::test]
    async fn test_declined_call_becomes_error_result() {
        let fixture = fixture(
            vec![
                ScriptedResponse::anthropic_tool_call("", "c1", "file_list", &[r#"{"path":"/"}"#]),
                ScriptedResponse::anthropic_text("Understood"),
            ],
            vec![ApprovalDecision::deny()],
            StaticHost::new("local", &["file_list"]),
        )
        .await;
        let mut conversation = Conversation::new();
        conversation.push_user("list /");

        let (result, fragments) = run(&fixture, &mut conversation).await;
        assert_eq!(result.unwrap().rounds, 2);
        assert!(fixture.host.calls().is_empty());
        assert!(fragments
            .iter()
            .any(|f| matches!(f, TurnFragment::ToolDeclined { call_id, .. } if call_id == "c1")));

        match last_result(&conversation) {
            ContentBlock::ToolResult {
                content, is_error, ..
            } => {
                assert_eq!(content, "User declined to run tool 'file_list'.");
                assert_eq!(is_error, Some(true));
            }
            other => panic!("unexpected block {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_arguments_skip_approval_and_execution() {
        let fixture = fixture(
            vec![
                ScriptedResponse::anthropic_tool_call("", "c1", "file_list", &[r#"{"path":"#]),
                ScriptedResponse::anthropic_text("Let me retry"),
            ],
            vec![ApprovalDecision::once()],
            StaticHost::new("local", &["file_list"]),
        )
        .await;
        let mut conversation = Conversation::new();
        conversation.push_user("list");

        let (result, _) = run(&fixture, &mut conversation).await;
        result.unwrap();
        assert!(fixture.approval.requests().is_empty());
        assert!(fixture.host.calls().is_empty());

        let invocation = conversation.messages()[1].tool_uses();
        assert_eq!(invocation[0].input, json!({}));
        match last_result(&conversation) {
            ContentBlock::ToolResult { content, .. } => {
                assert!(content.starts_with("Invalid JSON arguments for tool 'file_list'"))
            }
            other => panic!("unexpected block {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remembered_approval_skips_gate() {
        let call = || {
            ScriptedResponse::anthropic_tool_call("", "c", "file_list", &[r#"{"path":"/srv"}"#])
        };
        let fixture = fixture(
            vec![call(), call(), ScriptedResponse::anthropic_text("done")],
            vec![ApprovalDecision::always()],
            StaticHost::new("local", &["file_list"]),
        )
        .await;
        let mut conversation = Conversation::new();
        conversation.push_user("twice");

        let (result, _) = run(&fixture, &mut conversation).await;
        assert_eq!(result.unwrap().tool_calls, 2);
        assert_eq!(fixture.approval.requests().len(), 1);
        assert_eq!(fixture.host.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_tool_failure_does_not_abort_round() {
        let fixture = fixture(
            vec![
                ScriptedResponse::anthropic_tool_call("", "c1", "file_list", &["{}"]),
                ScriptedResponse::anthropic_text("It failed"),
            ],
            vec![ApprovalDecision::once()],
            StaticHost::new("local", &["file_list"])
                .with_handler(|_, _| ToolOutput::error("permission denied")),
        )
        .await;
        let mut conversation = Conversation::new();
        conversation.push_user("go");

        let (result, _) = run(&fixture, &mut conversation).await;
        assert_eq!(result.unwrap().final_text, "It failed");
        match last_result(&conversation) {
            ContentBlock::ToolResult {
                content, is_error, ..
            } => {
                assert_eq!(content, "permission denied");
                assert_eq!(is_error, Some(true));
            }
            other => panic!("unexpected block {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_to_model() {
        let fixture = fixture(
            vec![
                ScriptedResponse::anthropic_tool_call("", "c1", "deploy", &["{}"]),
                ScriptedResponse::anthropic_text("No such tool"),
            ],
            vec![ApprovalDecision::once()],
            StaticHost::new("local", &["file_list"]),
        )
        .await;
        let mut conversation = Conversation::new();
        conversation.push_user("deploy");

        let (result, _) = run(&fixture, &mut conversation).await;
        result.unwrap();
        match last_result(&conversation) {
            ContentBlock::ToolResult { content, .. } => {
                assert_eq!(content, "Tool error: tool 'deploy' not found")
            }
            other => panic!("unexpected block {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backend_error_leaves_conversation_untouched() {
        let fixture = fixture(
            vec![ScriptedResponse::Status(529, "overloaded".into())],
            vec![],
            StaticHost::new("local", &[]),
        )
        .await;
        let mut conversation = Conversation::new();
        conversation.push_user("hi");

        let (result, _) = run(&fixture, &mut conversation).await;
        assert!(matches!(
            result,
            Err(OrchestratorError::Backend(BackendError::Status { status: 529, .. }))
        ));
        assert_eq!(conversation.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_failure_mid_round() {
        let fixture = fixture(
            vec![ScriptedResponse::FailAfter(
                vec![b"data: {\"type\":\"ping\"}\n\n".to_vec()],
                "connection reset".into(),
            )],
            vec![],
            StaticHost::new("local", &[]),
        )
        .await;
        let mut conversation = Conversation::new();
        conversation.push_user("hi");

        let (result, _) = run(&fixture, &mut conversation).await;
        assert!(matches!(
            result,
            Err(OrchestratorError::Backend(BackendError::Stream(_)))
        ));
        assert_eq!(conversation.len(), 1);
    }

    #[tokio::test]
    async fn test_round_limit() {
        let call = || ScriptedResponse::anthropic_tool_call("", "c", "file_list", &["{}"]);
        let mut fixture = fixture(
            vec![call(), call(), call()],
            vec![ApprovalDecision::always()],
            StaticHost::new("local", &["file_list"]),
        )
        .await;
        fixture.orchestrator = fixture.orchestrator.with_settings(OrchestratorSettings {
            max_rounds: 2,
            ..OrchestratorSettings::default()
        });
        let mut conversation = Conversation::new();
        conversation.push_user("loop");

        let (result, _) = run(&fixture, &mut conversation).await;
        assert!(matches!(result, Err(OrchestratorError::RoundLimit(2))));
        assert_eq!(conversation.len(), 5);
    }

    #[tokio::test]
    async fn test_cancel_stalled_stream() {
        let fixture = fixture(
            vec![ScriptedResponse::Stall(vec![
                b"data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"par\"}}\n\n".to_vec(),
            ])],
            vec![],
            StaticHost::new("local", &[]),
        )
        .await;
        let mut conversation = Conversation::new();
        conversation.push_user("hi");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = fixture
            .orchestrator
            .run_turn(&mut conversation, &[], &tx, &cancel)
            .await;
        assert!(matches!(result, Err(OrchestratorError::Cancelled)));
        assert_eq!(conversation.len(), 1);
    }

    #[tokio::test]
    async fn test_system_prompt_and_model_forwarded() {
        let mut fixture = fixture(
            vec![ScriptedResponse::anthropic_text("ok")],
            vec![],
            StaticHost::new("local", &[]),
        )
        .await;
        fixture.orchestrator = fixture.orchestrator.with_settings(OrchestratorSettings {
            model: Some("claude-test".into()),
            system_prompt: Some("Be brief.".into()),
            max_tokens: 512,
            temperature: Some(0.2),
            ..OrchestratorSettings::default()
        });
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        run(&fixture, &mut conversation).await.0.unwrap();

        let request = &fixture.provider.requests().await[0];
        assert_eq!(request.model, "claude-test");
        assert_eq!(request.system.as_deref(), Some("Be brief."));
        assert_eq!(request.max_tokens, 512);
        assert_eq!(request.temperature, Some(0.2));
        assert!(request.tools.is_none());
    }
}
