//! Per-request dispatch loop
//!
//! `Received -> ModelPlanning -> {ToolCalling -> ModelPlanning}* -> Responding -> Done`,
//! with `Failed` reachable from any state.

use futures::StreamExt;
use serde_json::json;
use tracing::{debug, error, warn};
use crate::error::{RelayError, RelayResult};
use crate::llm::{ChatMessage, ModelRequest, ModelResponse, StreamEvent, ToolCall};
use super::stream::{Sink, StreamPart};
use super::types::{AgentReply, ConversationId, Message, Role, ToolInvocation};
use super::{AgentConfig, AgentRequest, ToolPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    ModelPlanning { round: usize },
    ToolCalling { calls: usize },
    Responding,
    Done,
    Failed,
}

pub(crate) struct Dispatch<'a> {
    config: &'a AgentConfig,
    request: AgentRequest,
    memory_key: Option<ConversationId>,
    state: DispatchState,
    states: Vec<DispatchState>,
    context: Vec<ChatMessage>,
    invocations: Vec<ToolInvocation>,
    rounds: usize,
    enforced: bool,
    text_id: String,
}

impl<'a> Dispatch<'a> {
    pub(crate) fn new(config: &'a AgentConfig, request: AgentRequest) -> Self {
        Self {
            config,
            memory_key: request.memory_key(),
            request,
            state: DispatchState::Received,
            states: vec![DispatchState::Received],
            context: Vec::new(),
            invocations: Vec::new(),
            rounds: 0,
            enforced: false,
            text_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub(crate) async fn run(&mut self, sink: &mut Sink) -> RelayResult<AgentReply> {
        match self.drive(sink).await {
            Ok(reply) => {
                self.transition(DispatchState::Done);
                Ok(reply)
            }
            Err(e) => {
                self.transition(DispatchState::Failed);
                if !matches!(e, RelayError::Cancelled) {
                    error!(agent = %self.config.name, rounds = self.rounds, "dispatch failed: {}", e);
                }
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: DispatchState) {
        debug!(agent = %self.config.name, from = ?self.state, to = ?next, "dispatch transition");
        self.state = next;
        self.states.push(next);
    }

    async fn drive(&mut self, sink: &mut Sink) -> RelayResult<AgentReply> {
        self.receive()?;

        loop {
            // The enforced round does not count against the limit
            let limit = self.config.max_rounds + usize::from(self.enforced);
            if self.rounds >= limit {
                return Err(RelayError::MaxRoundsExceeded(self.config.name.clone(), self.config.max_rounds));
            }
            self.rounds += 1;
            self.transition(DispatchState::ModelPlanning { round: self.rounds });

            let (response, held) = self.plan(sink).await?;
            if !response.tool_calls.is_empty() {
                if held {
                    self.emit_text(&response.text, sink).await?;
                }
                self.call_tools(response.text, response.tool_calls, sink).await?;
                continue;
            }

            let missing = self.missing_required_tools();
            if !missing.is_empty() {
                self.enforced = true;
                warn!(agent = %self.config.name, missing = ?missing, "model skipped required tools, invoking them");
                debug!(agent = %self.config.name, discarded = response.text.len(), "dropping answer given before enforcement");
                let calls = missing
                    .into_iter()
                    .enumerate()
                    .map(|(i, name)| ToolCall {
                        id: format!("enforced_{}_{}", self.rounds, i + 1),
                        name,
                        arguments: json!({ "text": self.request.message }),
                    })
                    .collect();
                self.call_tools(String::new(), calls, sink).await?;
                continue;
            }

            if held {
                self.emit_text(&response.text, sink).await?;
            }
            return self.respond(response.text, sink).await;
        }
    }

    /// Load history, record the user turn and seed the model context
    fn receive(&mut self) -> RelayResult<()> {
        self.context.push(ChatMessage::system(self.config.instructions.clone()));

        if let (Some(memory), Some(conversation_id)) = (&self.config.memory, &self.memory_key) {
            let history = memory.read(conversation_id)?;
            debug!(agent = %self.config.name, conversation = %conversation_id, turns = history.len(), "loaded history");
            for turn in history {
                match turn.role {
                    Role::User => self.context.push(ChatMessage::user(turn.content)),
                    Role::Assistant => self.context.push(ChatMessage::assistant(turn.content)),
                    // Tool turns are kept for the record; their call ids belong to past requests
                    Role::Tool(_) => {}
                }
            }
            memory.append(conversation_id, Message::user(self.request.message.clone()))?;
        }

        self.context.push(ChatMessage::user(self.request.message.clone()));
        Ok(())
    }

    /// Ask the model for the next step. The flag is true when streamed text
    /// was held back instead of relayed, because an answer given before
    /// required tools have run will be discarded.
    async fn plan(&mut self, sink: &mut Sink) -> RelayResult<(ModelResponse, bool)> {
        let req = ModelRequest {
            model: self.config.model.model_id.clone(),
            messages: self.context.clone(),
            tools: self.config.tools.definitions(),
        };
        let provider = &self.config.model.provider;

        if !sink.is_streaming() {
            return Ok((provider.complete(req).await?, false));
        }
        let hold = self.awaiting_enforcement();

        let mut events = provider.stream(req).await?;
        let mut response = ModelResponse::default();
        while let Some(event) = events.next().await {
            match event? {
                StreamEvent::TextDelta(delta) => {
                    response.text.push_str(&delta);
                    if !hold {
                        sink.emit(StreamPart::TextDelta { id: self.text_id.clone(), delta }).await?;
                    }
                }
                StreamEvent::ToolCall(call) => response.tool_calls.push(call),
                StreamEvent::Finish { finish_reason } => response.finish_reason = finish_reason,
            }
        }
        Ok((response, hold))
    }

    async fn emit_text(&self, text: &str, sink: &mut Sink) -> RelayResult<()> {
        if text.is_empty() {
            return Ok(());
        }
        sink.emit(StreamPart::TextDelta {
            id: self.text_id.clone(),
            delta: text.to_string(),
        })
        .await
    }

    /// Run each call in order; tool-level failures become context for the model
    async fn call_tools(&mut self, text: String, calls: Vec<ToolCall>, sink: &mut Sink) -> RelayResult<()> {
        self.transition(DispatchState::ToolCalling { calls: calls.len() });
        self.context.push(ChatMessage::assistant_tool_calls(text, calls.clone()));

        for call in calls {
            sink.emit(StreamPart::ToolInputAvailable {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                input: call.arguments.clone(),
            })
            .await?;

            debug!(agent = %self.config.name, tool = %call.name, "invoking tool");
            let result = self
                .config
                .tools
                .invoke_bounded(&call.name, call.arguments.clone(), self.config.tool_timeout)
                .await;
            let (output, is_error) = match result {
                Ok(output) => (output, false),
                Err(e) if e.is_tool_level() => {
                    warn!(agent = %self.config.name, tool = %call.name, "tool call failed: {}", e);
                    (json!({ "error": e.to_string() }), true)
                }
                Err(e) => return Err(e),
            };

            let content = output.to_string();
            self.context.push(ChatMessage::tool_result(call.id.clone(), content.clone()));
            if let (Some(memory), Some(conversation_id)) = (&self.config.memory, &self.memory_key) {
                memory.append(conversation_id, Message::new(Role::Tool(call.name.clone()), content))?;
            }

            sink.emit(StreamPart::ToolOutputAvailable {
                tool_call_id: call.id.clone(),
                output: output.clone(),
            })
            .await?;

            self.invocations.push(ToolInvocation {
                call_id: call.id,
                tool_name: call.name,
                input: call.arguments,
                output,
                is_error,
            });
        }
        Ok(())
    }

    fn awaiting_enforcement(&self) -> bool {
        self.config.policy == ToolPolicy::RequireAll && !self.enforced
    }

    /// Required tools without a successful result so far
    fn missing_required_tools(&self) -> Vec<String> {
        if !self.awaiting_enforcement() {
            return Vec::new();
        }
        self.config
            .tools
            .names()
            .into_iter()
            .filter(|name| {
                !self
                    .invocations
                    .iter()
                    .any(|inv| inv.tool_name == *name && !inv.is_error)
            })
            .map(str::to_string)
            .collect()
    }

    async fn respond(&mut self, text: String, sink: &mut Sink) -> RelayResult<AgentReply> {
        self.transition(DispatchState::Responding);
        if let (Some(memory), Some(conversation_id)) = (&self.config.memory, &self.memory_key) {
            memory.append(conversation_id, Message::assistant(text.clone()))?;
        }
        sink.emit(StreamPart::Finish).await?;

        Ok(AgentReply {
            text,
            tool_invocations: std::mem::take(&mut self.invocations),
            rounds: self.rounds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use async_trait::async_trait;
    use crate::llm::{EventStream, LanguageModel, ModelBinding, ScriptedModel};
    use crate::memory::{InMemoryStore, MemoryStore};
    use crate::agent::conversation_key;
    use crate::tools::builtin;

    /// Asks for an unknown tool forever
    struct LoopingModel;

    #[async_trait]
    impl LanguageModel for LoopingModel {
        async fn complete(&self, _req: ModelRequest) -> RelayResult<ModelResponse> {
            Ok(ModelResponse {
                text: String::new(),
                tool_calls: vec![ToolCall { id: "c".into(), name: "nope".into(), arguments: json!({}) }],
                finish_reason: "tool_calls".into(),
            })
        }

        async fn stream(&self, _req: ModelRequest) -> RelayResult<EventStream> {
            Err(RelayError::Provider("unused".into()))
        }

        fn name(&self) -> &str {
            "looping"
        }
    }

    struct FailingModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn complete(&self, _req: ModelRequest) -> RelayResult<ModelResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RelayError::Provider("503 Service Unavailable".into()))
        }

        async fn stream(&self, _req: ModelRequest) -> RelayResult<EventStream> {
            Err(RelayError::Provider("503 Service Unavailable".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    /// Calls `uppercase` with arguments it rejects, then answers "done"
    struct BadArgumentsModel;

    #[async_trait]
    impl LanguageModel for BadArgumentsModel {
        async fn complete(&self, req: ModelRequest) -> RelayResult<ModelResponse> {
            if req.messages.iter().any(|m| m.tool_call_id.is_some()) {
                return Ok(ModelResponse {
                    text: "done".into(),
                    tool_calls: Vec::new(),
                    finish_reason: "stop".into(),
                });
            }
            Ok(ModelResponse {
                text: String::new(),
                tool_calls: vec![ToolCall { id: "bad".into(), name: "uppercase".into(), arguments: json!({ "txt": "x" }) }],
                finish_reason: "tool_calls".into(),
            })
        }

        async fn stream(&self, _req: ModelRequest) -> RelayResult<EventStream> {
            Err(RelayError::Provider("unused".into()))
        }

        fn name(&self) -> &str {
            "bad-arguments"
        }
    }

    fn config_with(model: Arc<dyn LanguageModel>) -> super::super::AgentConfigBuilder {
        AgentConfig::builder("test")
            .instructions("test agent")
            .model(ModelBinding::new(model, "test-model"))
    }

    #[tokio::test]
    async fn test_tool_round_then_answer() {
        let config = config_with(Arc::new(ScriptedModel::new()))
            .tool(builtin::uppercase())
            .build()
            .unwrap();
        let mut dispatch = Dispatch::new(&config, AgentRequest::new("hello world"));
        let reply = dispatch.run(&mut Sink::Buffered).await.unwrap();

        assert_eq!(reply.rounds, 2);
        assert_eq!(reply.tool_invocations.len(), 1);
        assert_eq!(reply.tool_invocations[0].output, json!({ "result": "HELLO WORLD" }));
        assert!(reply.text.contains("HELLO WORLD"));
        assert_eq!(
            dispatch.states,
            vec![
                DispatchState::Received,
                DispatchState::ModelPlanning { round: 1 },
                DispatchState::ToolCalling { calls: 1 },
                DispatchState::ModelPlanning { round: 2 },
                DispatchState::Responding,
                DispatchState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_round_limit_fails() {
        let config = config_with(Arc::new(LoopingModel)).max_rounds(3).build().unwrap();
        let mut dispatch = Dispatch::new(&config, AgentRequest::new("x"));
        let err = dispatch.run(&mut Sink::Buffered).await.unwrap_err();

        assert!(matches!(err, RelayError::MaxRoundsExceeded(_, 3)));
        assert_eq!(dispatch.state, DispatchState::Failed);
        assert_eq!(dispatch.rounds, 3);
        // Unknown tool was reported back to the model each round rather than aborting
        assert_eq!(dispatch.invocations.len(), 3);
        assert!(dispatch.invocations.iter().all(|inv| inv.is_error));
    }

    #[tokio::test]
    async fn test_provider_failure_fails_without_assistant_turn() {
        let memory = Arc::new(InMemoryStore::new(10).unwrap());
        let model = Arc::new(FailingModel { calls: AtomicUsize::new(0) });
        let config = config_with(model.clone()).memory(memory.clone()).build().unwrap();

        let mut dispatch = Dispatch::new(&config, AgentRequest::new("hi").in_conversation("c1"));
        let err = dispatch.run(&mut Sink::Buffered).await.unwrap_err();

        assert!(matches!(err, RelayError::Provider(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        let turns = memory.read(&conversation_key(None, "c1")).unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_require_all_invokes_skipped_tools_in_order() {
        let config = config_with(Arc::new(ScriptedModel::calling_only(&["countWords"])))
            .tools([builtin::uppercase(), builtin::count_words(), builtin::write_story()])
            .policy(ToolPolicy::RequireAll)
            .build()
            .unwrap();
        let mut dispatch = Dispatch::new(&config, AgentRequest::new("a tale"));
        let reply = dispatch.run(&mut Sink::Buffered).await.unwrap();

        let names: Vec<&str> = reply.tool_invocations.iter().map(|i| i.tool_name.as_str()).collect();
        assert_eq!(names, vec!["countWords", "uppercase", "writeStory"]);
        assert!(reply.text.contains("A TALE"));
        assert!(reply.text.contains("\"topic\":\"a tale\""));
    }

    #[tokio::test]
    async fn test_trust_model_does_not_enforce() {
        let config = config_with(Arc::new(ScriptedModel::calling_only(&["countWords"])))
            .tools([builtin::uppercase(), builtin::count_words()])
            .build()
            .unwrap();
        let reply = Dispatch::new(&config, AgentRequest::new("a b"))
            .run(&mut Sink::Buffered)
            .await
            .unwrap();
        assert_eq!(reply.tool_invocations.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_records_turns_and_replays_history() {
        let memory = Arc::new(InMemoryStore::new(100).unwrap());
        let config = config_with(Arc::new(ScriptedModel::new()))
            .tool(builtin::uppercase())
            .memory(memory.clone())
            .build()
            .unwrap();

        Dispatch::new(&config, AgentRequest::new("first").in_conversation("c1"))
            .run(&mut Sink::Buffered)
            .await
            .unwrap();
        let mut second = Dispatch::new(&config, AgentRequest::new("second").in_conversation("c1"));
        second.run(&mut Sink::Buffered).await.unwrap();

        let roles: Vec<Role> = memory.read(&conversation_key(None, "c1")).unwrap().into_iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::User,
                Role::Tool("uppercase".into()),
                Role::Assistant,
                Role::User,
                Role::Tool("uppercase".into()),
                Role::Assistant,
            ]
        );
        // system + replayed user/assistant + new user, then tool round
        assert_eq!(second.context[1], ChatMessage::user("first"));
        assert_eq!(second.context[3], ChatMessage::user("second"));
    }

    #[tokio::test]
    async fn test_no_conversation_id_leaves_memory_untouched() {
        let memory = Arc::new(InMemoryStore::new(100).unwrap());
        let config = config_with(Arc::new(ScriptedModel::new())).memory(memory.clone()).build().unwrap();
        Dispatch::new(&config, AgentRequest::new("hi")).run(&mut Sink::Buffered).await.unwrap();
        assert!(memory.conversations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_users_sharing_a_conversation_id_stay_apart() {
        let memory = Arc::new(InMemoryStore::new(100).unwrap());
        let config = config_with(Arc::new(ScriptedModel::new())).memory(memory.clone()).build().unwrap();

        for user in ["alice", "bob"] {
            Dispatch::new(&config, AgentRequest::new(format!("hi from {}", user)).from_user(user).in_conversation("1"))
                .run(&mut Sink::Buffered)
                .await
                .unwrap();
        }
        let mut second = Dispatch::new(&config, AgentRequest::new("again").from_user("bob").in_conversation("1"));
        second.run(&mut Sink::Buffered).await.unwrap();

        let alice = memory.read(&conversation_key(Some("alice"), "1")).unwrap();
        let contents: Vec<&str> = alice.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi from alice", "You said: hi from alice"]);
        assert_eq!(memory.read(&conversation_key(Some("bob"), "1")).unwrap().len(), 4);
        assert!(!second.context.contains(&ChatMessage::user("hi from alice")));
        assert_eq!(memory.conversations().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_streamed_text_matches_buffered_reply_under_enforcement() {
        let config = config_with(Arc::new(ScriptedModel::calling_only(&[])))
            .tools([builtin::uppercase(), builtin::count_words()])
            .policy(ToolPolicy::RequireAll)
            .build()
            .unwrap();

        let buffered = Dispatch::new(&config, AgentRequest::new("two words"))
            .run(&mut Sink::Buffered)
            .await
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let mut sink = Sink::streaming(tx);
        let streamed = Dispatch::new(&config, AgentRequest::new("two words"))
            .run(&mut sink)
            .await
            .unwrap();
        drop(sink);

        let mut text = String::new();
        while let Some(part) = rx.recv().await {
            if let StreamPart::TextDelta { delta, .. } = part {
                text.push_str(&delta);
            }
        }
        assert!(!buffered.text.contains("You said"));
        assert_eq!(text, buffered.text);
        assert_eq!(streamed.text, buffered.text);
    }

    #[tokio::test]
    async fn test_errored_required_tool_is_invoked_again() {
        let config = config_with(Arc::new(BadArgumentsModel))
            .tool(builtin::uppercase())
            .policy(ToolPolicy::RequireAll)
            .build()
            .unwrap();
        let reply = Dispatch::new(&config, AgentRequest::new("fix me"))
            .run(&mut Sink::Buffered)
            .await
            .unwrap();

        assert_eq!(reply.tool_invocations.len(), 2);
        assert!(reply.tool_invocations[0].is_error);
        assert_eq!(reply.tool_invocations[1].call_id, "enforced_2_1");
        assert_eq!(reply.tool_invocations[1].output, json!({ "result": "FIX ME" }));
    }

    #[tokio::test]
    async fn test_enforcement_in_last_round_gets_one_more_round() {
        let config = config_with(Arc::new(ScriptedModel::calling_only(&[])))
            .tool(builtin::uppercase())
            .policy(ToolPolicy::RequireAll)
            .max_rounds(1)
            .build()
            .unwrap();
        let reply = Dispatch::new(&config, AgentRequest::new("late"))
            .run(&mut Sink::Buffered)
            .await
            .unwrap();

        assert_eq!(reply.rounds, 2);
        assert_eq!(reply.tool_invocations[0].call_id, "enforced_1_1");
        assert!(reply.text.contains("LATE"));
    }
}
