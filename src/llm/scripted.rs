use std::collections::HashMap;
use async_trait::async_trait;
use futures::stream;
use serde_json::json;
use crate::error::RelayResult;
use super::{ChatMessage, ChatRole, EventStream, LanguageModel, ModelRequest, ModelResponse, StreamEvent, ToolCall};

/// Deterministic stand-in for a real provider
///
/// On a fresh user turn it requests every offered tool (or the configured
/// subset) once, in the order offered, passing the user text as `text`.
/// Once tool results are in the context it answers with one line per result.
/// Without tools it echoes the user message.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    only: Option<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request only these tools, leaving the rest uncalled
    pub fn calling_only(tools: &[&str]) -> Self {
        Self {
            only: Some(tools.iter().map(|t| t.to_string()).collect()),
        }
    }

    fn respond(&self, req: &ModelRequest) -> ModelResponse {
        let last_user = req.messages.iter().rposition(|m| m.role == ChatRole::User);
        let (user_text, since_user): (&str, &[ChatMessage]) = match last_user {
            Some(i) => (&req.messages[i].content, &req.messages[i + 1..]),
            None => ("", &req.messages[..0]),
        };

        let results: Vec<&ChatMessage> = since_user.iter().filter(|m| m.role == ChatRole::Tool).collect();
        if results.is_empty() && !req.tools.is_empty() {
            let tool_calls: Vec<ToolCall> = req
                .tools
                .iter()
                .filter(|t| self.only.as_ref().map_or(true, |only| only.contains(&t.name)))
                .enumerate()
                .map(|(i, t)| ToolCall {
                    id: format!("call_{}", i + 1),
                    name: t.name.clone(),
                    arguments: json!({ "text": user_text }),
                })
                .collect();
            if !tool_calls.is_empty() {
                return ModelResponse {
                    text: String::new(),
                    tool_calls,
                    finish_reason: "tool_calls".to_string(),
                };
            }
        }

        let text = if results.is_empty() {
            format!("You said: {}", user_text)
        } else {
            let names: HashMap<&str, &str> = since_user
                .iter()
                .flat_map(|m| m.tool_calls.iter())
                .map(|c| (c.id.as_str(), c.name.as_str()))
                .collect();
            results
                .iter()
                .map(|m| {
                    let name = m
                        .tool_call_id
                        .as_deref()
                        .and_then(|id| names.get(id).copied())
                        .unwrap_or("tool");
                    format!("{}: {}", name, m.content)
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        ModelResponse {
            text,
            tool_calls: Vec::new(),
            finish_reason: "stop".to_string(),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, req: ModelRequest) -> RelayResult<ModelResponse> {
        Ok(self.respond(&req))
    }

    async fn stream(&self, req: ModelRequest) -> RelayResult<EventStream> {
        let response = self.respond(&req);
        let mut events: Vec<RelayResult<StreamEvent>> = response
            .text
            .split_inclusive(' ')
            .map(|piece| Ok(StreamEvent::TextDelta(piece.to_string())))
            .collect();
        events.extend(response.tool_calls.into_iter().map(|c| Ok(StreamEvent::ToolCall(c))));
        events.push(Ok(StreamEvent::Finish {
            finish_reason: response.finish_reason,
        }));
        Ok(Box::pin(stream::iter(events)))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin;
    use futures::StreamExt;

    fn request(messages: Vec<ChatMessage>) -> ModelRequest {
        ModelRequest {
            model: "scripted".into(),
            messages,
            tools: vec![
                builtin::uppercase().definition().clone(),
                builtin::count_words().definition().clone(),
            ],
        }
    }

    #[tokio::test]
    async fn test_requests_all_tools_then_answers() {
        let model = ScriptedModel::new();
        let first = model
            .complete(request(vec![ChatMessage::system("sys"), ChatMessage::user("hi there")]))
            .await
            .unwrap();
        let names: Vec<&str> = first.tool_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["uppercase", "countWords"]);
        assert_eq!(first.tool_calls[0].arguments, json!({ "text": "hi there" }));

        let second = model
            .complete(request(vec![
                ChatMessage::user("hi there"),
                ChatMessage::assistant_tool_calls("", first.tool_calls.clone()),
                ChatMessage::tool_result("call_1", "{\"result\":\"HI THERE\"}"),
            ]))
            .await
            .unwrap();
        assert!(second.tool_calls.is_empty());
        assert_eq!(second.text, "uppercase: {\"result\":\"HI THERE\"}");
    }

    #[tokio::test]
    async fn test_calling_only_subset() {
        let model = ScriptedModel::calling_only(&["countWords"]);
        let out = model.complete(request(vec![ChatMessage::user("a b")])).await.unwrap();
        assert_eq!(out.tool_calls.len(), 1);
        assert_eq!(out.tool_calls[0].name, "countWords");
    }

    #[tokio::test]
    async fn test_stream_reassembles_to_complete_text() {
        let model = ScriptedModel::new();
        let mut req = request(vec![ChatMessage::user("one two three")]);
        req.tools.clear();

        let events: Vec<StreamEvent> = model
            .stream(req)
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta(d) => Some(d.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "You said: one two three");
        assert!(matches!(events.last(), Some(StreamEvent::Finish { .. })));
    }
}
