//! Policy oracle: the first judgment tier
//!
//! A single chat completion over the serialized request context,
//! expected to answer `{"action": ...}`. Transport failures are
//! classified into the gateway's failure taxonomy here, at the
//! boundary, so the retry controller never inspects message text.

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;

use crate::error::{GatewayError, Result};
use crate::items::{Role, Turn};
use crate::resilience::classify_api_failure;

const ORACLE_PREAMBLE: &str = "You are the policy oracle of an HTTP security gateway. \
You receive one inbound request serialized as JSON and decide whether it is safe to \
forward. Watch for SQL injection, XSS, path traversal, encoded payloads and other \
abuse. Answer with exactly one JSON object and nothing else: \
{\"action\": \"allow\"} if the request is clearly safe, \
{\"action\": \"block\"} if it is clearly malicious, \
{\"action\": \"review\"} if you are unsure and a deeper review is warranted.";

/// Build the human prompt sent to the oracle for one request.
pub fn oracle_prompt(summary: &str) -> String {
    format!("Incoming request context:\n{summary}\n\nClassify this request.")
}

/// External judgment capability returning an `{"action": ...}` payload
/// for a request summary.
#[async_trait]
pub trait PolicyOracle: Send + Sync {
    async fn judge(&self, summary: &str) -> Result<String>;
}

/// Oracle backed by a chat-completion model.
pub struct OpenAiOracle {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiOracle {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl PolicyOracle for OpenAiOracle {
    async fn judge(&self, summary: &str) -> Result<String> {
        let turns = [
            Turn::system(ORACLE_PREAMBLE),
            Turn::human(oracle_prompt(summary)),
        ];
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(convert_turns(&turns)?)
            .build()?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(classify_api_failure)?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| GatewayError::Other("model returned no choices".to_string()))?;
        choice
            .message
            .content
            .clone()
            .ok_or_else(|| GatewayError::Other("model returned empty content".to_string()))
    }
}

/// Map gateway turns onto the wire message types.
pub(crate) fn convert_turns(turns: &[Turn]) -> Result<Vec<ChatCompletionRequestMessage>> {
    let mut messages = Vec::with_capacity(turns.len());
    for turn in turns {
        let message: ChatCompletionRequestMessage = match turn.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(turn.content.clone())
                .build()?
                .into(),
            Role::Human => ChatCompletionRequestUserMessageArgs::default()
                .content(turn.content.clone())
                .build()?
                .into(),
            Role::Assistant => {
                let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                builder.content(turn.content.clone());
                if let Some(calls) = &turn.tool_calls {
                    let wire_calls: Vec<_> = calls
                        .iter()
                        .map(|call| async_openai::types::ChatCompletionMessageToolCall {
                            id: call.id.clone(),
                            r#type: async_openai::types::ChatCompletionToolType::Function,
                            function: async_openai::types::FunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.to_string(),
                            },
                        })
                        .collect();
                    builder.tool_calls(wire_calls);
                }
                builder.build()?.into()
            }
            Role::Tool => ChatCompletionRequestToolMessageArgs::default()
                .content(turn.content.clone())
                .tool_call_id(turn.tool_call_id.clone().unwrap_or_default())
                .build()?
                .into(),
        };
        messages.push(message);
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::ToolCall;

    #[test]
    fn test_oracle_prompt_embeds_summary() {
        let prompt = oracle_prompt("{\"method\": \"GET\"}");
        assert!(prompt.contains("{\"method\": \"GET\"}"));
        assert!(prompt.contains("Classify this request."));
    }

    #[test]
    fn test_preamble_names_every_action() {
        for action in ["allow", "block", "review"] {
            assert!(ORACLE_PREAMBLE.contains(action));
        }
    }

    #[test]
    fn test_convert_turns_roundtrips_roles() {
        let turns = vec![
            Turn::system("s"),
            Turn::human("h"),
            Turn::assistant_with_tool_calls(
                "",
                vec![ToolCall {
                    id: "call_1".to_string(),
                    name: "base64_decode".to_string(),
                    arguments: serde_json::json!({"encoded": "eA=="}),
                }],
            ),
            Turn::tool("x", "call_1"),
        ];
        let messages = convert_turns(&turns).unwrap();
        assert_eq!(messages.len(), 4);
        assert!(matches!(
            messages[0],
            ChatCompletionRequestMessage::System(_)
        ));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
        match &messages[2] {
            ChatCompletionRequestMessage::Assistant(m) => {
                assert_eq!(m.tool_calls.as_ref().unwrap().len(), 1);
            }
            other => panic!("expected assistant message, got {other:?}"),
        }
        match &messages[3] {
            ChatCompletionRequestMessage::Tool(m) => {
                assert_eq!(m.tool_call_id, "call_1");
            }
            other => panic!("expected tool message, got {other:?}"),
        }
    }
}
