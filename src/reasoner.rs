//! Tool-augmented reasoner: the review tier
//!
//! A multi-step chat loop armed with local analysis tools. The loop
//! trims its conversation through the context window before every model
//! call, executes requested tools, and stops when the model produces a
//! final text turn (expected to parse as `{"action": ...}`).

use std::sync::OnceLock;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
        CreateChatCompletionRequestArgs, FunctionObjectArgs,
    },
    Client,
};
use async_trait::async_trait;
use base64::Engine;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::items::{ToolCall, Turn};
use crate::oracle::convert_turns;
use crate::resilience::classify_api_failure;
use crate::window::ContextWindow;

/// Final state of a review run.
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    /// The conversation as it stood when the reasoner finished
    pub turns: Vec<Turn>,
    /// Content of the final assistant turn
    pub verdict_text: String,
}

/// Opaque multi-step review capability: conversation in, updated
/// conversation and verdict out.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn review(&self, turns: Vec<Turn>) -> Result<ReviewOutcome>;
}

/// Reasoner backed by a chat-completion model with local analysis tools.
pub struct OpenAiReasoner {
    client: Client<OpenAIConfig>,
    model: String,
    window: ContextWindow,
    max_steps: usize,
}

impl OpenAiReasoner {
    pub fn new(
        client: Client<OpenAIConfig>,
        model: impl Into<String>,
        window: ContextWindow,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            window,
            max_steps: 8,
        }
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }
}

#[async_trait]
impl Reasoner for OpenAiReasoner {
    async fn review(&self, turns: Vec<Turn>) -> Result<ReviewOutcome> {
        let mut turns = turns;
        for step in 0..self.max_steps {
            let trimmed = self.window.trim(&turns);
            let request = CreateChatCompletionRequestArgs::default()
                .model(&self.model)
                .messages(convert_turns(&trimmed)?)
                .tools(tool_specs().clone())
                .build()?;

            let response = self
                .client
                .chat()
                .create(request)
                .await
                .map_err(classify_api_failure)?;
            let choice = response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| GatewayError::Other("model returned no choices".to_string()))?;

            let requested: Vec<ToolCall> = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: serde_json::from_str(&call.function.arguments)
                        .unwrap_or(Value::Null),
                })
                .collect();
            let content = choice.message.content.unwrap_or_default();

            if requested.is_empty() {
                turns.push(Turn::assistant(content.clone()));
                return Ok(ReviewOutcome {
                    turns,
                    verdict_text: content,
                });
            }

            debug!(step, tools = requested.len(), "reasoner requested tools");
            turns.push(Turn::assistant_with_tool_calls(content, requested.clone()));
            for call in requested {
                let output = run_tool(&call.name, &call.arguments);
                turns.push(Turn::tool(output, call.id));
            }
        }
        Err(GatewayError::ReviewDiverged {
            max_steps: self.max_steps,
        })
    }
}

// ===== Local analysis tools =====

fn run_tool(name: &str, arguments: &Value) -> String {
    let text_arg = |key: &str| {
        arguments
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    match name {
        "suspicious_pattern_detector" => suspicious_pattern_detector(&text_arg("request_payload")),
        "base64_decode" => base64_decode(&text_arg("encoded")),
        "unicode_decode" => unicode_decode(&text_arg("encoded")),
        other => format!("unknown tool: {other}"),
    }
}

fn injection_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)(\bselect\b|\binsert\b|\bupdate\b|\bdelete\b|\bdrop\b)",
            r"(?i)<script.*?>.*?</script>",
            r"(?i)\bUNION\b.*\bSELECT\b",
            r"\.\./",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("injection pattern compiles"))
        .collect()
    })
}

/// Scan a payload for SQL injection, XSS, union-injection and path
/// traversal signatures.
pub fn suspicious_pattern_detector(payload: &str) -> String {
    for pattern in injection_patterns() {
        if pattern.is_match(payload) {
            return format!("malicious pattern detected: {}", pattern.as_str());
        }
    }
    "no SQL, XSS, union-injection or path-traversal patterns matched".to_string()
}

/// Decode a base64 payload, peeling one extra layer when the payload was
/// encoded twice.
pub fn base64_decode(encoded: &str) -> String {
    let engine = base64::engine::general_purpose::STANDARD;
    match engine.decode(encoded.trim()) {
        Ok(first) => {
            let inner = std::str::from_utf8(&first)
                .ok()
                .and_then(|text| engine.decode(text.trim()).ok());
            let bytes = inner.unwrap_or(first);
            String::from_utf8_lossy(&bytes).into_owned()
        }
        Err(err) => format!("[base64 decode failed] {err}"),
    }
}

/// Decode `\uXXXX` and `&#xXXXX;` escapes into readable text.
pub fn unicode_decode(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len());
    let mut chars = encoded.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'u') {
            chars.next();
            let hex: String = chars.by_ref().take(4).collect();
            match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                Some(decoded) => out.push(decoded),
                None => {
                    out.push_str("\\u");
                    out.push_str(&hex);
                }
            }
        } else if c == '&' && chars.peek() == Some(&'#') {
            let mut entity = String::new();
            for next in chars.by_ref() {
                if next == ';' {
                    break;
                }
                entity.push(next);
            }
            let digits = entity.trim_start_matches('#');
            let value = if let Some(hex) = digits.strip_prefix('x') {
                u32::from_str_radix(hex, 16).ok()
            } else {
                digits.parse::<u32>().ok()
            };
            match value.and_then(char::from_u32) {
                Some(decoded) => out.push(decoded),
                None => {
                    out.push('&');
                    out.push_str(&entity);
                    out.push(';');
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn tool_specs() -> &'static Vec<ChatCompletionTool> {
    static SPECS: OnceLock<Vec<ChatCompletionTool>> = OnceLock::new();
    SPECS.get_or_init(|| {
        let spec = |name: &str, description: &str, arg: &str, arg_description: &str| {
            ChatCompletionToolArgs::default()
                .r#type(ChatCompletionToolType::Function)
                .function(
                    FunctionObjectArgs::default()
                        .name(name)
                        .description(description)
                        .parameters(serde_json::json!({
                            "type": "object",
                            "properties": {
                                arg: {"type": "string", "description": arg_description}
                            },
                            "required": [arg]
                        }))
                        .build()
                        .expect("valid function object"),
                )
                .build()
                .expect("valid chat tool")
        };
        vec![
            spec(
                "suspicious_pattern_detector",
                "Detect SQL injection, XSS and path traversal patterns in a request payload",
                "request_payload",
                "HTTP request parameters or body to scan",
            ),
            spec(
                "base64_decode",
                "Decode a base64-encoded string, including double-encoded payloads",
                "encoded",
                "base64 text to decode",
            ),
            spec(
                "unicode_decode",
                "Decode unicode escapes such as \\u003cscript\\u003e into readable text",
                "encoded",
                "text containing unicode escapes",
            ),
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pattern_detector_flags_sql() {
        let verdict = suspicious_pattern_detector("id=1; DROP TABLE users");
        assert!(verdict.contains("malicious pattern detected"));
    }

    #[test]
    fn test_pattern_detector_flags_traversal() {
        let verdict = suspicious_pattern_detector("GET /files?path=../../etc/passwd");
        assert!(verdict.contains("malicious pattern detected"));
    }

    #[test]
    fn test_pattern_detector_passes_clean_payload() {
        let verdict = suspicious_pattern_detector("name=alice&age=30");
        assert!(verdict.contains("no SQL"));
    }

    #[test]
    fn test_base64_single_layer() {
        assert_eq!(base64_decode("aGVsbG8="), "hello");
    }

    #[test]
    fn test_base64_double_layer() {
        // "hi" -> "aGk=" -> "YUdrPQ=="
        assert_eq!(base64_decode("YUdrPQ=="), "hi");
    }

    #[test]
    fn test_base64_rejects_garbage() {
        assert!(base64_decode("!!!not base64!!!").contains("decode failed"));
    }

    #[test]
    fn test_unicode_decode_escapes() {
        assert_eq!(unicode_decode(r"\u003cscript\u003e"), "<script>");
        assert_eq!(unicode_decode("&#x41;&#66;"), "AB");
    }

    #[test]
    fn test_unicode_decode_leaves_plain_text() {
        assert_eq!(unicode_decode("plain text"), "plain text");
    }

    #[test]
    fn test_run_tool_unknown_name() {
        let out = run_tool("launch_missiles", &serde_json::json!({}));
        assert_eq!(out, "unknown tool: launch_missiles");
    }

    #[test]
    fn test_tool_specs_cover_local_tools() {
        let specs = tool_specs();
        assert_eq!(specs.len(), 3);
    }
}
