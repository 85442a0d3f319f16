//! Compatibility layer between the legacy Text Completions format
//! (`"\n\nHuman: ...\n\nAssistant:"` prompts) and the Messages format.
//!
//! Everything here is a pure function of its input.

use serde::{Deserialize, Serialize};

use super::messages::{ContentBlock, InputMessage, Message, MessageRequest, Role};

pub const HUMAN_PROMPT: &str = "\n\nHuman:";
pub const AI_PROMPT: &str = "\n\nAssistant:";

/// Result of splitting a legacy prompt into structured turns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptConversion {
    pub system: Option<String>,
    pub messages: Vec<InputMessage>,
}

/// Split a legacy prompt on the `Human`/`Assistant` turn markers.
///
/// Non-empty text before the first marker becomes `system`. Turn contents are
/// trimmed and empty turns are dropped.
///
/// A prompt without any marker is passed through best-effort, not repaired:
/// the result has zero messages, and since the whole prompt is leading text
/// it lands in `system` (which is `None` only for a blank prompt). No user
/// turn is invented, so such a conversion is rejected later by
/// [`crate::client::Client`] as a request without messages.
#[must_use]
pub fn prompt_to_messages(prompt: &str) -> PromptConversion {
    let mut markers = Vec::new();
    let mut cursor = 0;
    while let Some((at, role, marker_len)) = next_marker(prompt, cursor) {
        markers.push((at, role, marker_len));
        cursor = at + marker_len;
    }

    let leading_end = markers.first().map_or(prompt.len(), |(at, _, _)| *at);
    let leading = prompt[..leading_end].trim();
    let system = (!leading.is_empty()).then(|| leading.to_string());

    let mut messages = Vec::with_capacity(markers.len());
    for (i, (at, role, marker_len)) in markers.iter().enumerate() {
        let body_start = at + marker_len;
        let body_end = markers.get(i + 1).map_or(prompt.len(), |(next, _, _)| *next);
        let body = prompt[body_start..body_end].trim();
        if body.is_empty() {
            continue;
        }
        messages.push(InputMessage::text(*role, body));
    }

    PromptConversion { system, messages }
}

fn next_marker(prompt: &str, from: usize) -> Option<(usize, Role, usize)> {
    let rest = &prompt[from..];
    let human = rest.find(HUMAN_PROMPT);
    let assistant = rest.find(AI_PROMPT);
    match (human, assistant) {
        (Some(h), Some(a)) if a < h => Some((from + a, Role::Assistant, AI_PROMPT.len())),
        (Some(h), _) => Some((from + h, Role::User, HUMAN_PROMPT.len())),
        (None, Some(a)) => Some((from + a, Role::Assistant, AI_PROMPT.len())),
        (None, None) => None,
    }
}

/// Render structured turns back into a legacy prompt.
///
/// Inverse of [`prompt_to_messages`] for already-normalized input.
#[must_use]
pub fn messages_to_prompt(system: Option<&str>, messages: &[InputMessage]) -> String {
    let mut out = String::new();
    if let Some(system) = system {
        out.push_str(system);
    }
    for message in messages {
        out.push_str(match message.role {
            Role::User => HUMAN_PROMPT,
            Role::Assistant => AI_PROMPT,
        });
        out.push(' ');
        push_content_text(&mut out, &message.content);
    }
    out
}

fn push_content_text(out: &mut String, content: &serde_json::Value) {
    match content {
        serde_json::Value::String(text) => out.push_str(text),
        serde_json::Value::Array(blocks) => {
            for block in blocks {
                if block.get("type").and_then(serde_json::Value::as_str) == Some("text") {
                    if let Some(text) = block.get("text").and_then(serde_json::Value::as_str) {
                        out.push_str(text);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Concatenate the text of every text block, in order.
#[must_use]
pub fn message_to_completion_text(message: &Message) -> String {
    let mut out = String::new();
    for block in &message.content {
        if let ContentBlock::Text { text } = block {
            out.push_str(text);
        }
    }
    out
}

/// Map a legacy stop reason to its Messages equivalent. Total.
#[must_use]
pub fn map_stop_reason(legacy_reason: &str) -> &'static str {
    match legacy_reason {
        "stop_sequence" => "stop_sequence",
        "max_tokens_to_sample" => "max_tokens",
        _ => "end_turn",
    }
}

/// Map a Messages stop reason to the value legacy completion clients expect.
#[must_use]
pub fn legacy_stop_reason(reason: &str) -> &'static str {
    match reason {
        "max_tokens" => "max_tokens",
        _ => "stop_sequence",
    }
}

/// Legacy Text Completions request wire type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens_to_sample: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl CompletionRequest {
    /// Convert into an equivalent Messages request.
    #[must_use]
    pub fn to_message_request(&self) -> MessageRequest {
        let PromptConversion { system, messages } = prompt_to_messages(&self.prompt);
        let mut request = MessageRequest::new(&self.model, self.max_tokens_to_sample, messages);
        request.system = system;
        request.stop_sequences.clone_from(&self.stop_sequences);
        request.temperature = self.temperature;
        request.top_p = self.top_p;
        request.top_k = self.top_k;
        request.stream = self.stream;
        request.metadata.clone_from(&self.metadata);
        request
    }
}

/// Legacy Text Completions response wire type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub id: String,
    #[serde(rename = "type")]
    pub completion_type: String,
    pub completion: String,
    pub stop_reason: Option<String>,
    pub model: String,
}

impl Completion {
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            completion_type: "completion".to_string(),
            completion: message_to_completion_text(message),
            stop_reason: message
                .stop_reason
                .as_deref()
                .map(|reason| legacy_stop_reason(reason).to_string()),
            model: message.model.clone(),
        }
    }
}
