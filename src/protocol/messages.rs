use serde::{Deserialize, Serialize};

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[default]
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Messages API request wire type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<InputMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MessageRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, max_tokens: u32, messages: Vec<InputMessage>) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            messages,
            system: None,
            stop_sequences: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stream: None,
            metadata: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// One conversation turn of a request. `content` is either a plain string or
/// an array of content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    pub role: Role,
    pub content: serde_json::Value,
}

impl InputMessage {
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: serde_json::Value::String(text.into()),
        }
    }

    /// The content as plain text, when it was given as a string.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        self.content.as_str()
    }
}

/// Token usage reported for a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Partial usage carried by `message_delta`. Counts are cumulative, so a
/// present field replaces the running value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

/// Kind of a content block, fixed by its `content_block_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    ToolUse,
}

impl BlockKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::Text => "text",
            BlockKind::ToolUse => "tool_use",
        }
    }
}

/// A content block in a response. Also used as the seed carried by
/// `content_block_start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

impl ContentBlock {
    #[must_use]
    pub fn kind(&self) -> BlockKind {
        match self {
            ContentBlock::Text { .. } => BlockKind::Text,
            ContentBlock::ToolUse { .. } => BlockKind::ToolUse,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::ToolUse { .. } => None,
        }
    }
}

/// A fully assembled assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub model: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

/// Incremental update applied to an open block or to message metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    /// Only legal in `message_delta`.
    StopMetadataDelta {
        stop_reason: Option<String>,
        stop_sequence: Option<String>,
    },
}

impl Delta {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Delta::TextDelta { .. } => "text_delta",
            Delta::InputJsonDelta { .. } => "input_json_delta",
            Delta::StopMetadataDelta { .. } => "stop_metadata_delta",
        }
    }

    /// Block kind this delta may be applied to, if any.
    #[must_use]
    pub fn block_kind(&self) -> Option<BlockKind> {
        match self {
            Delta::TextDelta { .. } => Some(BlockKind::Text),
            Delta::InputJsonDelta { .. } => Some(BlockKind::ToolUse),
            Delta::StopMetadataDelta { .. } => None,
        }
    }
}

/// Typed server-sent event of a streaming Messages response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart {
        message: Message,
    },
    ContentBlockStart {
        index: usize,
        block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: Delta,
        usage: UsageDelta,
    },
    MessageStop,
    Ping,
    Error {
        error_type: String,
        message: String,
    },
    Unknown {
        event_type: String,
        payload: serde_json::Value,
    },
}

impl StreamEvent {
    /// The SSE `event:` name this event was decoded from.
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::ContentBlockStop { .. } => "content_block_stop",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Ping => "ping",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Unknown { event_type, .. } => event_type,
        }
    }
}

/// `{"type": "...", "message": "..."}` error body used by error responses,
/// `error` stream events and errored batch results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}

/// `{"type": "error", "error": {...}}` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub envelope_type: Option<String>,
    pub error: ErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_deserializes_api_shape() {
        let message: Message = serde_json::from_value(json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-sonnet-latest",
            "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": "rust"}}
            ],
            "stop_reason": "tool_use",
            "stop_sequence": null,
            "usage": {"input_tokens": 12, "output_tokens": 30, "cache_read_input_tokens": 0}
        }))
        .unwrap();

        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content.len(), 2);
        assert_eq!(message.content[1].kind(), BlockKind::ToolUse);
        assert_eq!(message.usage.output_tokens, 30);
    }

    #[test]
    fn test_request_skips_unset_fields() {
        let request = MessageRequest::new(
            "claude-3-haiku",
            64,
            vec![InputMessage::text(Role::User, "hi")],
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "claude-3-haiku",
                "max_tokens": 64,
                "messages": [{"role": "user", "content": "hi"}]
            })
        );
    }

    #[test]
    fn test_delta_block_kind() {
        let text = Delta::TextDelta {
            text: "a".to_string(),
        };
        let stop = Delta::StopMetadataDelta {
            stop_reason: None,
            stop_sequence: None,
        };
        assert_eq!(text.block_kind(), Some(BlockKind::Text));
        assert_eq!(stop.block_kind(), None);
        assert_eq!(stop.name(), "stop_metadata_delta");
    }
}
