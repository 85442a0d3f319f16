use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::error::{ApiError, ProtocolViolation, WireError};
use crate::protocol::messages::{
    BlockKind, ContentBlock, Delta, Message, Role, StreamEvent, Usage, UsageDelta,
};

/// Per-index block state. An index with no entry has not been opened.
#[derive(Debug)]
enum BlockSlot {
    Open(OpenBlock),
    Closed(ContentBlock),
}

#[derive(Debug)]
enum OpenBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        seed_input: serde_json::Value,
        partial_json: String,
    },
}

impl OpenBlock {
    fn from_seed(seed: &ContentBlock) -> Self {
        match seed {
            ContentBlock::Text { text } => OpenBlock::Text { text: text.clone() },
            ContentBlock::ToolUse { id, name, input } => OpenBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                seed_input: input.clone(),
                partial_json: String::new(),
            },
        }
    }

    fn kind(&self) -> BlockKind {
        match self {
            OpenBlock::Text { .. } => BlockKind::Text,
            OpenBlock::ToolUse { .. } => BlockKind::ToolUse,
        }
    }

    fn apply(&mut self, index: usize, delta: &Delta) -> Result<(), ProtocolViolation> {
        match (self, delta) {
            (OpenBlock::Text { text }, Delta::TextDelta { text: fragment }) => {
                text.push_str(fragment);
                Ok(())
            }
            (OpenBlock::ToolUse { partial_json, .. }, Delta::InputJsonDelta { partial_json: fragment }) => {
                partial_json.push_str(fragment);
                Ok(())
            }
            (_, Delta::StopMetadataDelta { .. }) => Err(ProtocolViolation::UnexpectedDelta {
                delta: delta.name(),
                event: "content_block_delta",
            }),
            (open, _) => Err(ProtocolViolation::DeltaKindMismatch {
                index,
                expected: open.kind().as_str(),
                received: delta.name(),
            }),
        }
    }

    /// Freeze the block. Tool input is parsed once, as a whole document.
    fn close(self, index: usize) -> Result<ContentBlock, ProtocolViolation> {
        match self {
            OpenBlock::Text { text } => Ok(ContentBlock::Text { text }),
            OpenBlock::ToolUse {
                id,
                name,
                seed_input,
                partial_json,
            } => {
                let input = if partial_json.trim().is_empty() {
                    seed_input
                } else {
                    serde_json::from_str(&partial_json).map_err(|err| {
                        ProtocolViolation::InvalidToolInput {
                            index,
                            reason: err.to_string(),
                        }
                    })?
                };
                Ok(ContentBlock::ToolUse { id, name, input })
            }
        }
    }
}

#[derive(Debug)]
struct MessageMeta {
    id: String,
    model: String,
    role: Role,
    stop_reason: Option<String>,
    stop_sequence: Option<String>,
    usage: Usage,
}

/// What a single [`ContentAccumulator::apply`] call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Nothing,
    BlockClosed { index: usize, block: ContentBlock },
    MessageComplete(Message),
}

/// Assembles streamed deltas into closed content blocks and, at
/// `message_stop`, a complete [`Message`].
///
/// One accumulator serves exactly one message. Every invariant violation is
/// returned as [`ProtocolViolation`]; an `error` event is returned as
/// [`WireError::Api`].
#[derive(Debug, Default)]
pub struct ContentAccumulator {
    meta: Option<MessageMeta>,
    blocks: BTreeMap<usize, BlockSlot>,
    stopped: bool,
}

impl ContentAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `message_stop` has been applied.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stopped
    }

    /// Whether `message_start` has been applied.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.meta.is_some()
    }

    /// The closed block at `index`, if any.
    #[must_use]
    pub fn closed_block(&self, index: usize) -> Option<&ContentBlock> {
        match self.blocks.get(&index) {
            Some(BlockSlot::Closed(block)) => Some(block),
            _ => None,
        }
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::Protocol`] when the event breaks the block or
    /// message lifecycle, and [`WireError::Api`] for an `error` event.
    pub fn apply(&mut self, event: &StreamEvent) -> Result<Applied, WireError> {
        match event {
            StreamEvent::Ping | StreamEvent::Unknown { .. } => Ok(Applied::Nothing),
            StreamEvent::Error {
                error_type,
                message,
            } => Err(ApiError::from_stream_event(error_type, message).into()),
            StreamEvent::MessageStart { message } => {
                self.ensure_not_stopped("message_start")?;
                if self.meta.is_some() {
                    return Err(ProtocolViolation::MessageAlreadyStarted.into());
                }
                self.meta = Some(MessageMeta {
                    id: message.id.clone(),
                    model: message.model.clone(),
                    role: message.role,
                    stop_reason: message.stop_reason.clone(),
                    stop_sequence: message.stop_sequence.clone(),
                    usage: message.usage,
                });
                Ok(Applied::Nothing)
            }
            StreamEvent::ContentBlockStart { index, block } => {
                self.ensure_in_message("content_block_start")?;
                let index = *index;
                match self.blocks.entry(index) {
                    Entry::Vacant(vacant) => {
                        vacant.insert(BlockSlot::Open(OpenBlock::from_seed(block)));
                        Ok(Applied::Nothing)
                    }
                    Entry::Occupied(occupied) => match occupied.get() {
                        BlockSlot::Open(_) => {
                            Err(ProtocolViolation::IndexAlreadyOpen { index }.into())
                        }
                        BlockSlot::Closed(_) => Err(ProtocolViolation::IndexAlreadyClosed {
                            index,
                            event: "content_block_start",
                        }
                        .into()),
                    },
                }
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                self.ensure_in_message("content_block_delta")?;
                let index = *index;
                match self.blocks.get_mut(&index) {
                    Some(BlockSlot::Open(open)) => {
                        open.apply(index, delta)?;
                        Ok(Applied::Nothing)
                    }
                    Some(BlockSlot::Closed(_)) => Err(ProtocolViolation::IndexAlreadyClosed {
                        index,
                        event: "content_block_delta",
                    }
                    .into()),
                    None => Err(ProtocolViolation::UnknownIndex {
                        index,
                        event: "content_block_delta",
                    }
                    .into()),
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                self.ensure_in_message("content_block_stop")?;
                let index = *index;
                match self.blocks.remove(&index) {
                    Some(BlockSlot::Open(open)) => {
                        let block = open.close(index)?;
                        self.blocks.insert(index, BlockSlot::Closed(block.clone()));
                        Ok(Applied::BlockClosed { index, block })
                    }
                    Some(closed @ BlockSlot::Closed(_)) => {
                        self.blocks.insert(index, closed);
                        Err(ProtocolViolation::IndexAlreadyClosed {
                            index,
                            event: "content_block_stop",
                        }
                        .into())
                    }
                    None => Err(ProtocolViolation::UnknownIndex {
                        index,
                        event: "content_block_stop",
                    }
                    .into()),
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                let meta = self.meta_mut("message_delta")?;
                let Delta::StopMetadataDelta {
                    stop_reason,
                    stop_sequence,
                } = delta
                else {
                    return Err(ProtocolViolation::UnexpectedDelta {
                        delta: delta.name(),
                        event: "message_delta",
                    }
                    .into());
                };
                if stop_reason.is_some() {
                    meta.stop_reason.clone_from(stop_reason);
                }
                if stop_sequence.is_some() {
                    meta.stop_sequence.clone_from(stop_sequence);
                }
                merge_usage(&mut meta.usage, *usage);
                Ok(Applied::Nothing)
            }
            StreamEvent::MessageStop => {
                self.ensure_in_message("message_stop")?;
                let message = self.freeze()?;
                self.stopped = true;
                Ok(Applied::MessageComplete(message))
            }
        }
    }

    fn ensure_not_stopped(&self, event: &'static str) -> Result<(), ProtocolViolation> {
        if self.stopped {
            return Err(ProtocolViolation::MessageAlreadyStopped { event });
        }
        Ok(())
    }

    fn ensure_in_message(&self, event: &'static str) -> Result<(), ProtocolViolation> {
        self.ensure_not_stopped(event)?;
        if self.meta.is_none() {
            return Err(ProtocolViolation::MessageNotStarted { event });
        }
        Ok(())
    }

    fn meta_mut(&mut self, event: &'static str) -> Result<&mut MessageMeta, ProtocolViolation> {
        self.ensure_not_stopped(event)?;
        self.meta
            .as_mut()
            .ok_or(ProtocolViolation::MessageNotStarted { event })
    }

    fn freeze(&self) -> Result<Message, ProtocolViolation> {
        if let Some((&index, _)) = self
            .blocks
            .iter()
            .find(|(_, slot)| matches!(slot, BlockSlot::Open(_)))
        {
            return Err(ProtocolViolation::BlockOpenAtStop { index });
        }
        let meta = self
            .meta
            .as_ref()
            .ok_or(ProtocolViolation::MessageNotStarted {
                event: "message_stop",
            })?;
        let content = self
            .blocks
            .values()
            .filter_map(|slot| match slot {
                BlockSlot::Closed(block) => Some(block.clone()),
                BlockSlot::Open(_) => None,
            })
            .collect();
        Ok(Message {
            id: meta.id.clone(),
            model: meta.model.clone(),
            role: meta.role,
            content,
            stop_reason: meta.stop_reason.clone(),
            stop_sequence: meta.stop_sequence.clone(),
            usage: meta.usage,
        })
    }
}

fn merge_usage(usage: &mut Usage, delta: UsageDelta) {
    if let Some(input_tokens) = delta.input_tokens {
        usage.input_tokens = input_tokens;
    }
    if let Some(output_tokens) = delta.output_tokens {
        usage.output_tokens = output_tokens;
    }
}
