pub mod batch;
pub mod completion;
pub mod messages;

pub use batch::{
    BatchOutcome, BatchPage, BatchRequest, BatchResult, DeletedBatch, ListParams,
    MessageBatch, ProcessingStatus, RequestCounts,
};
pub use completion::{Completion, CompletionRequest, PromptConversion};
pub use messages::{
    BlockKind, ContentBlock, Delta, ErrorBody, ErrorEnvelope, InputMessage, Message,
    MessageRequest, Role, StreamEvent, Usage, UsageDelta,
};
