//! Message normalization pipeline and client chat state for Relay.
//!
//! Raw inputs (live agent events, transport signals, legacy persisted rows)
//! are decoded at the boundary into a closed sum type, normalized into one
//! `ProcessedMessage` shape, deduplicated by identity + recency, and merged
//! into an ordered display timeline.

mod agent_events;
mod chat_store;
mod pipeline;
mod processed;
mod raw;

pub use agent_events::{AgentContentBlock, AgentEvent, AgentMessage, AgentUsage};
pub use chat_store::{ChatStore, ChatStoreStats};
pub use pipeline::{
    deduplicate_messages, merge_streaming_message, process_message, process_messages,
};
pub use processed::{MessageMetadata, ProcessedMessage, ProcessedMessageKind, TokenUsage};
pub use raw::{decode_raw_message, RawLegacyRow, RawMessage};
