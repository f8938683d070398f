//! Reassembly of streamed reply fragments.
//!
//! The provider delivers a reply as a sequence of [`StreamChunk`]s. The
//! [`ChunkAccumulator`] concatenates them per stream id, in arrival order,
//! and hands out the finished assistant [`Message`] once the final chunk has
//! been seen. It performs no I/O and never blocks.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::message::{Message, Role, ToolCall};
use crate::provider::{ProviderError, Usage};

/// One fragment of an in-progress streamed reply.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub stream_id: String,
    pub content: String,
    pub is_final: bool,
    pub error: Option<ProviderError>,
    /// Model name as echoed back by the provider.
    pub model: String,
    /// Tool calls requested by the model. Usually only on the final chunk.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage, when the provider reports it (final chunk only).
    pub usage: Option<Usage>,
    pub received_at: DateTime<Utc>,
}

impl StreamChunk {
    /// A plain text fragment.
    pub fn text(stream_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            content: content.into(),
            is_final: false,
            error: None,
            model: String::new(),
            tool_calls: Vec::new(),
            usage: None,
            received_at: Utc::now(),
        }
    }

    /// The closing chunk of a stream.
    pub fn done(stream_id: impl Into<String>) -> Self {
        Self {
            is_final: true,
            ..Self::text(stream_id, "")
        }
    }

    /// A chunk reporting a transport failure mid-stream.
    pub fn failed(stream_id: impl Into<String>, error: ProviderError) -> Self {
        Self {
            error: Some(error),
            ..Self::text(stream_id, "")
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Running statistics for one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStats {
    pub stream_id: String,
    pub chunk_count: usize,
    pub content_length: usize,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub duration: chrono::Duration,
    pub is_complete: bool,
}

#[derive(Debug)]
struct PendingMessage {
    content: String,
    chunk_count: usize,
    start_time: DateTime<Utc>,
    last_update: DateTime<Utc>,
    model: String,
    tool_calls: Vec<ToolCall>,
    is_complete: bool,
}

impl PendingMessage {
    fn started_by(chunk: &StreamChunk) -> Self {
        Self {
            content: String::new(),
            chunk_count: 0,
            start_time: chunk.received_at,
            last_update: chunk.received_at,
            model: chunk.model.clone(),
            tool_calls: Vec::new(),
            is_complete: false,
        }
    }

    fn to_message(&self) -> Message {
        Message {
            role: Role::Assistant,
            content: self.content.clone(),
            tool_calls: self.tool_calls.clone(),
            tool_name: None,
            tool_call_id: None,
            timestamp: self.last_update,
        }
    }
}

/// Tracks any number of concurrent streams, keyed by stream id.
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    streams: HashMap<String, PendingMessage>,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one chunk into its stream.
    ///
    /// Error chunks only refresh the stream's last-update time; they never
    /// contribute content.
    pub fn add_chunk(&mut self, chunk: &StreamChunk) {
        if chunk.error.is_some() {
            if let Some(pending) = self.streams.get_mut(&chunk.stream_id) {
                pending.last_update = chunk.received_at;
            }
            return;
        }

        let pending = self
            .streams
            .entry(chunk.stream_id.clone())
            .or_insert_with(|| PendingMessage::started_by(chunk));

        pending.content.push_str(&chunk.content);
        pending.tool_calls.extend(chunk.tool_calls.iter().cloned());
        pending.chunk_count += 1;
        pending.last_update = chunk.received_at;
        if pending.model.is_empty() {
            pending.model.clone_from(&chunk.model);
        }
        if chunk.is_final {
            pending.is_complete = true;
        }
    }

    /// Everything received so far for `stream_id`, or `""` if unknown.
    pub fn current_content(&self, stream_id: &str) -> &str {
        self.streams
            .get(stream_id)
            .map(|p| p.content.as_str())
            .unwrap_or("")
    }

    pub fn is_complete(&self, stream_id: &str) -> bool {
        self.streams.get(stream_id).is_some_and(|p| p.is_complete)
    }

    /// The assembled assistant message, once the final chunk has arrived.
    pub fn complete_message(&self, stream_id: &str) -> Option<Message> {
        self.streams
            .get(stream_id)
            .filter(|p| p.is_complete)
            .map(PendingMessage::to_message)
    }

    /// Removes the stream and returns whatever it accumulated.
    pub fn finalize(&mut self, stream_id: &str) -> Option<Message> {
        self.streams
            .remove(stream_id)
            .map(|pending| pending.to_message())
    }

    pub fn cleanup(&mut self, stream_id: &str) {
        self.streams.remove(stream_id);
    }

    pub fn active_streams(&self) -> Vec<&str> {
        self.streams.keys().map(String::as_str).collect()
    }

    /// Model name echoed by the first chunk that carried one.
    pub fn model(&self, stream_id: &str) -> Option<&str> {
        self.streams
            .get(stream_id)
            .map(|p| p.model.as_str())
            .filter(|m| !m.is_empty())
    }

    pub fn stats(&self, stream_id: &str) -> Option<StreamStats> {
        self.streams.get(stream_id).map(|p| StreamStats {
            stream_id: stream_id.to_string(),
            chunk_count: p.chunk_count,
            content_length: p.content.len(),
            start_time: p.start_time,
            last_update: p.last_update,
            duration: p.last_update - p.start_time,
            is_complete: p.is_complete,
        })
    }
}
