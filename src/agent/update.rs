//! Updates pushed to observers while a turn runs.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use super::LoopError;
use crate::accumulator::StreamStats;
use crate::message::Message;

/// One event in a turn's update stream.
#[derive(Debug, Clone)]
pub enum StreamingUpdate {
    StreamStarted {
        model: String,
    },
    ChunkReceived {
        stream_id: String,
        fragment: String,
        stats: StreamStats,
    },
    ToolExecutionStarted {
        tool_name: String,
        summary: String,
    },
    ToolExecutionComplete {
        tool_name: String,
        failed: bool,
    },
    /// An assistant message was committed to the conversation.
    MessageComplete {
        /// `None` when the reply was not streamed.
        stream_id: Option<String>,
        message: Message,
        stats: Option<StreamStats>,
        /// Rendered activity tree at the time of completion.
        activity: String,
    },
    /// Rendered activity tree. Advisory: dropped when the observer lags.
    ActivityUpdate {
        tree: String,
    },
    StreamError {
        error: LoopError,
    },
}

impl StreamingUpdate {
    /// Updates that may be dropped under backpressure.
    pub fn is_advisory(&self) -> bool {
        matches!(self, StreamingUpdate::ActivityUpdate { .. })
    }

    /// Updates delivered with a bounded wait even if the observer lags.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamingUpdate::MessageComplete { .. } | StreamingUpdate::StreamError { .. }
        )
    }
}

/// Sending half of the update channel, with the delivery policy applied.
///
/// A silent sink discards everything; the blocking API uses one.
#[derive(Debug, Clone)]
pub struct UpdateSink {
    tx: Option<mpsc::Sender<StreamingUpdate>>,
    cancel: CancellationToken,
    terminal_timeout: Duration,
}

impl UpdateSink {
    pub fn new(
        tx: mpsc::Sender<StreamingUpdate>,
        cancel: CancellationToken,
        terminal_timeout: Duration,
    ) -> Self {
        Self {
            tx: Some(tx),
            cancel,
            terminal_timeout,
        }
    }

    pub fn silent() -> Self {
        Self {
            tx: None,
            cancel: CancellationToken::new(),
            terminal_timeout: Duration::ZERO,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.tx.is_none()
    }

    /// Delivers `update` according to its class. Returns whether it was
    /// delivered.
    ///
    /// Advisory updates never wait. Terminal updates wait at most the
    /// configured timeout. Everything else waits until delivered or the turn
    /// is cancelled.
    pub async fn send(&self, update: StreamingUpdate) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };

        if update.is_advisory() {
            return match tx.try_send(update) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!("update channel full, dropping activity update");
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            };
        }

        if update.is_terminal() {
            return match tokio::time::timeout(self.terminal_timeout, tx.send(update)).await {
                Ok(result) => result.is_ok(),
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.terminal_timeout.as_millis() as u64,
                        "observer not draining updates, dropping terminal update"
                    );
                    false
                }
            };
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            result = tx.send(update) => result.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity() -> StreamingUpdate {
        StreamingUpdate::ActivityUpdate { tree: "● x".into() }
    }

    #[tokio::test]
    async fn test_advisory_dropped_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = UpdateSink::new(tx, CancellationToken::new(), Duration::from_millis(10));
        assert!(sink.send(activity()).await);
        assert!(!sink.send(activity()).await);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_terminal_send_times_out() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = UpdateSink::new(tx, CancellationToken::new(), Duration::from_millis(20));
        assert!(sink.send(StreamingUpdate::StreamStarted { model: "m".into() }).await);
        let error = StreamingUpdate::StreamError {
            error: LoopError::EmptyMessage,
        };
        assert!(!sink.send(error).await);
    }

    #[tokio::test]
    async fn test_regular_send_gives_up_on_cancel() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = UpdateSink::new(tx, cancel.clone(), Duration::from_millis(20));
        assert!(sink.send(StreamingUpdate::StreamStarted { model: "m".into() }).await);
        cancel.cancel();
        let started = StreamingUpdate::ToolExecutionStarted {
            tool_name: "bash".into(),
            summary: "ls".into(),
        };
        assert!(!sink.send(started).await);
    }

    #[tokio::test]
    async fn test_silent_sink() {
        let sink = UpdateSink::silent();
        assert!(sink.is_silent());
        assert!(!sink.send(activity()).await);
    }
}
