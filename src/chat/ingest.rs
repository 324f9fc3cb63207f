//! Chat ingestion channel
//!
//! The transport pushes batches into an unbounded queue; a single consumer
//! drains them into the buffer so arrival order is preserved.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{ChatBuffer, ChatMessage};
use crate::error::MonitorError;

/// Cloneable sending half handed to the chat transport
#[derive(Clone)]
pub struct ChatIngest {
    tx: mpsc::UnboundedSender<Vec<ChatMessage>>,
}

impl ChatIngest {
    /// Queue a batch of messages for the buffer
    pub fn send(&self, messages: Vec<ChatMessage>) -> Result<(), MonitorError> {
        if messages.is_empty() {
            return Ok(());
        }
        self.tx
            .send(messages)
            .map_err(|_| MonitorError::TransportUnavailable)
    }

    /// Queue a single message
    pub fn send_one(&self, message: ChatMessage) -> Result<(), MonitorError> {
        self.send(vec![message])
    }
}

/// Create an ingestion channel and spawn its draining task.
///
/// The task ends once every `ChatIngest` clone has been dropped.
pub fn ingest_channel(buffer: Arc<ChatBuffer>) -> (ChatIngest, JoinHandle<u64>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<ChatMessage>>();

    let handle = tokio::spawn(async move {
        let mut drained = 0u64;
        while let Some(batch) = rx.recv().await {
            drained += batch.len() as u64;
            buffer.extend(batch);
        }
        debug!("Chat ingestion closed after {} messages", drained);
        drained
    });

    (ChatIngest { tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_batches_drain_in_order() {
        let buffer = Arc::new(ChatBuffer::with_capacity(10));
        let (ingest, handle) = ingest_channel(Arc::clone(&buffer));

        ingest
            .send(vec![ChatMessage::now("a", "1"), ChatMessage::now("b", "2")])
            .unwrap();
        ingest.send_one(ChatMessage::now("c", "3")).unwrap();
        drop(ingest);

        assert_eq!(handle.await.unwrap(), 3);
        let contents: Vec<String> = buffer.snapshot().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_send_after_consumer_stops() {
        let buffer = Arc::new(ChatBuffer::new());
        let (ingest, handle) = ingest_channel(buffer);
        handle.abort();
        let _ = handle.await;

        let result = ingest.send_one(ChatMessage::now("a", "late"));
        assert!(matches!(result, Err(MonitorError::TransportUnavailable)));
    }
}
