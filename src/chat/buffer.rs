//! Bounded FIFO of recent chat messages

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of messages kept in the window
pub const DEFAULT_CAPACITY: usize = 100;

/// A single chat line as delivered by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub username: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(username: &str, content: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            username: username.to_string(),
            content: content.to_string(),
            timestamp,
        }
    }

    /// Create a message stamped with the current time
    pub fn now(username: &str, content: &str) -> Self {
        Self::new(username, content, Utc::now())
    }

    /// Parse a `username: message` line
    pub fn parse_line(line: &str) -> Option<Self> {
        let (user, content) = line.split_once(':')?;
        let user = user.trim();
        let content = content.trim();
        if user.is_empty() || content.is_empty() || user.contains(char::is_whitespace) {
            return None;
        }
        Some(Self::now(user, content))
    }
}

/// Ordered, capacity-bounded message store.
///
/// Insertion order is the only ordering; timestamps are never used to reorder.
/// Readers get a copy so ingestion can continue while a cycle iterates.
pub struct ChatBuffer {
    capacity: usize,
    messages: RwLock<VecDeque<ChatMessage>>,
}

impl ChatBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            messages: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append a message, evicting the oldest ones past capacity
    pub fn append(&self, message: ChatMessage) {
        let mut messages = self.messages.write();
        messages.push_back(message);
        while messages.len() > self.capacity {
            messages.pop_front();
        }
    }

    /// Append a batch under a single write lock, preserving order
    pub fn extend<I>(&self, batch: I)
    where
        I: IntoIterator<Item = ChatMessage>,
    {
        let mut messages = self.messages.write();
        for message in batch {
            messages.push_back(message);
            if messages.len() > self.capacity {
                messages.pop_front();
            }
        }
    }

    /// Point-in-time copy, oldest first
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.read().iter().cloned().collect()
    }

    /// Most recent `limit` messages, oldest first
    pub fn recent(&self, limit: usize) -> Vec<ChatMessage> {
        let messages = self.messages.read();
        let skip = messages.len().saturating_sub(limit);
        messages.iter().skip(skip).cloned().collect()
    }

    /// Timestamp of the newest message
    pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.messages.read().back().map(|m| m.timestamp)
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ChatBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(i: usize) -> ChatMessage {
        ChatMessage::now(&format!("user{}", i), &format!("message {}", i))
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        for n in [0usize, 1, 5, 10, 11, 25] {
            let buffer = ChatBuffer::with_capacity(10);
            for i in 0..n {
                buffer.append(numbered(i));
            }
            assert_eq!(buffer.len(), n.min(10));

            let expected: Vec<String> = (n.saturating_sub(10)..n)
                .map(|i| format!("message {}", i))
                .collect();
            let retained: Vec<String> = buffer.snapshot().into_iter().map(|m| m.content).collect();
            assert_eq!(retained, expected);
        }
    }

    #[test]
    fn test_eviction_keeps_most_recent_hundred() {
        let buffer = ChatBuffer::new();
        for i in 0..105 {
            buffer.append(numbered(i));
        }

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 100);
        assert_eq!(snapshot[0].content, "message 5");
        assert_eq!(snapshot[99].content, "message 104");
    }

    #[test]
    fn test_insertion_order_wins_over_timestamps() {
        let buffer = ChatBuffer::with_capacity(5);
        let later = Utc::now();
        let earlier = later - chrono::Duration::seconds(30);

        buffer.append(ChatMessage::new("a", "first", later));
        buffer.append(ChatMessage::new("b", "second", earlier));

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot[0].content, "first");
        assert_eq!(snapshot[1].content, "second");
        assert_eq!(buffer.newest_timestamp(), Some(earlier));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let buffer = ChatBuffer::with_capacity(3);
        buffer.append(numbered(0));
        let snapshot = buffer.snapshot();

        buffer.extend((1..5).map(numbered));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.recent(2)[1].content, "message 4");
    }

    #[test]
    fn test_parse_line() {
        let msg = ChatMessage::parse_line("alice: hello there: friend").unwrap();
        assert_eq!(msg.username, "alice");
        assert_eq!(msg.content, "hello there: friend");

        assert!(ChatMessage::parse_line("no separator").is_none());
        assert!(ChatMessage::parse_line("two words: hi").is_none());
        assert!(ChatMessage::parse_line("bob:   ").is_none());
    }
}
