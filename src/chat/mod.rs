//! Chat Window
//!
//! Bounded view of recent chat activity plus the ingestion channel that feeds
//! it. The buffer is the only structure written outside an analysis cycle.

mod buffer;
mod ingest;

pub use buffer::{ChatBuffer, ChatMessage, DEFAULT_CAPACITY};
pub use ingest::{ingest_channel, ChatIngest};
