//! QueueStore port - named FIFO byte queues.
//!
//! The in-memory store in `impls` is non-durable. A binding to a durable
//! broker implements this same trait and is swapped in through `QueueClient`.

use tokio::sync::mpsc::UnboundedReceiver;

/// Thread-safe mapping from queue name to an ordered sequence of byte blobs.
///
/// # Contract
/// - FIFO per queue name, no ordering across queues
/// - queues are created lazily on first enqueue and never deleted
/// - `try_dequeue` never blocks; an empty or unknown queue is `None`
/// - stored blobs are never mutated
pub trait QueueStore: Send + Sync {
    /// Append to the tail of `queue_name`, then signal every subscriber.
    fn enqueue(&self, queue_name: &str, bytes: Vec<u8>);

    /// Remove and return the head of `queue_name`.
    fn try_dequeue(&self, queue_name: &str) -> Option<Vec<u8>>;

    /// Subscribe to "message arrived" signals. Each enqueue sends the queue name.
    fn subscribe(&self) -> UnboundedReceiver<String>;

    /// Number of messages currently in `queue_name`.
    fn len(&self, queue_name: &str) -> usize;

    /// Names of every queue created so far, sorted.
    fn queue_names(&self) -> Vec<String>;

    fn is_empty(&self, queue_name: &str) -> bool {
        self.len(queue_name) == 0
    }
}

/// Errors of queue-level operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("operation not supported by this queue: {0}")]
    NotSupported(&'static str),
}
