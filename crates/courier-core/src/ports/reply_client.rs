//! ReplyClient port - out-of-band reply delivery.
//!
//! When a reply client factory is configured, the handler loop asks it for a
//! client for each reply destination and tries it before publishing to the
//! in-memory reply queue. Any `ReplyDeliveryError` falls back to that publish.

use std::sync::Arc;

use async_trait::async_trait;

#[async_trait]
pub trait ReplyClient: Send + Sync {
    /// Deliver an encoded reply envelope to `queue_name`.
    async fn send_one_way(&self, queue_name: &str, bytes: &[u8]) -> Result<(), ReplyDeliveryError>;
}

/// Resolves a destination queue name to a reply client, or `None` to use the
/// in-memory queue directly.
pub type ReplyClientFactory = Arc<dyn Fn(&str) -> Option<Arc<dyn ReplyClient>> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ReplyDeliveryError {
    #[error("reply destination unreachable: {0}")]
    Unreachable(String),

    #[error("reply rejected by {queue}: {reason}")]
    Rejected { queue: String, reason: String },
}
