//! Message trait and queue naming.
//!
//! A message type names itself at compile time through `Message::TYPE`.
//! Every queue the core touches is derived from that name, so wiring between
//! components is done by string convention and never by runtime reflection.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A body type that can travel inside an envelope.
///
/// # Example
/// ```ignore
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Ping {
///     text: String,
/// }
///
/// impl Message for Ping {
///     const TYPE: &'static str = "Ping";
/// }
/// ```
///
/// # Trait bounds
/// - `Serialize` / `DeserializeOwned`: the codec stores bodies as JSON
/// - `Clone`: the failure path keeps a copy of the envelope the handler consumed
/// - `Send + Sync + 'static`: handlers are shared across tasks behind `Arc`
pub trait Message: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Type name, used verbatim as the queue name prefix.
    const TYPE: &'static str;
}

/// Response type for handlers that never reply.
///
/// Uninhabited: a handler declaring `type Response = NoReply` can only
/// return `Ok(None)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoReply {}

impl Message for NoReply {
    const TYPE: &'static str = "NoReply";
}

pub const IN_QUEUE_SUFFIX: &str = ".inq";
pub const PRIORITY_QUEUE_SUFFIX: &str = ".priorityinq";
pub const DLQ_SUFFIX: &str = ".dlq";
pub const OUT_QUEUE_SUFFIX: &str = ".outq";

/// The four conventional queues owned by one message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub in_queue: String,
    pub priority: String,
    pub dlq: String,
    pub out: String,
}

impl QueueNames {
    pub fn for_type(type_name: &str) -> Self {
        Self {
            in_queue: format!("{type_name}{IN_QUEUE_SUFFIX}"),
            priority: format!("{type_name}{PRIORITY_QUEUE_SUFFIX}"),
            dlq: format!("{type_name}{DLQ_SUFFIX}"),
            out: format!("{type_name}{OUT_QUEUE_SUFFIX}"),
        }
    }

    pub fn of<T: Message>() -> Self {
        Self::for_type(T::TYPE)
    }

    /// Input queue for a message with the given priority.
    pub fn in_queue_for(&self, priority: i64) -> &str {
        if priority > 0 { &self.priority } else { &self.in_queue }
    }
}
