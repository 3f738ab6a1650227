//! Envelope - one unit of work in flight.

use std::collections::BTreeMap;
use std::ops::BitOr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::HandlerError;
use super::ids::MessageId;
use super::message::{Message, QueueNames};

/// Delivery option bit flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageOptions(u32);

impl MessageOptions {
    pub const NONE: Self = Self(0);

    /// No response expected, but signal completion on `{T}.outq`.
    pub const NOTIFY_ONE_WAY: Self = Self(1);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MessageOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Structured error attached to an envelope before a retry or DLQ publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_summary: Option<String>,
}

impl From<&HandlerError> for ErrorInfo {
    fn from(err: &HandlerError) -> Self {
        Self {
            error_code: err.error_code().to_string(),
            message: err.message().to_string(),
            stack_summary: err.stack_summary().map(str::to_string),
        }
    }
}

/// Body plus delivery metadata.
///
/// Only the handler's failure path mutates an envelope (`retry_attempts`,
/// `error`), and the mutated copy is always re-encoded as a new enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
    pub priority: i64,
    pub retry_attempts: u32,
    pub reply_id: Option<MessageId>,
    pub reply_to: Option<String>,
    pub error: Option<ErrorInfo>,
    pub options: MessageOptions,
    pub tag: Option<String>,
    pub meta: BTreeMap<String, String>,
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(id: MessageId, created_at: DateTime<Utc>, body: T) -> Self {
        Self {
            id,
            created_at,
            priority: 0,
            retry_attempts: 0,
            reply_id: None,
            reply_to: None,
            error: None,
            options: MessageOptions::NONE,
            tag: None,
            meta: BTreeMap::new(),
            body,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_reply_to(mut self, queue_name: impl Into<String>) -> Self {
        self.reply_to = Some(queue_name.into());
        self
    }

    pub fn with_options(mut self, options: MessageOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn is_priority(&self) -> bool {
        self.priority > 0
    }

    pub fn notify_one_way(&self) -> bool {
        self.options.contains(MessageOptions::NOTIFY_ONE_WAY)
    }
}

impl<T: Message> Envelope<T> {
    /// Input queue this envelope is published to: `{T}.priorityinq` when
    /// `priority > 0`, `{T}.inq` otherwise.
    pub fn in_queue_name(&self) -> String {
        QueueNames::of::<T>().in_queue_for(self.priority).to_string()
    }
}
