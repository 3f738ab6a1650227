//! IdGenerator port - message id generation.

use crate::domain::MessageId;
use crate::ports::Clock;
use ulid::Ulid;

/// Source of fresh message ids.
///
/// `Send + Sync` because one generator is shared by every clone of a
/// `QueueClient`.
pub trait IdGenerator: Send + Sync {
    fn generate_message_id(&self) -> MessageId;
}

/// ULID-based generator: timestamp part from the clock, random part from `rand`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_message_id(&self) -> MessageId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        MessageId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
