//! Ports - seams to things outside the core.
//!
//! - `QueueStore`: where bytes live (in-memory here, a durable broker elsewhere)
//! - `ReplyClient`: optional out-of-band reply transport
//! - `Clock` / `IdGenerator`: time and ids, replaceable in tests

pub mod queue_store;
pub mod reply_client;
pub mod clock;
pub mod id_generator;

pub use self::queue_store::{QueueError, QueueStore};
pub use self::reply_client::{ReplyClient, ReplyClientFactory, ReplyDeliveryError};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
