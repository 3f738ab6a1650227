//! Domain model: ids, message types, envelopes, errors, stats, retry policy.
//!
//! Nothing in here touches a queue; the processing loop lives in `typed` and
//! the lifecycle in `app`.

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod message;
pub mod retry;
pub mod stats;

pub use self::envelope::{Envelope, ErrorInfo, MessageOptions};
pub use self::errors::{ErrorKind, HandlerError};
pub use self::ids::MessageId;
pub use self::message::{Message, NoReply, QueueNames};
pub use self::retry::{Backoff, RetryPolicy};
pub use self::stats::{HandlerCounters, HandlerStats};
