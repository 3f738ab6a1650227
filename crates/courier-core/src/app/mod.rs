//! App - the application layer on top of ports and typed handlers.
//!
//! # Components
//! - **QueueClient**: publish/poll over a `QueueStore`
//! - **HandlerRegistry**: owns handlers, start/stop, aggregate stats
//! - **RegistryBuilder**: wiring with fail-fast validation
//! - **RegistryStatus**: `Started` / `Stopped`

pub mod builder;
pub mod client;
pub mod registry;
pub mod status;

pub use self::builder::{BuildError, RegistryBuilder};
pub use self::client::QueueClient;
pub use self::registry::{ALL_HANDLERS, HandlerRegistry};
pub use self::status::RegistryStatus;
