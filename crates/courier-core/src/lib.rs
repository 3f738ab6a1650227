//! courier-core
//!
//! An in-process message queue and handler dispatch engine.
//!
//! # Modules
//! - **domain**: ids, `Message`, `Envelope<T>`, `HandlerError`, stats, retry policy
//! - **ports**: `QueueStore`, `ReplyClient`, `Clock`, `IdGenerator`
//! - **impls**: `InMemoryQueueStore`
//! - **typed**: `Handler<T>`, `ExceptionHandler<T>`, `MessageHandler<T, H>`, `MessageCodec`
//! - **app**: `QueueClient`, `HandlerRegistry`, `RegistryBuilder`
//! - **config**: `RegistryConfig` (TOML)
//! - **telemetry**: tracing subscriber setup
//!
//! # Example
//! ```ignore
//! let client = QueueClient::in_memory();
//! let registry = RegistryBuilder::new(client.clone())
//!     .register::<Ping, _>(handler_fn(|env: Envelope<Ping>| async move {
//!         Ok(Some(Pong { echo: env.body.text }))
//!     }))?
//!     .build()?;
//!
//! client.publish(Ping { text: "hello".into() })?;
//! registry.start().await;
//! assert_eq!(registry.stats().total_messages_processed, 1);
//! ```

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod telemetry;
pub mod typed;

pub use app::{BuildError, HandlerRegistry, QueueClient, RegistryBuilder, RegistryStatus};
pub use config::{ConfigError, RegistryConfig};
pub use domain::{Envelope, HandlerError, HandlerStats, Message, MessageId, MessageOptions, NoReply, QueueNames};
pub use impls::InMemoryQueueStore;
pub use typed::{ExceptionHandler, FailureAction, Handler, MessageCodec, exception_fn, handler_fn};
