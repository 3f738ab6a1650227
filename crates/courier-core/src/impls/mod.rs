//! Impls - port implementations shipped with the core.
//!
//! # Included
//! - **InMemoryQueueStore**: the non-durable `QueueStore`
//!
//! A durable broker binding lives in its own crate and implements
//! `ports::QueueStore`.

pub mod inmem_store;

pub use self::inmem_store::InMemoryQueueStore;
