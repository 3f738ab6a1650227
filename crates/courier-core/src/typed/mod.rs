//! Typed - the typed handler API.
//!
//! # Two layers
//! - **Typed**: `Handler<T>`, `ExceptionHandler<T>`, `MessageHandler<T, H>`
//!   keep the message type and its response type in the type system
//! - **Dyn**: `DynMessageHandler`, `HandlerFactory` erase them so one registry
//!   can hold every message type
//!
//! `MessageCodec` is the only place bytes turn into envelopes and back.

pub mod codec;
pub mod handler;
pub mod message_handler;
pub mod registry;

pub use self::codec::{CodecError, DecodeError, MessageCodec};
pub use self::handler::{
    DefaultExceptionHandler, ExceptionHandler, FailureAction, FailureContext, Handler, exception_fn,
    handler_fn,
};
pub use self::message_handler::{DisposeHook, DynMessageHandler, HandlerSettings, MessageHandler, ProcessError};
pub use self::registry::{HandlerFactory, RegistryError, TypedRegistry};
