//! TypedRegistry - message type -> handler factory.
//!
//! Registration is generic (`register::<T, H>`), storage is type-erased:
//! each entry is a `HandlerFactory` that knows how to build a fresh
//! `MessageHandler<T, H>` behind `Arc<dyn DynMessageHandler>`.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use super::handler::{DefaultExceptionHandler, ExceptionHandler, Handler};
use super::message_handler::{DisposeHook, DynMessageHandler, HandlerSettings, MessageHandler};
use crate::domain::{HandlerCounters, Message};

/// Builds handler instances for one message type.
pub trait HandlerFactory: Send + Sync {
    fn message_type(&self) -> &'static str;

    fn create(
        &self,
        settings: Arc<HandlerSettings>,
        counters: Arc<HandlerCounters>,
        on_dispose: DisposeHook,
    ) -> Arc<dyn DynMessageHandler>;
}

struct TypedFactory<T: Message, H: Handler<T>> {
    handler: Arc<H>,
    exception_handler: Arc<dyn ExceptionHandler<T>>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Message, H: Handler<T> + 'static> HandlerFactory for TypedFactory<T, H> {
    fn message_type(&self) -> &'static str {
        T::TYPE
    }

    fn create(
        &self,
        settings: Arc<HandlerSettings>,
        counters: Arc<HandlerCounters>,
        on_dispose: DisposeHook,
    ) -> Arc<dyn DynMessageHandler> {
        let handler = MessageHandler::new(
            Arc::clone(&self.handler),
            Arc::clone(&self.exception_handler),
            settings,
            counters,
        )
        .with_dispose_hook(on_dispose);
        Arc::new(handler)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for message type '{0}' is already registered")]
    DuplicateHandler(String),
}

/// One factory per message type, kept in registration order.
#[derive(Default)]
pub struct TypedRegistry {
    factories: HashMap<&'static str, Arc<dyn HandlerFactory>>,
    order: Vec<&'static str>,
}

impl TypedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `T` with the default exception handler.
    pub fn register<T: Message, H: Handler<T> + 'static>(&mut self, handler: H) -> Result<(), RegistryError> {
        self.register_with::<T, H, DefaultExceptionHandler>(handler, DefaultExceptionHandler)
    }

    /// Register `handler` for `T` with a custom exception handler.
    pub fn register_with<T, H, E>(&mut self, handler: H, exception_handler: E) -> Result<(), RegistryError>
    where
        T: Message,
        H: Handler<T> + 'static,
        E: ExceptionHandler<T> + 'static,
    {
        if self.factories.contains_key(T::TYPE) {
            return Err(RegistryError::DuplicateHandler(T::TYPE.to_string()));
        }
        let factory = TypedFactory {
            handler: Arc::new(handler),
            exception_handler: Arc::new(exception_handler) as Arc<dyn ExceptionHandler<T>>,
            _marker: PhantomData,
        };
        self.factories.insert(T::TYPE, Arc::new(factory));
        self.order.push(T::TYPE);
        Ok(())
    }

    pub fn get(&self, message_type: &str) -> Option<Arc<dyn HandlerFactory>> {
        self.factories.get(message_type).cloned()
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.factories.contains_key(message_type)
    }

    /// Factories in registration order.
    pub fn factories(&self) -> impl Iterator<Item = &Arc<dyn HandlerFactory>> {
        self.order.iter().filter_map(|t| self.factories.get(t))
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.order.iter().map(|t| t.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
