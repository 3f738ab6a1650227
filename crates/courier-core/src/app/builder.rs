//! RegistryBuilder - wiring and start-up validation for a `HandlerRegistry`.
//!
//! `expect_types(&[..])` declares the message types a process must handle;
//! `build()` fails with the missing ones instead of leaving their queues
//! silently unserved.

use std::sync::Arc;

use super::client::QueueClient;
use super::registry::HandlerRegistry;
use crate::config::RegistryConfig;
use crate::domain::Message;
use crate::ports::{ReplyClient, ReplyClientFactory};
use crate::typed::{ExceptionHandler, Handler, HandlerSettings, RegistryError};

/// # Example
/// ```ignore
/// let registry = RegistryBuilder::new(QueueClient::in_memory())
///     .config(RegistryConfig::load("courier.toml")?)
///     .register::<Ping, _>(PingHandler)?
///     .expect_types(&[Ping::TYPE])
///     .build()?;
/// ```
pub struct RegistryBuilder {
    config: RegistryConfig,
    reply_client_factory: Option<ReplyClientFactory>,
    registry: HandlerRegistry,
    expected_types: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing handlers for message types: {0:?}")]
    MissingTypes(Vec<String>),
}

impl RegistryBuilder {
    pub fn new(client: QueueClient) -> Self {
        Self {
            registry: HandlerRegistry::new(client),
            config: RegistryConfig::default(),
            reply_client_factory: None,
            expected_types: None,
        }
    }

    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Route replies through an external transport when the factory yields a
    /// client for the destination queue.
    pub fn reply_client_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Option<Arc<dyn ReplyClient>> + Send + Sync + 'static,
    {
        let factory: ReplyClientFactory = Arc::new(factory);
        self.reply_client_factory = Some(factory);
        self
    }

    pub fn register<T: Message, H: Handler<T> + 'static>(mut self, handler: H) -> Result<Self, RegistryError> {
        self.registry.register_handler::<T, H>(handler)?;
        Ok(self)
    }

    pub fn register_with<T, H, E>(mut self, handler: H, exception_handler: E) -> Result<Self, RegistryError>
    where
        T: Message,
        H: Handler<T> + 'static,
        E: ExceptionHandler<T> + 'static,
    {
        self.registry.register_handler_with::<T, H, E>(handler, exception_handler)?;
        Ok(self)
    }

    pub fn expect_types(mut self, message_types: &[&str]) -> Self {
        self.expected_types = Some(message_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<HandlerRegistry, BuildError> {
        let registered = self.registry.registered_types();
        if let Some(expected) = &self.expected_types {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !registered.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTypes(missing));
            }
        }

        let mut settings = HandlerSettings::from_config(&self.config);
        settings.reply_client_factory = self.reply_client_factory;
        let mut registry = self.registry;
        registry.replace_settings(settings);
        Ok(registry)
    }
}
