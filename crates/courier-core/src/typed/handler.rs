//! Handler traits - what users plug into the processing loop.
//!
//! - `Handler<T>`: turns an `Envelope<T>` into an optional response or a
//!   `HandlerError`
//! - `ExceptionHandler<T>`: decides what happens to a failed envelope
//!
//! Both have closure adapters (`handler_fn`, `exception_fn`) for the common
//! case where a struct would only hold a function.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::warn;

use crate::app::client::QueueClient;
use crate::domain::{Envelope, ErrorInfo, HandlerError, Message, RetryPolicy};

/// Processes messages of type `T`.
///
/// # Example
/// ```ignore
/// struct PingHandler;
///
/// #[async_trait]
/// impl Handler<Ping> for PingHandler {
///     type Response = Pong;
///
///     async fn handle(&self, envelope: Envelope<Ping>) -> Result<Option<Pong>, HandlerError> {
///         Ok(Some(Pong { echo: envelope.body.text }))
///     }
/// }
/// ```
///
/// # Return values
/// - `Ok(Some(r))`: reply `r` to `reply_to` or `{Response}.inq`
/// - `Ok(None)`: no reply (notify `{T}.outq` if the envelope asked for it)
/// - `Err(e)`: failure, handed to the exception handler
#[async_trait]
pub trait Handler<T: Message>: Send + Sync {
    type Response: Message;

    async fn handle(&self, envelope: Envelope<T>) -> Result<Option<Self::Response>, HandlerError>;
}

/// `Handler` backed by an async closure.
pub struct FnHandler<T, R, F> {
    f: F,
    _marker: PhantomData<fn(T) -> R>,
}

/// Wrap an async closure as a `Handler`.
///
/// ```ignore
/// registry.register_handler::<Ping, _>(handler_fn(|env: Envelope<Ping>| async move {
///     Ok(Some(Pong { echo: env.body.text }))
/// }))?;
/// ```
pub fn handler_fn<T, R, F, Fut>(f: F) -> FnHandler<T, R, F>
where
    T: Message,
    R: Message,
    F: Fn(Envelope<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<R>, HandlerError>> + Send + 'static,
{
    FnHandler {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<T, R, F, Fut> Handler<T> for FnHandler<T, R, F>
where
    T: Message,
    R: Message,
    F: Fn(Envelope<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<R>, HandlerError>> + Send + 'static,
{
    type Response = R;

    async fn handle(&self, envelope: Envelope<T>) -> Result<Option<R>, HandlerError> {
        (self.f)(envelope).await
    }
}

/// What an exception handler did with a failed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Re-enqueued for another attempt (counts as a retry).
    Requeued,
    /// Moved to `{T}.dlq`.
    DeadLettered,
    /// Handled some other way; the core does nothing further.
    Handled,
}

/// What the processing loop hands to an exception handler.
pub struct FailureContext<'a> {
    pub client: &'a QueueClient,
    pub retry_policy: &'a RetryPolicy,
}

/// Failure policy for messages of type `T`.
///
/// An `Err` returned from here is logged by the processing loop and
/// otherwise ignored; it never stops the drain.
#[async_trait]
pub trait ExceptionHandler<T: Message>: Send + Sync {
    async fn on_failure(
        &self,
        ctx: FailureContext<'_>,
        envelope: Envelope<T>,
        error: HandlerError,
    ) -> Result<FailureAction, HandlerError>;
}

/// Retry until the budget is spent, then dead-letter.
///
/// - non-retryable error, or `retry_attempts >= retry_count`: DLQ
/// - otherwise: `retry_attempts += 1`, back to `{T}.inq` at normal priority
///
/// The error is attached to the envelope either way.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExceptionHandler;

#[async_trait]
impl<T: Message> ExceptionHandler<T> for DefaultExceptionHandler {
    async fn on_failure(
        &self,
        ctx: FailureContext<'_>,
        mut envelope: Envelope<T>,
        error: HandlerError,
    ) -> Result<FailureAction, HandlerError> {
        let requeue = error.is_retryable() && ctx.retry_policy.should_retry(envelope.retry_attempts);
        envelope.error = Some(ErrorInfo::from(&error));

        if !requeue {
            warn!(
                message_type = T::TYPE,
                id = %envelope.id,
                retry_attempts = envelope.retry_attempts,
                error = %error,
                "moving message to dead-letter queue"
            );
            ctx.client.nak(&envelope, false).map_err(|e| HandlerError::non_retryable(e.to_string()))?;
            return Ok(FailureAction::DeadLettered);
        }

        envelope.retry_attempts += 1;
        // retried messages always go back as normal priority
        envelope.priority = 0;

        let delay = ctx.retry_policy.next_delay(envelope.retry_attempts);
        warn!(
            message_type = T::TYPE,
            id = %envelope.id,
            retry_attempts = envelope.retry_attempts,
            delay = ?delay,
            error = %error,
            "retrying message"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        ctx.client.nak(&envelope, true).map_err(|e| HandlerError::non_retryable(e.to_string()))?;
        Ok(FailureAction::Requeued)
    }
}

/// `ExceptionHandler` backed by an async closure over `(envelope, error)`.
pub struct FnExceptionHandler<T, F> {
    f: F,
    _marker: PhantomData<fn(T)>,
}

/// Wrap an async closure as an `ExceptionHandler`.
pub fn exception_fn<T, F, Fut>(f: F) -> FnExceptionHandler<T, F>
where
    T: Message,
    F: Fn(Envelope<T>, HandlerError) -> Fut + Send + Sync,
    Fut: Future<Output = Result<FailureAction, HandlerError>> + Send + 'static,
{
    FnExceptionHandler {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut> ExceptionHandler<T> for FnExceptionHandler<T, F>
where
    T: Message,
    F: Fn(Envelope<T>, HandlerError) -> Fut + Send + Sync,
    Fut: Future<Output = Result<FailureAction, HandlerError>> + Send + 'static,
{
    async fn on_failure(
        &self,
        _ctx: FailureContext<'_>,
        envelope: Envelope<T>,
        error: HandlerError,
    ) -> Result<FailureAction, HandlerError> {
        (self.f)(envelope, error).await
    }
}
