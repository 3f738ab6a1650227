//! MessageHandler - the per-type drain loop.
//!
//! # Flow (per message)
//! 1. poll `{T}.priorityinq`, then `{T}.inq`
//! 2. decode to `Envelope<T>` (undecodable bytes are logged and dropped)
//! 3. run the `Handler`
//! 4. success: reply to `reply_to` / `{Response}.inq`, or notify `{T}.outq`
//! 5. failure: hand the envelope to the `ExceptionHandler` (retry or DLQ)
//!
//! The loop repeats until both input queues are empty. The priority queue is
//! re-checked before every message, so priority work that arrives mid-drain
//! still jumps ahead of the normal queue.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, error, warn};

use super::codec::MessageCodec;
use super::handler::{DefaultExceptionHandler, ExceptionHandler, FailureAction, FailureContext, Handler};
use crate::app::client::QueueClient;
use crate::config::RegistryConfig;
use crate::domain::{Envelope, HandlerCounters, HandlerError, HandlerStats, Message, QueueNames, RetryPolicy};
use crate::ports::ReplyClientFactory;

/// Called once with the message type when a handler disposes itself.
pub type DisposeHook = Arc<dyn Fn(&'static str) + Send + Sync>;

/// Settings shared by every handler of one registry.
#[derive(Clone, Default)]
pub struct HandlerSettings {
    pub retry_policy: RetryPolicy,

    /// When set, only these response types are auto-routed to `{Response}.inq`.
    /// Replies with an explicit `reply_to` are not filtered.
    pub publish_responses_whitelist: Option<HashSet<String>>,

    pub reply_client_factory: Option<ReplyClientFactory>,
}

impl HandlerSettings {
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            retry_policy: config.retry_policy(),
            publish_responses_whitelist: config
                .publish_responses_whitelist
                .as_ref()
                .map(|types| types.iter().cloned().collect()),
            reply_client_factory: None,
        }
    }

    pub fn allows_response(&self, type_name: &str) -> bool {
        self.publish_responses_whitelist
            .as_ref()
            .is_none_or(|allowed| allowed.contains(type_name))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("handler for {0} is disposed")]
    Disposed(&'static str),

    #[error("handler for {0} is already processing")]
    AlreadyProcessing(&'static str),
}

/// Object-safe view of a `MessageHandler<T, H>`, so the registry can hold
/// handlers of different message types in one collection.
#[async_trait]
pub trait DynMessageHandler: Send + Sync {
    fn message_type(&self) -> &'static str;

    /// Drain both input queues; returns the number of messages taken.
    async fn process(&self, client: &QueueClient) -> Result<usize, ProcessError>;

    fn stats(&self) -> HandlerStats;

    /// Stop taking messages. Idempotent; the dispose hook runs once.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

pub struct MessageHandler<T: Message, H: Handler<T>> {
    handler: Arc<H>,
    exception_handler: Arc<dyn ExceptionHandler<T>>,
    settings: Arc<HandlerSettings>,
    counters: Arc<HandlerCounters>,
    names: QueueNames,
    processing: AtomicBool,
    disposed: AtomicBool,
    on_dispose: Option<DisposeHook>,
}

struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T: Message, H: Handler<T>> MessageHandler<T, H> {
    pub fn new(
        handler: Arc<H>,
        exception_handler: Arc<dyn ExceptionHandler<T>>,
        settings: Arc<HandlerSettings>,
        counters: Arc<HandlerCounters>,
    ) -> Self {
        Self {
            handler,
            exception_handler,
            settings,
            counters,
            names: QueueNames::of::<T>(),
            processing: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            on_dispose: None,
        }
    }

    /// Default exception handler, default settings, fresh counters.
    pub fn with_defaults(handler: H) -> Self {
        Self::new(
            Arc::new(handler),
            Arc::new(DefaultExceptionHandler),
            Arc::new(HandlerSettings::default()),
            Arc::new(HandlerCounters::default()),
        )
    }

    pub fn with_dispose_hook(mut self, hook: DisposeHook) -> Self {
        self.on_dispose = Some(hook);
        self
    }

    fn next_message(&self, client: &QueueClient) -> Option<(Vec<u8>, bool)> {
        if let Some(bytes) = client.poll(&self.names.priority) {
            return Some((bytes, true));
        }
        client.poll(&self.names.in_queue).map(|bytes| (bytes, false))
    }

    async fn process_message(&self, client: &QueueClient, bytes: Vec<u8>) {
        let envelope = match MessageCodec::decode::<T>(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                // cannot be re-encoded either, so there is nothing to retry
                warn!(message_type = T::TYPE, error = %e, "dropping undecodable message");
                self.counters.record_failed(client.clock().now());
                return;
            }
        };

        debug!(
            message_type = T::TYPE,
            id = %envelope.id,
            retry_attempts = envelope.retry_attempts,
            "processing message"
        );

        match self.handler.handle(envelope.clone()).await {
            Ok(response) => {
                self.route_response(client, &envelope, bytes, response).await;
                self.counters.record_processed(client.clock().now());
            }
            Err(error) => {
                self.counters.record_failed(client.clock().now());
                self.handle_failure(client, envelope, error).await;
            }
        }
    }

    async fn route_response(
        &self,
        client: &QueueClient,
        request: &Envelope<T>,
        request_bytes: Vec<u8>,
        response: Option<H::Response>,
    ) {
        let Some(response) = response else {
            if request.notify_one_way() {
                client.notify(&self.names.out, request_bytes);
                self.counters.record_out();
            }
            return;
        };

        let reply_to = match &request.reply_to {
            Some(queue) => queue.clone(),
            None => {
                let response_type = <H::Response as Message>::TYPE;
                if !self.settings.allows_response(response_type) {
                    debug!(
                        message_type = T::TYPE,
                        response_type, "response type not whitelisted, reply dropped"
                    );
                    return;
                }
                QueueNames::of::<H::Response>().in_queue
            }
        };

        let mut reply = client.create_envelope(response);
        reply.reply_id = Some(request.id);
        let reply_bytes = match MessageCodec::encode(&reply) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(message_type = T::TYPE, id = %request.id, error = %e, "failed to encode reply");
                return;
            }
        };

        if let Some(factory) = &self.settings.reply_client_factory
            && let Some(reply_client) = factory(&reply_to)
        {
            match reply_client.send_one_way(&reply_to, &reply_bytes).await {
                Ok(()) => {
                    debug!(queue = %reply_to, id = %reply.id, "reply delivered by reply client");
                    return;
                }
                Err(e) => warn!(
                    queue = %reply_to,
                    error = %e,
                    "reply client failed, falling back to in-memory queue"
                ),
            }
        }

        debug!(queue = %reply_to, id = %reply.id, reply_id = %request.id, "publishing reply");
        client.publish_to(&reply_to, reply_bytes);
    }

    async fn handle_failure(&self, client: &QueueClient, envelope: Envelope<T>, error: HandlerError) {
        let id = envelope.id;
        let ctx = FailureContext {
            client,
            retry_policy: &self.settings.retry_policy,
        };
        match self.exception_handler.on_failure(ctx, envelope, error).await {
            Ok(FailureAction::Requeued) => self.counters.record_retry(),
            Ok(FailureAction::DeadLettered | FailureAction::Handled) => {}
            Err(e) => error!(
                message_type = T::TYPE,
                id = %id,
                error = %e,
                "exception handler failed"
            ),
        }
    }
}

#[async_trait]
impl<T: Message, H: Handler<T>> DynMessageHandler for MessageHandler<T, H> {
    fn message_type(&self) -> &'static str {
        T::TYPE
    }

    async fn process(&self, client: &QueueClient) -> Result<usize, ProcessError> {
        if self.is_disposed() {
            return Err(ProcessError::Disposed(T::TYPE));
        }
        if self.processing.swap(true, Ordering::Acquire) {
            return Err(ProcessError::AlreadyProcessing(T::TYPE));
        }
        let _guard = ProcessingGuard(&self.processing);

        let mut taken = 0;
        while !self.is_disposed() {
            let Some((bytes, priority)) = self.next_message(client) else {
                break;
            };
            self.counters.record_received(priority);
            self.process_message(client, bytes).await;
            taken += 1;
        }
        Ok(taken)
    }

    fn stats(&self) -> HandlerStats {
        self.counters.snapshot(T::TYPE)
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(message_type = T::TYPE, "handler disposed");
        if let Some(hook) = &self.on_dispose {
            hook(T::TYPE);
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageOptions, NoReply};
    use crate::ports::{ReplyClient, ReplyDeliveryError};
    use crate::typed::handler::{exception_fn, handler_fn};
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Incr {
        value: i32,
    }

    impl Message for Incr {
        const TYPE: &'static str = "Incr";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Total {
        value: i32,
    }

    impl Message for Total {
        const TYPE: &'static str = "Total";
    }

    fn incr_handler() -> MessageHandler<Incr, impl Handler<Incr, Response = Total>> {
        MessageHandler::with_defaults(handler_fn(|env: Envelope<Incr>| async move {
            Ok::<_, HandlerError>(Some(Total { value: env.body.value + 1 }))
        }))
    }

    fn failing_handler(
        error: HandlerError,
        attempts: Arc<AtomicUsize>,
    ) -> MessageHandler<Incr, impl Handler<Incr, Response = NoReply>> {
        MessageHandler::with_defaults(handler_fn(move |_env: Envelope<Incr>| {
            let error = error.clone();
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<Option<NoReply>, _>(error)
            }
        }))
    }

    #[tokio::test]
    async fn reply_goes_to_response_in_queue_with_reply_id() {
        let client = QueueClient::in_memory();
        let request_id = client.publish(Incr { value: 1 }).unwrap();

        let taken = incr_handler().process(&client).await.unwrap();

        assert_eq!(taken, 1);
        let reply = client.get::<Total>("Total.inq").unwrap().unwrap();
        assert_eq!(reply.body, Total { value: 2 });
        assert_eq!(reply.reply_id, Some(request_id));
        assert_ne!(reply.id, request_id);
    }

    #[tokio::test]
    async fn explicit_reply_to_wins() {
        let client = QueueClient::in_memory();
        let env = client
            .create_envelope(Incr { value: 5 })
            .with_reply_to("caller.replies");
        client.publish_envelope(&env).unwrap();

        incr_handler().process(&client).await.unwrap();

        assert!(client.store().is_empty("Total.inq"));
        let reply = client.get::<Total>("caller.replies").unwrap().unwrap();
        assert_eq!(reply.body.value, 6);
    }

    #[tokio::test]
    async fn priority_queue_drains_first() {
        let client = QueueClient::in_memory();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = MessageHandler::with_defaults(handler_fn({
            let seen = Arc::clone(&seen);
            move |env: Envelope<Incr>| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(env.body.value);
                    Ok::<Option<NoReply>, HandlerError>(None)
                }
            }
        }));

        client.publish_with_priority(Incr { value: 1 }, 0).unwrap();
        client.publish_with_priority(Incr { value: 2 }, 1).unwrap();
        client.publish_with_priority(Incr { value: 3 }, 0).unwrap();

        handler.process(&client).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![2, 1, 3]);
        let stats = handler.stats();
        assert_eq!(stats.total_priority_messages_received, 1);
        assert_eq!(stats.total_normal_messages_received, 2);
        assert_eq!(stats.total_messages_processed, 3);
    }

    #[tokio::test]
    async fn retry_budget_then_dead_letter() {
        let client = QueueClient::in_memory();
        let attempts = Arc::new(AtomicUsize::new(0));
        let handler = failing_handler(HandlerError::retryable("flaky"), Arc::clone(&attempts));
        let id = client.publish(Incr { value: 1 }).unwrap();

        handler.process(&client).await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let dead = client.get::<Incr>("Incr.dlq").unwrap().unwrap();
        assert_eq!(dead.id, id);
        assert_eq!(dead.retry_attempts, 2);
        assert_eq!(dead.error.unwrap().message, "flaky");
        assert!(client.store().is_empty("Incr.inq"));

        let stats = handler.stats();
        assert_eq!(stats.total_messages_failed, 3);
        assert_eq!(stats.total_retries, 2);
        assert_eq!(stats.total_messages_processed, 0);
    }

    #[tokio::test]
    async fn non_retryable_goes_straight_to_dlq() {
        let client = QueueClient::in_memory();
        let attempts = Arc::new(AtomicUsize::new(0));
        let handler = failing_handler(HandlerError::non_retryable("invalid"), Arc::clone(&attempts));
        client.publish(Incr { value: 1 }).unwrap();

        handler.process(&client).await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        let dead = client.get::<Incr>("Incr.dlq").unwrap().unwrap();
        assert_eq!(dead.retry_attempts, 0);
        assert_eq!(handler.stats().total_retries, 0);
    }

    #[tokio::test]
    async fn retried_priority_message_loses_priority() {
        let client = QueueClient::in_memory();
        let attempts = Arc::new(AtomicUsize::new(0));
        let handler = failing_handler(HandlerError::retryable("flaky"), Arc::clone(&attempts));
        client.publish_with_priority(Incr { value: 1 }, 1).unwrap();

        handler.process(&client).await.unwrap();

        let stats = handler.stats();
        assert_eq!(stats.total_priority_messages_received, 1);
        assert_eq!(stats.total_normal_messages_received, 2);
        assert_eq!(client.get::<Incr>("Incr.dlq").unwrap().unwrap().priority, 0);
    }

    #[tokio::test]
    async fn failing_exception_handler_does_not_stop_drain() {
        let client = QueueClient::in_memory();
        let handler = MessageHandler::new(
            Arc::new(handler_fn(|env: Envelope<Incr>| async move {
                if env.body.value == 1 {
                    Err(HandlerError::retryable("first fails"))
                } else {
                    Ok::<Option<Total>, HandlerError>(Some(Total { value: env.body.value }))
                }
            })),
            Arc::new(exception_fn(|_env: Envelope<Incr>, _err: HandlerError| async move {
                Err::<FailureAction, _>(HandlerError::non_retryable("exception handler broke"))
            })),
            Arc::new(HandlerSettings::default()),
            Arc::new(HandlerCounters::default()),
        );
        client.publish(Incr { value: 1 }).unwrap();
        client.publish(Incr { value: 2 }).unwrap();

        let taken = handler.process(&client).await.unwrap();

        assert_eq!(taken, 2);
        assert_eq!(client.store().len("Total.inq"), 1);
        assert!(client.store().is_empty("Incr.dlq"));
        let stats = handler.stats();
        assert_eq!(stats.total_messages_failed, 1);
        assert_eq!(stats.total_messages_processed, 1);
    }

    #[tokio::test]
    async fn notify_one_way_without_response_goes_to_out_queue() {
        let client = QueueClient::in_memory();
        let handler = MessageHandler::with_defaults(handler_fn(|_env: Envelope<Incr>| async move {
            Ok::<Option<NoReply>, HandlerError>(None)
        }));
        let notified = client
            .create_envelope(Incr { value: 1 })
            .with_options(MessageOptions::NOTIFY_ONE_WAY);
        client.publish_envelope(&notified).unwrap();
        client.publish(Incr { value: 2 }).unwrap();

        handler.process(&client).await.unwrap();

        assert_eq!(client.store().len("Incr.outq"), 1);
        let out = client.get::<Incr>("Incr.outq").unwrap().unwrap();
        assert_eq!(out.id, notified.id);
        assert_eq!(handler.stats().total_out_messages_received, 1);
    }

    #[tokio::test]
    async fn whitelist_drops_unlisted_derived_replies() {
        let client = QueueClient::in_memory();
        let settings = HandlerSettings {
            publish_responses_whitelist: Some(HashSet::from(["Other".to_string()])),
            ..Default::default()
        };
        let handler = MessageHandler::new(
            Arc::new(handler_fn(|env: Envelope<Incr>| async move {
                Ok::<_, HandlerError>(Some(Total { value: env.body.value }))
            })),
            Arc::new(DefaultExceptionHandler),
            Arc::new(settings),
            Arc::new(HandlerCounters::default()),
        );
        client.publish(Incr { value: 1 }).unwrap();
        let explicit = client
            .create_envelope(Incr { value: 2 })
            .with_reply_to("explicit.q");
        client.publish_envelope(&explicit).unwrap();

        handler.process(&client).await.unwrap();

        assert!(client.store().is_empty("Total.inq"));
        assert_eq!(client.store().len("explicit.q"), 1);
        assert_eq!(handler.stats().total_messages_processed, 2);
    }

    struct RecordingReplyClient {
        fail: bool,
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl ReplyClient for RecordingReplyClient {
        async fn send_one_way(&self, queue_name: &str, bytes: &[u8]) -> Result<(), ReplyDeliveryError> {
            if self.fail {
                return Err(ReplyDeliveryError::Unreachable(queue_name.to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((queue_name.to_string(), bytes.to_vec()));
            Ok(())
        }
    }

    fn handler_with_reply_client(
        reply_client: Arc<RecordingReplyClient>,
    ) -> MessageHandler<Incr, impl Handler<Incr, Response = Total>> {
        let factory: ReplyClientFactory = Arc::new(move |_queue: &str| {
            Some(Arc::clone(&reply_client) as Arc<dyn ReplyClient>)
        });
        let settings = HandlerSettings {
            reply_client_factory: Some(factory),
            ..Default::default()
        };
        MessageHandler::new(
            Arc::new(handler_fn(|env: Envelope<Incr>| async move {
                Ok::<_, HandlerError>(Some(Total { value: env.body.value * 10 }))
            })),
            Arc::new(DefaultExceptionHandler),
            Arc::new(settings),
            Arc::new(HandlerCounters::default()),
        )
    }

    #[tokio::test]
    async fn reply_client_is_preferred() {
        let client = QueueClient::in_memory();
        let reply_client = Arc::new(RecordingReplyClient {
            fail: false,
            sent: Mutex::new(Vec::new()),
        });
        let handler = handler_with_reply_client(Arc::clone(&reply_client));
        client.publish(Incr { value: 4 }).unwrap();

        handler.process(&client).await.unwrap();

        assert!(client.store().is_empty("Total.inq"));
        let sent = reply_client.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "Total.inq");
        let reply: Envelope<Total> = MessageCodec::decode(&sent[0].1).unwrap();
        assert_eq!(reply.body.value, 40);
    }

    #[tokio::test]
    async fn reply_client_failure_falls_back_to_queue() {
        let client = QueueClient::in_memory();
        let reply_client = Arc::new(RecordingReplyClient {
            fail: true,
            sent: Mutex::new(Vec::new()),
        });
        let handler = handler_with_reply_client(reply_client);
        client.publish(Incr { value: 4 }).unwrap();

        handler.process(&client).await.unwrap();

        let reply = client.get::<Total>("Total.inq").unwrap().unwrap();
        assert_eq!(reply.body.value, 40);
        assert_eq!(handler.stats().total_messages_processed, 1);
    }

    #[tokio::test]
    async fn undecodable_message_is_dropped() {
        let client = QueueClient::in_memory();
        client.publish_to("Incr.inq", b"{broken".to_vec());
        client.publish(Incr { value: 1 }).unwrap();
        let handler = incr_handler();

        let taken = handler.process(&client).await.unwrap();

        assert_eq!(taken, 2);
        assert!(client.store().is_empty("Incr.inq"));
        assert!(client.store().is_empty("Incr.dlq"));
        assert_eq!(client.store().len("Total.inq"), 1);
        let stats = handler.stats();
        assert_eq!(stats.total_messages_failed, 1);
        assert_eq!(stats.total_messages_processed, 1);
    }

    #[tokio::test]
    async fn disposed_handler_refuses_work_and_runs_hook_once() {
        let client = QueueClient::in_memory();
        client.publish(Incr { value: 1 }).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = incr_handler().with_dispose_hook({
            let calls = Arc::clone(&calls);
            Arc::new(move |message_type: &'static str| {
                assert_eq!(message_type, "Incr");
                calls.fetch_add(1, Ordering::SeqCst);
            })
        });

        handler.dispose();
        handler.dispose();

        assert!(handler.is_disposed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            handler.process(&client).await,
            Err(ProcessError::Disposed("Incr"))
        ));
        assert_eq!(client.store().len("Incr.inq"), 1);
    }

    #[tokio::test]
    async fn empty_queues_drain_to_zero() {
        let client = QueueClient::in_memory();
        let handler = incr_handler();
        assert_eq!(handler.process(&client).await.unwrap(), 0);
        assert_eq!(handler.stats().last_message_processed, None);
    }

    #[tokio::test]
    async fn concurrent_process_is_rejected() {
        let client = QueueClient::in_memory();
        let handler = incr_handler();
        handler.processing.store(true, Ordering::SeqCst);

        assert!(matches!(
            handler.process(&client).await,
            Err(ProcessError::AlreadyProcessing("Incr"))
        ));

        handler.processing.store(false, Ordering::SeqCst);
        assert!(handler.process(&client).await.is_ok());
    }
}
