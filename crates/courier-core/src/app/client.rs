//! QueueClient - a caller's view of the queue store.
//!
//! Cheap to clone: all real state lives in the shared `QueueStore`.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{Envelope, ErrorInfo, HandlerError, Message, MessageId, QueueNames};
use crate::impls::InMemoryQueueStore;
use crate::ports::{Clock, IdGenerator, QueueError, QueueStore, SystemClock, UlidGenerator};
use crate::typed::codec::{CodecError, DecodeError, MessageCodec};

#[derive(Clone)]
pub struct QueueClient {
    store: Arc<dyn QueueStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl QueueClient {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            clock: Arc::new(SystemClock),
        }
    }

    /// Client over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryQueueStore::new()))
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Wrap `body` in an envelope with a fresh id and default metadata.
    pub fn create_envelope<T: Message>(&self, body: T) -> Envelope<T> {
        Envelope::new(self.ids.generate_message_id(), self.clock.now(), body)
    }

    /// Publish `body` to `{T}.inq`.
    pub fn publish<T: Message>(&self, body: T) -> Result<MessageId, CodecError> {
        self.publish_envelope(&self.create_envelope(body))
    }

    /// Publish `body` to `{T}.priorityinq` when `priority > 0`, else `{T}.inq`.
    pub fn publish_with_priority<T: Message>(&self, body: T, priority: i64) -> Result<MessageId, CodecError> {
        self.publish_envelope(&self.create_envelope(body).with_priority(priority))
    }

    /// Publish a prepared envelope to its input queue.
    pub fn publish_envelope<T: Message>(&self, envelope: &Envelope<T>) -> Result<MessageId, CodecError> {
        let bytes = MessageCodec::encode(envelope)?;
        self.store.enqueue(&envelope.in_queue_name(), bytes);
        Ok(envelope.id)
    }

    /// Raw publish to an arbitrary queue (replies, DLQ).
    pub fn publish_to(&self, queue_name: &str, bytes: Vec<u8>) {
        self.store.enqueue(queue_name, bytes);
    }

    /// Fire-and-forget publish to a transient queue.
    ///
    /// Same as `publish_to` in memory; a durable binding routes this to a
    /// non-durable queue.
    pub fn notify(&self, queue_name: &str, bytes: Vec<u8>) {
        self.store.enqueue(queue_name, bytes);
    }

    /// Non-blocking single dequeue.
    pub fn poll(&self, queue_name: &str) -> Option<Vec<u8>> {
        self.store.try_dequeue(queue_name)
    }

    /// Dequeue and decode the head of `queue_name`.
    pub fn get<T: Message>(&self, queue_name: &str) -> Result<Option<Envelope<T>>, DecodeError> {
        self.poll(queue_name)
            .map(|bytes| MessageCodec::decode(&bytes))
            .transpose()
    }

    /// Negative acknowledgement: put `envelope` back on `{T}.inq` when
    /// `requeue`, otherwise move it to `{T}.dlq`. The envelope is published
    /// as given; callers set `retry_attempts`/`error` beforehand.
    pub fn nak<T: Message>(&self, envelope: &Envelope<T>, requeue: bool) -> Result<(), CodecError> {
        let names = QueueNames::of::<T>();
        let queue = if requeue { &names.in_queue } else { &names.dlq };
        self.publish_to(queue, MessageCodec::encode(envelope)?);
        Ok(())
    }

    /// Attach `error` and dead-letter the envelope.
    pub fn dead_letter<T: Message>(&self, mut envelope: Envelope<T>, error: &HandlerError) -> Result<(), CodecError> {
        envelope.error = Some(ErrorInfo::from(error));
        self.nak(&envelope, false)
    }

    /// Block until any of `queue_names` is notified.
    ///
    /// Not implemented by the in-memory core: the store never blocks, and no
    /// wait semantics are defined for it. Always `QueueError::NotSupported`.
    pub fn wait_for_notify_on_any(&self, queue_names: &[&str], timeout: Duration) -> Result<String, QueueError> {
        let _ = (queue_names, timeout);
        Err(QueueError::NotSupported("wait_for_notify_on_any"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        text: String,
    }

    impl Message for Ping {
        const TYPE: &'static str = "Ping";
    }

    fn ping(text: &str) -> Ping {
        Ping { text: text.to_string() }
    }

    #[test]
    fn publish_then_get_preserves_order() {
        let client = QueueClient::in_memory();
        let ids: Vec<MessageId> = (0..5)
            .map(|i| client.publish(ping(&i.to_string())).unwrap())
            .collect();

        for (i, id) in ids.iter().enumerate() {
            let env = client.get::<Ping>("Ping.inq").unwrap().unwrap();
            assert_eq!(env.id, *id);
            assert_eq!(env.body, ping(&i.to_string()));
        }
        assert!(client.get::<Ping>("Ping.inq").unwrap().is_none());
    }

    #[test]
    fn priority_publish_uses_priority_queue() {
        let client = QueueClient::in_memory();
        client.publish_with_priority(ping("urgent"), 1).unwrap();
        client.publish_with_priority(ping("normal"), 0).unwrap();

        assert_eq!(client.store().len("Ping.priorityinq"), 1);
        assert_eq!(client.store().len("Ping.inq"), 1);
        let env = client.get::<Ping>("Ping.priorityinq").unwrap().unwrap();
        assert_eq!(env.priority, 1);
    }

    #[test]
    fn raw_publish_and_poll() {
        let client = QueueClient::in_memory();
        assert_eq!(client.poll("raw"), None);
        client.publish_to("raw", b"a".to_vec());
        client.notify("raw", b"b".to_vec());
        assert_eq!(client.poll("raw"), Some(b"a".to_vec()));
        assert_eq!(client.poll("raw"), Some(b"b".to_vec()));
        assert_eq!(client.poll("raw"), None);
    }

    #[test]
    fn clones_share_the_store() {
        let producer = QueueClient::in_memory();
        let consumer = producer.clone();
        producer.publish(ping("shared")).unwrap();
        assert_eq!(consumer.get::<Ping>("Ping.inq").unwrap().unwrap().body, ping("shared"));
    }

    #[test]
    fn nak_routes_by_requeue_flag() {
        let client = QueueClient::in_memory();
        let env = client.create_envelope(ping("x")).with_priority(4);

        client.nak(&env, true).unwrap();
        client.nak(&env, false).unwrap();

        assert_eq!(client.store().len("Ping.inq"), 1);
        assert_eq!(client.store().len("Ping.dlq"), 1);
        assert!(client.store().is_empty("Ping.priorityinq"));
    }

    #[test]
    fn dead_letter_attaches_error() {
        let client = QueueClient::in_memory();
        let env = client.create_envelope(ping("x"));
        client
            .dead_letter(env, &HandlerError::non_retryable("nope"))
            .unwrap();

        let dead = client.get::<Ping>("Ping.dlq").unwrap().unwrap();
        let error = dead.error.unwrap();
        assert_eq!(error.message, "nope");
        assert_eq!(error.error_code, "NonRetryableError");
    }

    #[test]
    fn get_surfaces_decode_errors() {
        let client = QueueClient::in_memory();
        client.publish_to("Ping.inq", b"garbage".to_vec());
        assert!(matches!(
            client.get::<Ping>("Ping.inq"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn wait_for_notify_on_any_is_not_supported() {
        let client = QueueClient::in_memory();
        let err = client
            .wait_for_notify_on_any(&["Ping.inq"], Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, QueueError::NotSupported("wait_for_notify_on_any")));
    }
}
