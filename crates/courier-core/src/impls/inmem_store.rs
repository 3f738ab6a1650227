//! InMemoryQueueStore - non-durable queue store.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::ports::QueueStore;

/// In-memory `QueueStore`.
///
/// # Implementation
/// - `HashMap<String, VecDeque<Vec<u8>>>` behind one `Mutex`: every mutation
///   is atomic with respect to every other, which is all FIFO needs
/// - arrival signals go out after the queue lock is released, so a listener
///   reacting to a signal can dequeue without contending with the sender
///
/// # Example
/// ```ignore
/// let store = InMemoryQueueStore::new();
/// store.enqueue("Ping.inq", bytes);
/// let head = store.try_dequeue("Ping.inq");
/// ```
#[derive(Default)]
pub struct InMemoryQueueStore {
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    listeners: Mutex<Vec<UnboundedSender<String>>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a VecDeque half-pushed, so
    // the map is still usable after poisoning.
    fn queues(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Vec<u8>>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<UnboundedSender<String>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl QueueStore for InMemoryQueueStore {
    fn enqueue(&self, queue_name: &str, bytes: Vec<u8>) {
        self.queues()
            .entry(queue_name.to_string())
            .or_default()
            .push_back(bytes);

        let mut listeners = self.listeners();
        listeners.retain(|tx| tx.send(queue_name.to_string()).is_ok());
    }

    fn try_dequeue(&self, queue_name: &str) -> Option<Vec<u8>> {
        self.queues().get_mut(queue_name)?.pop_front()
    }

    fn subscribe(&self) -> UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners().push(tx);
        rx
    }

    fn len(&self, queue_name: &str) -> usize {
        self.queues().get(queue_name).map_or(0, VecDeque::len)
    }

    fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fifo_within_one_queue() {
        let store = InMemoryQueueStore::new();
        for i in 0..100u32 {
            store.enqueue("q", i.to_be_bytes().to_vec());
        }
        for i in 0..100u32 {
            assert_eq!(store.try_dequeue("q"), Some(i.to_be_bytes().to_vec()));
        }
        assert_eq!(store.try_dequeue("q"), None);
    }

    #[test]
    fn unknown_or_empty_queue_is_none() {
        let store = InMemoryQueueStore::new();
        assert_eq!(store.try_dequeue("missing"), None);
        assert!(store.is_empty("missing"));

        store.enqueue("once", b"x".to_vec());
        assert_eq!(store.try_dequeue("once"), Some(b"x".to_vec()));
        assert_eq!(store.try_dequeue("once"), None);
    }

    #[test]
    fn queues_are_independent_and_created_lazily() {
        let store = InMemoryQueueStore::new();
        assert!(store.queue_names().is_empty());

        store.enqueue("b", b"2".to_vec());
        store.enqueue("a", b"1".to_vec());

        assert_eq!(store.queue_names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.len("a"), 1);
        assert_eq!(store.try_dequeue("b"), Some(b"2".to_vec()));
        assert_eq!(store.try_dequeue("a"), Some(b"1".to_vec()));
    }

    #[test]
    fn enqueue_signals_subscribers() {
        let store = InMemoryQueueStore::new();
        let mut rx1 = store.subscribe();
        let mut rx2 = store.subscribe();

        store.enqueue("Ping.inq", b"hi".to_vec());

        assert_eq!(rx1.try_recv().unwrap(), "Ping.inq");
        assert_eq!(rx2.try_recv().unwrap(), "Ping.inq");
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let store = InMemoryQueueStore::new();
        let rx = store.subscribe();
        drop(rx);
        let mut live = store.subscribe();

        store.enqueue("q", vec![]);

        assert_eq!(live.try_recv().unwrap(), "q");
        assert_eq!(store.listeners().len(), 1);
    }

    #[test]
    fn concurrent_producers_keep_per_producer_order() {
        let store = Arc::new(InMemoryQueueStore::new());
        let producers = 4u8;
        let per_producer = 250u32;

        std::thread::scope(|s| {
            for p in 0..producers {
                let store = Arc::clone(&store);
                s.spawn(move || {
                    for i in 0..per_producer {
                        let mut bytes = vec![p];
                        bytes.extend_from_slice(&i.to_be_bytes());
                        store.enqueue("shared", bytes);
                    }
                });
            }
        });

        assert_eq!(store.len("shared"), producers as usize * per_producer as usize);

        let mut next = vec![0u32; producers as usize];
        while let Some(bytes) = store.try_dequeue("shared") {
            let p = bytes[0] as usize;
            let i = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
            assert_eq!(i, next[p]);
            next[p] += 1;
        }
        assert!(next.iter().all(|&n| n == per_producer));
    }
}
