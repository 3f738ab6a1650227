//! HandlerRegistry - owns the handlers of one process and their lifecycle.
//!
//! # Lifecycle
//! ```text
//! Stopped --start()--> Started --(drain done | stop() | all handlers disposed)--> Stopped
//! ```
//!
//! `start()` materializes a fresh handler per registered type and drains them
//! one after another. Each start bumps a generation counter, so a drain that
//! outlives a `stop()` (or a later `start()`) never stops the newer run.
//!
//! Stats counters belong to the registry, one set per message type, and are
//! shared with every handler built for that type. `stats()` is therefore
//! cumulative across start/stop cycles.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::client::QueueClient;
use super::status::RegistryStatus;
use crate::config::RegistryConfig;
use crate::domain::{HandlerCounters, HandlerStats, Message, QueueNames};
use crate::typed::{
    DisposeHook, DynMessageHandler, ExceptionHandler, Handler, HandlerSettings, RegistryError, TypedRegistry,
};

pub const ALL_HANDLERS: &str = "All Handlers";

/// How long `supervise` waits before starting again while a watched queue
/// still holds messages after a start.
const RECHECK_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Default)]
struct State {
    status: RegistryStatus,
    generation: u64,
    live: Vec<Arc<dyn DynMessageHandler>>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.lock();
        state.status == RegistryStatus::Started && state.generation == generation
    }

    fn handler_disposed(&self, message_type: &str) {
        let mut state = self.lock();
        if state.live.is_empty() || !state.live.iter().all(|h| h.is_disposed()) {
            return;
        }
        state.live.clear();
        if state.status == RegistryStatus::Started {
            state.status = RegistryStatus::Stopped;
            info!(last_disposed = message_type, "all handlers disposed, registry stopped");
        }
    }
}

/// Ends a drain when dropped, so a panicking or cancelled `start()` still
/// returns the registry to `Stopped`.
struct DrainGuard<'a> {
    registry: &'a HandlerRegistry,
    generation: u64,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.registry.finish(self.generation);
    }
}

pub struct HandlerRegistry {
    client: QueueClient,
    handlers: TypedRegistry,
    settings: Arc<HandlerSettings>,
    counters: Vec<(&'static str, Arc<HandlerCounters>)>,
    watched_queues: HashSet<String>,
    shared: Arc<Shared>,
}

impl HandlerRegistry {
    pub fn new(client: QueueClient) -> Self {
        Self::with_settings(client, HandlerSettings::default())
    }

    pub fn from_config(client: QueueClient, config: &RegistryConfig) -> Self {
        Self::with_settings(client, HandlerSettings::from_config(config))
    }

    pub fn with_settings(client: QueueClient, settings: HandlerSettings) -> Self {
        Self {
            client,
            handlers: TypedRegistry::new(),
            settings: Arc::new(settings),
            counters: Vec::new(),
            watched_queues: HashSet::new(),
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn client(&self) -> &QueueClient {
        &self.client
    }

    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    /// Applies to handlers built by later starts.
    pub(crate) fn replace_settings(&mut self, settings: HandlerSettings) {
        self.settings = Arc::new(settings);
    }

    /// Register `handler` for `T` with the default retry/DLQ policy.
    pub fn register_handler<T, H>(&mut self, handler: H) -> Result<(), RegistryError>
    where
        T: Message,
        H: Handler<T> + 'static,
    {
        self.handlers.register::<T, H>(handler)?;
        self.track::<T>();
        Ok(())
    }

    /// Register `handler` for `T` with a custom exception handler.
    pub fn register_handler_with<T, H, E>(&mut self, handler: H, exception_handler: E) -> Result<(), RegistryError>
    where
        T: Message,
        H: Handler<T> + 'static,
        E: ExceptionHandler<T> + 'static,
    {
        self.handlers.register_with::<T, H, E>(handler, exception_handler)?;
        self.track::<T>();
        Ok(())
    }

    fn track<T: Message>(&mut self) {
        let names = QueueNames::of::<T>();
        self.watched_queues.insert(names.in_queue);
        self.watched_queues.insert(names.priority);
        self.counters.push((T::TYPE, Arc::new(HandlerCounters::default())));
        debug!(message_type = T::TYPE, "handler registered");
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.handlers.registered_types()
    }

    pub fn status(&self) -> RegistryStatus {
        self.shared.lock().status
    }

    /// Drain every registered handler once, then stop.
    ///
    /// No-op while already started.
    pub async fn start(&self) {
        let Some((generation, handlers)) = self.begin() else {
            debug!("registry already started");
            return;
        };
        let _drain = DrainGuard { registry: self, generation };
        info!(generation, handlers = handlers.len(), "registry started");

        for handler in &handlers {
            if !self.shared.is_current(generation) {
                debug!(generation, "registry stopped during drain");
                break;
            }
            match handler.process(&self.client).await {
                Ok(taken) => debug!(message_type = handler.message_type(), taken, "handler drained"),
                Err(e) => debug!(error = %e, "handler skipped"),
            }
        }
    }

    /// Transition to `Started` and build this run's handlers.
    pub(crate) fn begin(&self) -> Option<(u64, Vec<Arc<dyn DynMessageHandler>>)> {
        let mut state = self.shared.lock();
        if state.status == RegistryStatus::Started {
            return None;
        }
        state.status = RegistryStatus::Started;
        state.generation += 1;
        state.live = self.materialize();
        Some((state.generation, state.live.clone()))
    }

    fn materialize(&self) -> Vec<Arc<dyn DynMessageHandler>> {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let hook: DisposeHook = Arc::new(move |message_type: &'static str| {
            if let Some(shared) = shared.upgrade() {
                shared.handler_disposed(message_type);
            }
        });

        self.handlers
            .factories()
            .filter_map(|factory| {
                let counters = self.counters_for(factory.message_type())?;
                Some(factory.create(Arc::clone(&self.settings), counters, Arc::clone(&hook)))
            })
            .collect()
    }

    fn finish(&self, generation: u64) {
        let released = {
            let mut state = self.shared.lock();
            if state.status != RegistryStatus::Started || state.generation != generation {
                return;
            }
            state.status = RegistryStatus::Stopped;
            std::mem::take(&mut state.live)
        };
        drop(released);
        info!(generation, "registry drained and stopped");
    }

    /// Stop and release every handler. Idempotent.
    pub fn stop(&self) {
        let released = {
            let mut state = self.shared.lock();
            if state.status == RegistryStatus::Stopped && state.live.is_empty() {
                return;
            }
            state.status = RegistryStatus::Stopped;
            std::mem::take(&mut state.live)
        };
        // disposing outside the lock: each dispose calls back into the registry
        for handler in &released {
            handler.dispose();
        }
        info!(released = released.len(), "registry stopped");
    }

    /// Called when a handler disposes itself; stops the registry once every
    /// live handler is disposed.
    pub fn handler_disposed(&self, message_type: &str) {
        self.shared.handler_disposed(message_type);
    }

    fn counters_for(&self, message_type: &str) -> Option<Arc<HandlerCounters>> {
        self.counters
            .iter()
            .find(|(t, _)| *t == message_type)
            .map(|(_, c)| Arc::clone(c))
    }

    /// Per-type stats in registration order.
    pub fn handler_stats(&self) -> Vec<HandlerStats> {
        self.counters.iter().map(|(t, c)| c.snapshot(t)).collect()
    }

    /// Aggregate of every handler's stats, named "All Handlers".
    pub fn stats(&self) -> HandlerStats {
        let mut total = HandlerStats::new(ALL_HANDLERS);
        for stats in self.handler_stats() {
            total.add(&stats);
        }
        total
    }

    /// Status line, aggregate stats and per-type stats as text.
    pub fn stats_description(&self) -> String {
        let mut out = format!("Registry status: {}\n", self.status());
        out.push_str(&self.stats().to_string());
        for stats in self.handler_stats() {
            out.push('\n');
            out.push_str(&stats.to_string());
        }
        out
    }

    /// True when any registered input queue still holds a message.
    fn has_pending(&self) -> bool {
        let store = self.client.store();
        self.watched_queues.iter().any(|queue| !store.is_empty(queue))
    }

    /// Start a drain whenever a registered input queue receives a message,
    /// until `shutdown` turns true (or its sender is dropped).
    ///
    /// `arrivals` is a `QueueStore::subscribe()` receiver. Signals that pile
    /// up during a drain are coalesced into one further start. When messages
    /// are still waiting after a start (another caller held the registry),
    /// the supervisor starts again every `RECHECK_INTERVAL` without waiting
    /// for a new arrival.
    pub async fn supervise(&self, mut arrivals: mpsc::UnboundedReceiver<String>, mut shutdown: watch::Receiver<bool>) {
        info!(queues = self.watched_queues.len(), "supervisor running");
        let mut pending = false;
        loop {
            if *shutdown.borrow() {
                break;
            }
            if pending {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = tokio::time::sleep(RECHECK_INTERVAL) => {}
                }
                while arrivals.try_recv().is_ok() {}
                debug!("watched queues not empty, starting registry again");
            } else {
                let queue = tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    arrival = arrivals.recv() => match arrival {
                        Some(queue) => queue,
                        None => {
                            warn!("arrival channel closed, supervisor exiting");
                            break;
                        }
                    },
                };
                if !self.watched_queues.contains(&queue) {
                    continue;
                }
                while arrivals.try_recv().is_ok() {}
                debug!(queue = %queue, "message arrived, starting registry");
            }
            self.start().await;
            pending = self.has_pending();
        }
        self.stop();
        info!("supervisor stopped");
    }
}
