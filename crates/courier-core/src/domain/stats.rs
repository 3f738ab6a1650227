//! Handler statistics.
//!
//! `HandlerCounters` is owned per message type and bumped by whichever handler
//! instance is draining that type. Readers take `snapshot()` at any time;
//! relaxed loads mean a snapshot taken mid-message may be a few increments
//! behind.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time copy of one handler's counters (or a sum of several).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerStats {
    pub name: String,
    pub total_messages_processed: u64,
    pub total_messages_failed: u64,
    pub total_retries: u64,
    pub total_normal_messages_received: u64,
    pub total_priority_messages_received: u64,
    pub total_out_messages_received: u64,
    pub last_message_processed: Option<DateTime<Utc>>,
}

impl HandlerStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Fold `other` into `self`: counters are summed, the latest timestamp wins.
    pub fn add(&mut self, other: &HandlerStats) {
        self.total_messages_processed += other.total_messages_processed;
        self.total_messages_failed += other.total_messages_failed;
        self.total_retries += other.total_retries;
        self.total_normal_messages_received += other.total_normal_messages_received;
        self.total_priority_messages_received += other.total_priority_messages_received;
        self.total_out_messages_received += other.total_out_messages_received;
        self.last_message_processed = match (self.last_message_processed, other.last_message_processed) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn total_messages_received(&self) -> u64 {
        self.total_normal_messages_received + self.total_priority_messages_received
    }
}

impl fmt::Display for HandlerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "STATS for {}:", self.name)?;
        writeln!(f, "  TotalNormalMessagesReceived:    {}", self.total_normal_messages_received)?;
        writeln!(f, "  TotalPriorityMessagesReceived:  {}", self.total_priority_messages_received)?;
        writeln!(f, "  TotalOutMessagesReceived:       {}", self.total_out_messages_received)?;
        writeln!(f, "  TotalMessagesProcessed:         {}", self.total_messages_processed)?;
        writeln!(f, "  TotalMessagesFailed:            {}", self.total_messages_failed)?;
        writeln!(f, "  TotalRetries:                   {}", self.total_retries)?;
        match self.last_message_processed {
            Some(at) => writeln!(f, "  LastMessageProcessed:           {}", at.to_rfc3339()),
            None => writeln!(f, "  LastMessageProcessed:           never"),
        }
    }
}

const NEVER: i64 = i64::MIN;

/// Live counters for one message type.
#[derive(Debug)]
pub struct HandlerCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    normal_received: AtomicU64,
    priority_received: AtomicU64,
    out_received: AtomicU64,
    last_processed_ms: AtomicI64,
}

impl Default for HandlerCounters {
    fn default() -> Self {
        Self {
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            normal_received: AtomicU64::new(0),
            priority_received: AtomicU64::new(0),
            out_received: AtomicU64::new(0),
            last_processed_ms: AtomicI64::new(NEVER),
        }
    }
}

impl HandlerCounters {
    pub fn record_received(&self, priority: bool) {
        if priority {
            self.priority_received.fetch_add(1, Ordering::Relaxed);
        } else {
            self.normal_received.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_processed(&self, at: DateTime<Utc>) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.touch(at);
    }

    pub fn record_failed(&self, at: DateTime<Utc>) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.touch(at);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_out(&self) {
        self.out_received.fetch_add(1, Ordering::Relaxed);
    }

    fn touch(&self, at: DateTime<Utc>) {
        self.last_processed_ms.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self, name: &str) -> HandlerStats {
        let last = self.last_processed_ms.load(Ordering::Relaxed);
        HandlerStats {
            name: name.to_string(),
            total_messages_processed: self.processed.load(Ordering::Relaxed),
            total_messages_failed: self.failed.load(Ordering::Relaxed),
            total_retries: self.retries.load(Ordering::Relaxed),
            total_normal_messages_received: self.normal_received.load(Ordering::Relaxed),
            total_priority_messages_received: self.priority_received.load(Ordering::Relaxed),
            total_out_messages_received: self.out_received.load(Ordering::Relaxed),
            last_message_processed: if last == NEVER {
                None
            } else {
                DateTime::from_timestamp_millis(last)
            },
        }
    }
}
