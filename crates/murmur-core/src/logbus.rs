//! Append-only event log with live fan-out
//!
//! Records are kept in an unbounded-but-clearable history and pushed
//! to subscribers through a bounded broadcast channel. A subscriber
//! that falls behind its buffer is disconnected rather than allowed
//! to backpressure the producer; log emission must never stall model
//! operations.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Immutable once created. Sequence numbers are globally monotonic
/// for the process lifetime, surviving `clear`, so stale client-side
/// cursors stay detectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub sequence: u64,
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

struct History {
    records: Vec<LogRecord>,
    next_sequence: u64,
}

pub struct EventLog {
    history: Mutex<History>,
    sender: broadcast::Sender<LogRecord>,
}

impl EventLog {
    /// `channel_capacity` bounds the per-subscriber buffer; a lagged
    /// subscriber observes `RecvError::Lagged` and is expected to
    /// drop its stream and re-snapshot.
    pub fn new(channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            history: Mutex::new(History {
                records: Vec::new(),
                next_sequence: 0,
            }),
            sender,
        }
    }

    /// Assign the next sequence number, store the record, and publish
    /// it to live subscribers. The history lock is held only for the
    /// append itself, never for subscriber I/O.
    pub fn append(&self, level: LogLevel, message: impl Into<String>) -> LogRecord {
        let message = message.into();
        let record = {
            let mut history = self.history.lock().unwrap();
            let record = LogRecord {
                sequence: history.next_sequence,
                timestamp: chrono::Utc::now().to_rfc3339(),
                level,
                message,
            };
            history.next_sequence += 1;
            history.records.push(record.clone());
            record
        };

        match level {
            LogLevel::Debug => tracing::debug!(target: "murmur::events", "{}", record.message),
            LogLevel::Info => tracing::info!(target: "murmur::events", "{}", record.message),
            LogLevel::Warning => tracing::warn!(target: "murmur::events", "{}", record.message),
            LogLevel::Error | LogLevel::Critical => {
                tracing::error!(target: "murmur::events", "{}", record.message)
            }
        }

        // Send fails only when no subscriber is connected.
        let _ = self.sender.send(record.clone());
        record
    }

    /// Full ordered history, for a client catching up after
    /// connecting.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.history.lock().unwrap().records.clone()
    }

    /// New records only, starting from the moment of subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.sender.subscribe()
    }

    /// Empty the history, returning how many records were dropped.
    /// The sequence counter is not reset.
    pub fn clear(&self) -> usize {
        let mut history = self.history.lock().unwrap();
        let dropped = history.records.len();
        history.records.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn subscriber_sees_appends_in_order() {
        let log = EventLog::new(64);
        let mut rx = log.subscribe();

        for i in 0..10 {
            log.append(LogLevel::Info, format!("event {i}"));
        }

        let mut last = None;
        for _ in 0..10 {
            let record = rx.recv().await.unwrap();
            if let Some(prev) = last {
                assert!(record.sequence > prev, "sequence must be strictly increasing");
            }
            last = Some(record.sequence);
        }
    }

    #[tokio::test]
    async fn clear_preserves_sequence_counter() {
        let log = EventLog::new(8);
        log.append(LogLevel::Info, "first");
        log.append(LogLevel::Info, "second");
        assert_eq!(log.clear(), 2);
        assert!(log.snapshot().is_empty());

        let record = log.append(LogLevel::Info, "third");
        assert_eq!(record.sequence, 2);
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_affect_others() {
        let log = EventLog::new(8);
        let rx_dropped = log.subscribe();
        let mut rx = log.subscribe();
        drop(rx_dropped);

        log.append(LogLevel::Warning, "still delivered");
        let record = rx.recv().await.unwrap();
        assert_eq!(record.message, "still delivered");
    }

    #[tokio::test]
    async fn slow_subscriber_observes_lag_not_producer_stall() {
        let log = EventLog::new(4);
        let mut rx = log.subscribe();

        // Overrun the bounded buffer without ever reading.
        for i in 0..32 {
            log.append(LogLevel::Debug, format!("burst {i}"));
        }

        match rx.recv().await {
            Err(RecvError::Lagged(skipped)) => assert!(skipped > 0),
            other => panic!("expected lag, got {other:?}"),
        }
    }

    #[test]
    fn snapshot_is_a_copy() {
        let log = EventLog::new(8);
        log.append(LogLevel::Info, "one");
        let snap = log.snapshot();
        log.append(LogLevel::Info, "two");
        assert_eq!(snap.len(), 1);
    }
}
