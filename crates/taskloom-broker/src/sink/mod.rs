// crates/taskloom-broker/src/sink/mod.rs
// ============================================================================
// Module: Task Loom Broker Sink
// Description: Delivery boundary and the batched `EventSink` built on top of it.
// Purpose: Separate "what to deliver" (`Sink`) from "how emissions queue and
//          drain" (`BrokerEventSink`).
// Dependencies: taskloom-core, std::sync::mpsc, thiserror
// ============================================================================

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::Sender;

use taskloom_core::EventSink;
use taskloom_core::EventSinkError;
use taskloom_core::Priority;
use thiserror::Error;

/// Emissions buffered beyond this depth are dropped rather than blocking the
/// caller.
const QUEUE_CAPACITY: usize = 4_096;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while delivering a message to a concrete sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink's transport failed.
    #[error("sink delivery failed: {0}")]
    Delivery(String),
}

// ============================================================================
// SECTION: Dispatch Message
// ============================================================================

/// One queued emission awaiting delivery.
#[derive(Debug, Clone)]
pub struct DispatchMessage {
    /// Monotonic receipt id assigned at enqueue time.
    pub receipt_id: u64,
    /// Whether this was a creation or an update event.
    pub is_create: bool,
    /// Event type discriminator, e.g. `"stage_completed"`.
    pub event_type: String,
    /// Opaque event payload.
    pub payload: String,
    /// Delivery priority.
    pub priority: Priority,
}

// ============================================================================
// SECTION: Receipt Factory
// ============================================================================

/// Issues monotonically increasing receipt ids, deterministic under replay.
#[derive(Debug, Default)]
pub struct ReceiptFactory {
    next: AtomicU64,
}

impl ReceiptFactory {
    /// Creates a factory starting at receipt id `1`.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    /// Issues the next receipt id.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

// ============================================================================
// SECTION: Sink
// ============================================================================

/// Delivers one dispatch message to an external observer.
pub trait Sink: Send + Sync {
    /// Delivers `message`. Implementations should treat delivery as
    /// best-effort; the broker never retries a failed delivery.
    fn deliver(&self, message: &DispatchMessage) -> Result<(), SinkError>;
}

/// A [`Sink`] that logs every message via the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl Sink for LogSink {
    fn deliver(&self, message: &DispatchMessage) -> Result<(), SinkError> {
        log::info!(
            "event receipt={} type={} priority={:?} payload={}",
            message.receipt_id,
            message.event_type,
            priority_label(message.priority),
            message.payload
        );
        Ok(())
    }
}

/// A [`Sink`] that forwards messages to an in-process `mpsc` channel, useful
/// for tests and in-process observers.
pub struct ChannelSink {
    sender: Sender<DispatchMessage>,
}

impl ChannelSink {
    /// Creates a channel sink paired with the receiver end for the caller to
    /// drain.
    #[must_use]
    pub fn new() -> (Self, Receiver<DispatchMessage>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl Sink for ChannelSink {
    fn deliver(&self, message: &DispatchMessage) -> Result<(), SinkError> {
        self.sender
            .send(message.clone())
            .map_err(|error| SinkError::Delivery(error.to_string()))
    }
}

fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "high",
        Priority::Normal => "normal",
        Priority::Low => "low",
    }
}

// ============================================================================
// SECTION: Broker Event Sink
// ============================================================================

/// Batched, priority-aware [`EventSink`] that delegates delivery to a
/// [`Sink`].
///
/// # Invariants
/// - `drain` delivers queued high-priority messages before normal, and
///   normal before low, within one call.
/// - A full queue drops the new emission rather than blocking the caller.
pub struct BrokerEventSink<S: Sink> {
    sink: S,
    receipts: ReceiptFactory,
    queue: Mutex<Vec<DispatchMessage>>,
}

impl<S: Sink> BrokerEventSink<S> {
    /// Creates a new broker wrapping the given delivery sink.
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            receipts: ReceiptFactory::new(),
            queue: Mutex::new(Vec::new()),
        }
    }

    fn enqueue(&self, is_create: bool, event_type: &str, payload: &str, priority: Priority) -> Result<(), EventSinkError> {
        #[allow(clippy::unwrap_used)]
        let mut queue = self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if queue.len() >= QUEUE_CAPACITY {
            return Err(EventSinkError::QueueFull);
        }
        queue.push(DispatchMessage {
            receipt_id: self.receipts.next(),
            is_create,
            event_type: event_type.to_string(),
            payload: payload.to_string(),
            priority,
        });
        Ok(())
    }
}

impl<S: Sink> EventSink for BrokerEventSink<S> {
    fn emit_create(&self, event_type: &str, payload: &str, priority: Priority) -> Result<(), EventSinkError> {
        self.enqueue(true, event_type, payload, priority)
    }

    fn emit_update(&self, event_type: &str, payload: &str, priority: Priority) -> Result<(), EventSinkError> {
        self.enqueue(false, event_type, payload, priority)
    }

    fn drain(&self) -> Result<(), EventSinkError> {
        #[allow(clippy::unwrap_used)]
        let mut queue = self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        queue.sort_by_key(|message| priority_rank(message.priority));
        for message in queue.drain(..) {
            if let Err(error) = self.sink.deliver(&message) {
                log::warn!("broker sink delivery failed for receipt {}: {error}", message.receipt_id);
            }
        }
        Ok(())
    }
}

const fn priority_rank(priority: Priority) -> u8 {
    match priority {
        Priority::High => 0,
        Priority::Normal => 1,
        Priority::Low => 2,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn receipt_factory_issues_increasing_ids_starting_at_one() {
        let factory = ReceiptFactory::new();
        assert_eq!(factory.next(), 1);
        assert_eq!(factory.next(), 2);
        assert_eq!(factory.next(), 3);
    }

    #[test]
    fn channel_sink_forwards_delivered_messages() {
        let (sink, receiver) = ChannelSink::new();
        let message = DispatchMessage {
            receipt_id: 1,
            is_create: true,
            event_type: "stage_completed".to_string(),
            payload: "{}".to_string(),
            priority: Priority::Normal,
        };
        sink.deliver(&message).unwrap();
        let received = receiver.recv().unwrap();
        assert_eq!(received.receipt_id, 1);
        assert_eq!(received.event_type, "stage_completed");
    }

    #[test]
    fn channel_sink_delivery_fails_once_the_receiver_is_dropped() {
        let (sink, receiver) = ChannelSink::new();
        drop(receiver);
        let message = DispatchMessage {
            receipt_id: 1,
            is_create: true,
            event_type: "x".to_string(),
            payload: String::new(),
            priority: Priority::Low,
        };
        assert!(matches!(sink.deliver(&message), Err(SinkError::Delivery(_))));
    }

    #[test]
    fn broker_drains_high_priority_before_normal_and_low() {
        let (sink, receiver) = ChannelSink::new();
        let broker = BrokerEventSink::new(sink);
        broker.emit_create("low_evt", "{}", Priority::Low).unwrap();
        broker.emit_create("high_evt", "{}", Priority::High).unwrap();
        broker.emit_update("normal_evt", "{}", Priority::Normal).unwrap();

        broker.drain().unwrap();

        let order: Vec<String> = receiver.try_iter().map(|message| message.event_type).collect();
        assert_eq!(order, vec!["high_evt", "normal_evt", "low_evt"]);
    }

    #[test]
    fn queue_full_rejects_further_emissions() {
        let (sink, _receiver) = ChannelSink::new();
        let broker = BrokerEventSink::new(sink);
        for _ in 0..QUEUE_CAPACITY {
            broker.emit_create("evt", "{}", Priority::Normal).unwrap();
        }
        assert!(matches!(broker.emit_create("evt", "{}", Priority::Normal), Err(EventSinkError::QueueFull)));
    }

    #[test]
    fn log_sink_never_fails_delivery() {
        let sink = LogSink;
        let message = DispatchMessage {
            receipt_id: 1,
            is_create: false,
            event_type: "stage_completed".to_string(),
            payload: "{}".to_string(),
            priority: Priority::High,
        };
        assert!(sink.deliver(&message).is_ok());
    }
}
