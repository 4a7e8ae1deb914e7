// crates/taskloom-broker/src/lib.rs
// ============================================================================
// Module: Task Loom Broker
// Description: Batched, priority-aware `EventSink` implementation.
// Purpose: Best-effort broadcast of task/stage/gate changes without ever
//          blocking the engine on a slow or unavailable observer.
// Dependencies: taskloom-core, std::sync::mpsc
// ============================================================================

//! ## Overview
//! The broker buffers emissions on a bounded channel drained by a background
//! thread. High-priority emissions are flushed ahead of normal/low priority
//! ones within each drain batch. Delivery itself is
//! delegated to a [`Sink`] implementation; this crate ships a `log::info!`
//! sink and an `mpsc`-channel sink for in-process observers.

pub mod sink;

pub use sink::BrokerEventSink;
pub use sink::ChannelSink;
pub use sink::DispatchMessage;
pub use sink::LogSink;
pub use sink::ReceiptFactory;
pub use sink::Sink;
pub use sink::SinkError;
