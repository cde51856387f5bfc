//! The backend adapter interface.
//!
//! The core consumes — never provides — persistence and queueing. This crate
//! defines the `Backend` trait the gateway and sender pool are written
//! against, the batching channel-log writer, and an in-memory implementation
//! used by dev mode and the test suites.
//!
//! Backend implementations own all persistence guarantees: at-least-once
//! delivery of inbound items, idempotent external-id handling, and a
//! crash-safe outbound queue.

use async_trait::async_trait;
use uuid::Uuid;

use carrier_common::{
    Channel, ChannelEvent, ChannelEventType, ChannelLog, ChannelType, MsgIn, MsgOut, MsgStatus,
    StatusUpdate, Urn,
};

pub mod logs;
pub mod mem;

pub use logs::{LogBatcher, LogSink, MemLogSink, StoredLog};
pub use mem::MemBackend;

pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("channel not found")]
    ChannelNotFound,

    #[error("channel type mismatch")]
    ChannelTypeMismatch,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("queue error: {0}")]
    Queue(String),
}

/// Opaque token tracking one popped outbound message until the worker
/// releases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerToken(pub u64);

/// An outbound message handed to a send worker.
#[derive(Debug)]
pub struct OutgoingAssignment {
    pub msg: MsgOut,
    pub token: WorkerToken,
}

/// How a worker releases its assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDisposition {
    /// The send was attempted and a status was written.
    Completed,
    /// The message goes back on the queue unchanged (rate or concurrency
    /// cap hit); no status change.
    Requeue,
}

/// Operations the channel runtime requires from the persistence layer.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Resolve a channel by UUID, verifying it is of the expected type.
    /// Implementations cache with a time bound.
    async fn channel(&self, channel_type: &ChannelType, uuid: Uuid) -> Result<Channel>;

    // ------------------------------------------------------------------
    // Record factories. Backends may override to attach their own ids.
    // ------------------------------------------------------------------

    fn new_incoming_msg(&self, channel: &Channel, urn: Urn, text: &str) -> MsgIn {
        MsgIn::new(channel, urn, text)
    }

    fn new_status_update(&self, channel: &Channel, msg_id: i64, status: MsgStatus) -> StatusUpdate {
        StatusUpdate::by_id(channel, msg_id, status)
    }

    fn new_status_update_by_external_id(
        &self,
        channel: &Channel,
        external_id: &str,
        status: MsgStatus,
    ) -> StatusUpdate {
        StatusUpdate::by_external_id(channel, external_id, status)
    }

    fn new_channel_event(
        &self,
        channel: &Channel,
        event_type: ChannelEventType,
        urn: Urn,
    ) -> ChannelEvent {
        ChannelEvent::new(channel, event_type, urn)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    async fn write_msg(&self, msg: MsgIn) -> Result<()>;

    async fn write_status_update(&self, status: StatusUpdate) -> Result<()>;

    async fn write_channel_event(&self, event: ChannelEvent) -> Result<()>;

    /// Persist a finalized channel log. Implementations batch internally;
    /// callers treat this as fire-and-forget.
    async fn write_channel_log(&self, log: ChannelLog) -> Result<()>;

    // ------------------------------------------------------------------
    // Outbound queue
    // ------------------------------------------------------------------

    /// Pop the highest-priority outbound message ready to send, with a token
    /// tracking the assignment. `None` when the queue is empty.
    async fn pop_next_outgoing(&self) -> Result<Option<OutgoingAssignment>>;

    /// Release a worker token.
    async fn mark_outgoing_complete(
        &self,
        token: WorkerToken,
        disposition: SendDisposition,
    ) -> Result<()>;

    // ------------------------------------------------------------------
    // Shared resources
    // ------------------------------------------------------------------

    /// Shared redis connection for handler-local caches, when configured.
    fn redis(&self) -> Option<redis::aio::ConnectionManager>;

    /// The process-wide HTTP client.
    fn http_client(&self) -> reqwest::Client;
}
