//! Shared data model for the Carrier messaging gateway.
//!
//! This crate holds the types every other crate speaks in:
//! - Channel, ChannelType and channel configuration accessors
//! - MsgIn / MsgOut, ChannelEvent, StatusUpdate
//! - URNs (contact identifiers) and phone normalization
//! - The channel log: per-interaction HTTP traces, typed errors, redaction
//! - The stable error taxonomy shared by handlers and the sender pool

pub mod clog;
pub mod error;
pub mod logging;
pub mod types;
pub mod urns;

pub use clog::{ChannelLog, HttpTrace, LogType, Redactor};
pub use error::{ChannelError, RequestError, SendError};
pub use types::{
    Channel, ChannelEvent, ChannelEventType, ChannelType, MsgIn, MsgOut, MsgStatus, StatusUpdate,
    Templating,
};
pub use urns::Urn;
