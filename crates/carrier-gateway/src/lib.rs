//! Carrier Channel Gateway
//!
//! The channel runtime shared by every provider adapter:
//! - Handler: the protocol a provider adapter implements
//! - HandlerRegistry: channel-type code to handler, fixed after startup
//! - normalize: URN/phone, message splitting, attachment and payload helpers
//! - signing: webhook signature validation with constant-time comparison
//! - httpx: outbound HTTP with channel-log tracing and redaction
//! - tokens: single-flight per-channel token refresh cache
//! - server: the axum front end routing `/c/<type>/<uuid>/<action>`

pub mod handler;
pub mod httpx;
pub mod normalize;
pub mod registry;
pub mod responses;
pub mod server;
pub mod signing;
pub mod tokens;

pub use handler::{
    AttachmentRequest, Handler, HandlerContext, ReceiveOutcome, ReceivedEvent, SendResult,
    WebhookRequest, WebhookResponse, WebhookRoute,
};
pub use registry::HandlerRegistry;
pub use server::{create_router, AppState};
pub use tokens::TokenCache;

/// User agent sent on every outbound provider request.
pub const USER_AGENT: &str = concat!("carrier/", env!("CARGO_PKG_VERSION"));
