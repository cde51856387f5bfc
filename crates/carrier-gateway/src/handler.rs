//! The contract every provider adapter implements.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;

use carrier_backend::Backend;
use carrier_common::{
    Channel, ChannelEvent, ChannelLog, ChannelType, LogType, MsgIn, MsgOut, RequestError,
    SendError, StatusUpdate, Urn,
};
use carrier_config::AppConfig;

use crate::tokens::TokenCache;

/// One webhook route a handler serves, e.g. `(POST, "receive", msg_receive)`.
#[derive(Debug, Clone)]
pub struct WebhookRoute {
    pub method: Method,
    pub action: &'static str,
    pub log_type: LogType,
}

impl WebhookRoute {
    pub fn post(action: &'static str, log_type: LogType) -> Self {
        Self {
            method: Method::POST,
            action,
            log_type,
        }
    }

    pub fn get(action: &'static str, log_type: LogType) -> Self {
        Self {
            method: Method::GET,
            action,
            log_type,
        }
    }
}

/// Shared resources handed to handlers on every call.
pub struct HandlerContext {
    pub backend: Arc<dyn Backend>,
    pub http: reqwest::Client,
    pub config: Arc<AppConfig>,
    pub tokens: TokenCache,
}

impl HandlerContext {
    pub fn new(backend: Arc<dyn Backend>, config: Arc<AppConfig>) -> Self {
        let http = backend.http_client();
        let tokens = TokenCache::new(backend.redis());
        Self {
            backend,
            http,
            config,
            tokens,
        }
    }
}

/// An inbound webhook request, body already bounded by the front end.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub method: Method,
    /// The externally visible URL of this request (configured domain + path
    /// + query), as providers signed it.
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Query parameters in order of appearance.
    pub fn query_params(&self) -> Vec<(String, String)> {
        match self.url.split_once('?') {
            Some((_, query)) => serde_urlencoded::from_str(query).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query_params()
            .into_iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Form fields from a urlencoded body.
    pub fn form_params(&self) -> Result<Vec<(String, String)>, RequestError> {
        serde_urlencoded::from_bytes(&self.body)
            .map_err(|_| RequestError::bad_request("unable to parse request form"))
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The opaque response a handler writes. The front end returns it verbatim,
/// never re-encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

/// What a receive call produced, for the channel log and tests.
#[derive(Debug, Clone)]
pub enum ReceivedEvent {
    Msg(MsgIn),
    Status(StatusUpdate),
    Event(ChannelEvent),
    Ignored(String),
}

/// Result of one receive call: the provider-facing response plus the events
/// written to the backend, in write order.
#[derive(Debug)]
pub struct ReceiveOutcome {
    pub response: WebhookResponse,
    pub events: Vec<ReceivedEvent>,
}

impl ReceiveOutcome {
    pub fn new(response: WebhookResponse) -> Self {
        Self {
            response,
            events: Vec::new(),
        }
    }

    pub fn with_events(response: WebhookResponse, events: Vec<ReceivedEvent>) -> Self {
        Self { response, events }
    }
}

/// Collects the provider's acceptance of an outbound send.
///
/// Each `add_external_id` call corresponds to one accepted outbound part and
/// produces a `wired` status row against that id.
#[derive(Debug, Default)]
pub struct SendResult {
    external_ids: Vec<String>,
}

impl SendResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_external_id(&mut self, id: &str) {
        self.external_ids.push(id.to_string());
    }

    pub fn external_ids(&self) -> &[String] {
        &self.external_ids
    }
}

/// A media request for providers whose attachment URLs require auth headers.
#[derive(Debug, Clone)]
pub struct AttachmentRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// A provider adapter.
///
/// Handlers are stateless tagged structs registered by the composition root;
/// per-call state arrives through the context, channel and log arguments.
#[async_trait]
pub trait Handler: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    fn name(&self) -> &'static str;

    /// The webhook routes this handler serves under `/c/<type>/<uuid>/`.
    fn routes(&self) -> Vec<WebhookRoute>;

    /// Handle one inbound webhook call. For each logical event in the
    /// payload: validate, normalize the sender to a URN the channel accepts,
    /// build the record through the backend factories, write it, and append
    /// it to the outcome. The response is in whatever format the provider
    /// expects.
    async fn receive(
        &self,
        ctx: &HandlerContext,
        channel: &Channel,
        action: &str,
        request: &WebhookRequest,
        log: &mut ChannelLog,
    ) -> Result<ReceiveOutcome, RequestError>;

    /// Attempt delivery of one outbound message. Returns `Ok(())` on
    /// acceptance (with external ids recorded on `result`), or the error
    /// kind that determines the status the pool writes.
    async fn send(
        &self,
        ctx: &HandlerContext,
        channel: &Channel,
        msg: &MsgOut,
        result: &mut SendResult,
        log: &mut ChannelLog,
    ) -> Result<(), SendError>;

    /// Secrets that must never appear in logs produced for this channel.
    fn redact_values(&self, _channel: &Channel) -> Vec<String> {
        Vec::new()
    }

    /// Fetch display attributes (e.g. contact name) for a URN from the
    /// provider.
    async fn describe_urn(
        &self,
        _ctx: &HandlerContext,
        _channel: &Channel,
        _urn: &Urn,
        _log: &mut ChannelLog,
    ) -> Result<HashMap<String, String>, SendError> {
        Ok(HashMap::new())
    }

    /// Authorized request for a media URL, for providers that protect their
    /// attachment downloads.
    fn build_attachment_request(
        &self,
        _channel: &Channel,
        _url: &str,
    ) -> Option<AttachmentRequest> {
        None
    }
}
