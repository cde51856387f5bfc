use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::urns::Urn;

// ============================================================================
// Channels
// ============================================================================

/// Short code identifying a provider adapter, e.g. `BW`, `T`, `FB`.
///
/// Stored canonically uppercase; URL path segments are matched
/// case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelType(String);

impl ChannelType {
    /// Parse a channel-type code. Codes are 1 to 5 ASCII letters.
    pub fn new(code: &str) -> Result<Self, String> {
        if code.is_empty() || code.len() > 5 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(format!("invalid channel type code: {code:?}"));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used in webhook URL paths.
    pub fn url_code(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ChannelType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ChannelType::new(&s)
    }
}

impl From<ChannelType> for String {
    fn from(t: ChannelType) -> String {
        t.0
    }
}

/// A configured account on a third-party provider.
///
/// Channels are immutable once loaded; the backend caches them by UUID and
/// invalidates on its own signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub uuid: Uuid,
    pub channel_type: ChannelType,
    /// The sending identity on the provider (phone number, page id, ...).
    pub address: String,
    /// ISO-3166 alpha-2 country code, may be empty.
    #[serde(default)]
    pub country: String,
    /// URN schemes this channel accepts, in preference order.
    pub schemes: Vec<String>,
    /// Provider credentials and per-channel overrides.
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

impl Channel {
    pub fn new(uuid: Uuid, channel_type: ChannelType, address: &str, schemes: &[&str]) -> Self {
        Self {
            uuid,
            channel_type,
            address: address.to_string(),
            country: String::new(),
            schemes: schemes.iter().map(|s| s.to_string()).collect(),
            config: HashMap::new(),
        }
    }

    pub fn with_country(mut self, country: &str) -> Self {
        self.country = country.to_string();
        self
    }

    pub fn with_config(mut self, key: &str, value: serde_json::Value) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }

    pub fn supports_scheme(&self, scheme: &str) -> bool {
        self.schemes.iter().any(|s| s == scheme)
    }

    /// String config value, `None` when absent or not a string.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    /// Integer config value, accepting both numbers and numeric strings.
    pub fn config_int(&self, key: &str) -> Option<i64> {
        match self.config.get(key) {
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(|v| v.as_bool())
    }
}

/// Well-known channel config keys.
pub mod config_keys {
    pub const AUTH_TOKEN: &str = "auth_token";
    pub const SECRET: &str = "secret";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const BASE_URL: &str = "base_url";
    pub const PAGE_ACCESS_TOKEN: &str = "page_access_token";
    pub const MAX_LENGTH: &str = "max_length";
    pub const MAX_CONCURRENT_REQUESTS: &str = "max_concurrent_requests";
    pub const MAX_RATE_PER_SECOND: &str = "max_rate_per_second";
}

// ============================================================================
// Messages
// ============================================================================

/// An inbound message normalized from a provider webhook.
///
/// Built by a handler's receive path, written to the backend once and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgIn {
    pub uuid: Uuid,
    pub channel_uuid: Uuid,
    pub channel_type: ChannelType,
    pub urn: Urn,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub external_id: Option<String>,
    pub received_on: DateTime<Utc>,
    pub contact_name: Option<String>,
}

impl MsgIn {
    pub fn new(channel: &Channel, urn: Urn, text: &str) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            channel_uuid: channel.uuid,
            channel_type: channel.channel_type.clone(),
            urn,
            text: text.to_string(),
            attachments: Vec::new(),
            external_id: None,
            received_on: Utc::now(),
            contact_name: None,
        }
    }

    pub fn with_external_id(mut self, id: &str) -> Self {
        self.external_id = Some(id.to_string());
        self
    }

    pub fn with_received_on(mut self, ts: DateTime<Utc>) -> Self {
        self.received_on = ts;
        self
    }

    pub fn with_attachment(mut self, url: &str) -> Self {
        self.attachments.push(url.to_string());
        self
    }

    pub fn with_contact_name(mut self, name: &str) -> Self {
        if !name.is_empty() {
            self.contact_name = Some(name.to_string());
        }
        self
    }
}

/// Template parameters for providers with pre-registered message templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Templating {
    pub name: String,
    pub language: String,
    #[serde(default)]
    pub variables: Vec<String>,
}

/// A queued outbound message popped from the backend.
///
/// Immutable from the core's point of view; the backend assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgOut {
    pub id: i64,
    pub uuid: Uuid,
    pub channel_uuid: Uuid,
    pub channel_type: ChannelType,
    pub urn: Urn,
    pub text: String,
    /// Typed attachments in `"mime/subtype:url"` form.
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub quick_replies: Vec<String>,
    /// External id of the inbound message this replies to, when the provider
    /// supports reply semantics.
    pub response_to_external_id: Option<String>,
    pub topic: Option<String>,
    pub templating: Option<Templating>,
    pub locale: Option<String>,
    #[serde(default)]
    pub high_priority: bool,
}

impl MsgOut {
    pub fn new(id: i64, channel: &Channel, urn: Urn, text: &str) -> Self {
        Self {
            id,
            uuid: Uuid::new_v4(),
            channel_uuid: channel.uuid,
            channel_type: channel.channel_type.clone(),
            urn,
            text: text.to_string(),
            attachments: Vec::new(),
            quick_replies: Vec::new(),
            response_to_external_id: None,
            topic: None,
            templating: None,
            locale: None,
            high_priority: false,
        }
    }
}

// ============================================================================
// Channel events
// ============================================================================

/// A non-message signal emitted by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelEventType {
    NewConversation,
    Referral,
    StopContact,
    OptIn,
    OptOut,
    WelcomeMessage,
}

impl ChannelEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelEventType::NewConversation => "new_conversation",
            ChannelEventType::Referral => "referral",
            ChannelEventType::StopContact => "stop_contact",
            ChannelEventType::OptIn => "opt_in",
            ChannelEventType::OptOut => "opt_out",
            ChannelEventType::WelcomeMessage => "welcome_message",
        }
    }
}

impl fmt::Display for ChannelEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub channel_uuid: Uuid,
    pub event_type: ChannelEventType,
    pub urn: Urn,
    pub occurred_on: DateTime<Utc>,
    #[serde(default)]
    pub extras: HashMap<String, String>,
}

impl ChannelEvent {
    pub fn new(channel: &Channel, event_type: ChannelEventType, urn: Urn) -> Self {
        Self {
            channel_uuid: channel.uuid,
            event_type,
            urn,
            occurred_on: Utc::now(),
            extras: HashMap::new(),
        }
    }

    pub fn with_occurred_on(mut self, ts: DateTime<Utc>) -> Self {
        self.occurred_on = ts;
        self
    }

    pub fn with_extra(mut self, key: &str, value: &str) -> Self {
        self.extras.insert(key.to_string(), value.to_string());
        self
    }
}

// ============================================================================
// Status updates
// ============================================================================

/// Delivery state of an outbound message.
///
/// States progress monotonically; the backend is the final authority on which
/// transitions it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgStatus {
    /// Accepted by the provider.
    Wired,
    /// Delivered to the network.
    Sent,
    /// Delivered to the user.
    Delivered,
    Read,
    /// Transient failure; the backend decides whether to re-enqueue.
    Errored,
    /// Permanent failure.
    Failed,
}

impl MsgStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MsgStatus::Wired => "wired",
            MsgStatus::Sent => "sent",
            MsgStatus::Delivered => "delivered",
            MsgStatus::Read => "read",
            MsgStatus::Errored => "errored",
            MsgStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for MsgStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A report of the delivery state of one outbound message, addressable either
/// by backend message id or by the provider's external id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub channel_uuid: Uuid,
    pub msg_id: Option<i64>,
    pub external_id: Option<String>,
    pub status: MsgStatus,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
}

impl StatusUpdate {
    pub fn by_id(channel: &Channel, msg_id: i64, status: MsgStatus) -> Self {
        Self {
            channel_uuid: channel.uuid,
            msg_id: Some(msg_id),
            external_id: None,
            status,
            error_code: None,
            error_description: None,
        }
    }

    pub fn by_external_id(channel: &Channel, external_id: &str, status: MsgStatus) -> Self {
        Self {
            channel_uuid: channel.uuid,
            msg_id: None,
            external_id: Some(external_id.to_string()),
            status,
            error_code: None,
            error_description: None,
        }
    }

    pub fn with_external_id(mut self, external_id: &str) -> Self {
        self.external_id = Some(external_id.to_string());
        self
    }

    pub fn with_error(mut self, code: &str, description: &str) -> Self {
        self.error_code = Some(code.to_string());
        self.error_description = Some(description.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_type_validation() {
        assert_eq!(ChannelType::new("bw").unwrap().as_str(), "BW");
        assert_eq!(ChannelType::new("T").unwrap().as_str(), "T");
        assert_eq!(ChannelType::new("T").unwrap().url_code(), "t");
        assert!(ChannelType::new("").is_err());
        assert!(ChannelType::new("toolong").is_err());
        assert!(ChannelType::new("f b").is_err());
        assert!(ChannelType::new("fb1").is_err());
    }

    #[test]
    fn channel_config_accessors() {
        let channel = Channel::new(
            Uuid::new_v4(),
            ChannelType::new("BW").unwrap(),
            "2020",
            &["tel"],
        )
        .with_config("auth_token", serde_json::json!("sesame"))
        .with_config("max_length", serde_json::json!(160))
        .with_config("max_rate_per_second", serde_json::json!("10"));

        assert_eq!(channel.config_str("auth_token"), Some("sesame"));
        assert_eq!(channel.config_int("max_length"), Some(160));
        assert_eq!(channel.config_int("max_rate_per_second"), Some(10));
        assert_eq!(channel.config_int("missing"), None);
        assert!(channel.supports_scheme("tel"));
        assert!(!channel.supports_scheme("facebook"));
    }

    #[test]
    fn status_update_addressing() {
        let channel = Channel::new(
            Uuid::new_v4(),
            ChannelType::new("T").unwrap(),
            "+12065551212",
            &["tel"],
        );

        let by_id = StatusUpdate::by_id(&channel, 42, MsgStatus::Wired);
        assert_eq!(by_id.msg_id, Some(42));
        assert!(by_id.external_id.is_none());

        let by_ext = StatusUpdate::by_external_id(&channel, "SM123", MsgStatus::Delivered)
            .with_error("30003", "unreachable handset");
        assert_eq!(by_ext.external_id.as_deref(), Some("SM123"));
        assert_eq!(by_ext.error_code.as_deref(), Some("30003"));
    }
}
