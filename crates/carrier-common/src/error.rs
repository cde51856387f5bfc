//! Stable error taxonomy shared by handlers, the front end and the sender
//! pool.
//!
//! A `SendError` surfaces from `Handler::send` only when the pool must change
//! message status; observational failures are attached to the channel log as
//! `ChannelError`s instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::MsgStatus;

/// Errors a handler may return from its send path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// Network failure, DNS failure or a 5xx response. Transient.
    #[error("connection to server failed")]
    ConnectionFailed,

    /// Non-2xx response the provider considers non-transient.
    #[error("unexpected response status: {0}")]
    ResponseStatus(u16),

    /// Response body was recognized and indicates failure. Permanent.
    #[error("response content indicates failure: {0}")]
    ResponseContent(String),

    /// Response body could not be decoded. Transient.
    #[error("unable to parse response: {0}")]
    ResponseUnparseable(String),

    /// A required channel config value is missing or invalid. Permanent.
    #[error("missing or invalid channel config: {0}")]
    ChannelConfig(String),

    /// An expected response field was absent.
    #[error("expected response value missing: {0}")]
    ValueMissing(&'static str),

    /// The provider rejected the message with a structured reason. Permanent.
    #[error("send failed [{code}]: {description}")]
    FailedWithReason { code: String, description: String },
}

impl SendError {
    pub fn failed_with_reason(code: &str, description: &str) -> Self {
        SendError::FailedWithReason {
            code: code.to_string(),
            description: description.to_string(),
        }
    }

    /// Stable string code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            SendError::ConnectionFailed => "connection_failed",
            SendError::ResponseStatus(_) => "response_status",
            SendError::ResponseContent(_) => "response_content",
            SendError::ResponseUnparseable(_) => "response_unparseable",
            SendError::ChannelConfig(_) => "channel_config",
            SendError::ValueMissing(_) => "response_value_missing",
            SendError::FailedWithReason { .. } => "failed_with_reason",
        }
    }

    /// The status the sender pool records for this error.
    ///
    /// A missing provider message id is permanent (the send cannot be
    /// correlated); any other missing value is transient.
    pub fn status(&self) -> MsgStatus {
        match self {
            SendError::ConnectionFailed
            | SendError::ResponseStatus(_)
            | SendError::ResponseUnparseable(_) => MsgStatus::Errored,
            SendError::ValueMissing(field) => {
                if matches!(*field, "id" | "message_id" | "external_id") {
                    MsgStatus::Failed
                } else {
                    MsgStatus::Errored
                }
            }
            SendError::ResponseContent(_)
            | SendError::ChannelConfig(_)
            | SendError::FailedWithReason { .. } => MsgStatus::Failed,
        }
    }
}

/// A typed error recorded on a channel log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelError {
    pub code: String,
    /// Provider-side error code, when one was given.
    pub ext_code: Option<String>,
    pub message: String,
}

impl ChannelError {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            ext_code: None,
            message: message.to_string(),
        }
    }

    /// A non-fatal provider-side signal; attached to the log, never a status
    /// change by itself.
    pub fn external(code: &str, message: &str) -> Self {
        Self {
            code: "external".to_string(),
            ext_code: Some(code.to_string()),
            message: message.to_string(),
        }
    }

    pub fn config(message: &str) -> Self {
        Self::new("channel_config", message)
    }
}

impl From<&SendError> for ChannelError {
    fn from(err: &SendError) -> Self {
        let mut e = ChannelError::new(err.code(), &err.to_string());
        if let SendError::FailedWithReason { code, .. } = err {
            e.ext_code = Some(code.clone());
        }
        e
    }
}

/// A request-level failure from a handler's receive path, written to the
/// caller as a short English message with the given status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RequestError {
    pub status: u16,
    pub message: String,
}

impl RequestError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: 401,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: 500,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_error_codes_are_stable() {
        assert_eq!(SendError::ConnectionFailed.code(), "connection_failed");
        assert_eq!(SendError::ResponseStatus(403).code(), "response_status");
        assert_eq!(
            SendError::failed_with_reason("21610", "stopped").code(),
            "failed_with_reason"
        );
        assert_eq!(SendError::ValueMissing("id").code(), "response_value_missing");
    }

    #[test]
    fn send_error_status_mapping() {
        assert_eq!(SendError::ConnectionFailed.status(), MsgStatus::Errored);
        assert_eq!(SendError::ResponseStatus(429).status(), MsgStatus::Errored);
        assert_eq!(
            SendError::ResponseUnparseable("not json".into()).status(),
            MsgStatus::Errored
        );
        assert_eq!(
            SendError::ResponseContent("error".into()).status(),
            MsgStatus::Failed
        );
        assert_eq!(
            SendError::ChannelConfig("missing auth_token".into()).status(),
            MsgStatus::Failed
        );
        assert_eq!(
            SendError::failed_with_reason("21610", "stopped").status(),
            MsgStatus::Failed
        );
        // id fields are permanent, others transient
        assert_eq!(SendError::ValueMissing("message_id").status(), MsgStatus::Failed);
        assert_eq!(SendError::ValueMissing("balance").status(), MsgStatus::Errored);
    }

    #[test]
    fn external_errors_carry_provider_code() {
        let err = ChannelError::external("131026", "message undeliverable");
        assert_eq!(err.code, "external");
        assert_eq!(err.ext_code.as_deref(), Some("131026"));
    }
}
