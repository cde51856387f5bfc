//! Provider-facing response builders.
//!
//! Handlers default to the JSON envelope `{"message": ..., "data": [...]}`;
//! providers with their own ack formats (Twilio XML, Facebook challenge
//! echo) build raw responses instead.

use serde_json::json;

use crate::handler::{ReceivedEvent, WebhookResponse};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_XML: &str = "text/xml; charset=utf-8";
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// 200 response describing the events a receive call wrote.
pub fn events_handled(events: &[ReceivedEvent]) -> WebhookResponse {
    let data: Vec<serde_json::Value> = events
        .iter()
        .map(|event| match event {
            ReceivedEvent::Msg(msg) => json!({
                "type": "msg",
                "channel_uuid": msg.channel_uuid,
                "msg_uuid": msg.uuid,
                "text": msg.text,
                "urn": msg.urn,
                "external_id": msg.external_id,
            }),
            ReceivedEvent::Status(status) => json!({
                "type": "status",
                "channel_uuid": status.channel_uuid,
                "status": status.status,
                "msg_id": status.msg_id,
                "external_id": status.external_id,
            }),
            ReceivedEvent::Event(event) => json!({
                "type": "event",
                "channel_uuid": event.channel_uuid,
                "event_type": event.event_type,
                "urn": event.urn,
            }),
            ReceivedEvent::Ignored(reason) => json!({
                "type": "ignored",
                "reason": reason,
            }),
        })
        .collect();

    WebhookResponse {
        status: 200,
        content_type: CONTENT_TYPE_JSON,
        body: json!({"message": "events handled", "data": data}).to_string(),
    }
}

/// 200 response telling the provider we understood but will not process the
/// request, so it does not re-deliver.
pub fn request_ignored(reason: &str) -> WebhookResponse {
    WebhookResponse {
        status: 200,
        content_type: CONTENT_TYPE_JSON,
        body: json!({"message": format!("ignoring request, {reason}")}).to_string(),
    }
}

/// Error response with a short English message.
pub fn request_error(status: u16, message: &str) -> WebhookResponse {
    WebhookResponse {
        status,
        content_type: CONTENT_TYPE_JSON,
        body: json!({"message": message, "data": []}).to_string(),
    }
}

/// Raw response in a provider-specific format; returned verbatim.
pub fn raw(status: u16, content_type: &'static str, body: impl Into<String>) -> WebhookResponse {
    WebhookResponse {
        status,
        content_type,
        body: body.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignored_body_is_stable() {
        let resp = request_ignored("unknown event type \"wiggle\"");
        assert_eq!(resp.status, 200);
        assert!(resp.body.contains("ignoring request, unknown event type"));
    }

    #[test]
    fn error_body_carries_message() {
        let resp = request_error(400, "invalid request signature");
        assert_eq!(resp.status, 400);
        assert!(resp.body.contains("invalid request signature"));
    }
}
