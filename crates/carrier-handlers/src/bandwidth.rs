//! Bandwidth SMS/MMS adapter.
//!
//! Inbound webhooks arrive as JSON arrays of events; delivery reports come
//! through the `status` action. Outbound sends go to the v2 messaging API
//! with basic auth.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use carrier_common::types::config_keys;
use carrier_common::{
    Channel, ChannelLog, ChannelType, LogType, MsgOut, MsgStatus, RequestError, SendError, Urn,
};
use carrier_gateway::handler::{
    Handler, HandlerContext, ReceiveOutcome, ReceivedEvent, SendResult, WebhookRequest,
    WebhookRoute,
};
use carrier_gateway::{httpx, normalize, responses};

const DEFAULT_MAX_LENGTH: usize = 2_048;
const DEFAULT_SEND_URL: &str = "https://messaging.bandwidth.com";

const CONFIG_ACCOUNT_ID: &str = "account_id";
const CONFIG_APPLICATION_ID: &str = "application_id";

#[derive(Debug, Deserialize)]
struct InboundEvent {
    #[serde(rename = "type")]
    event_type: String,
    message: Option<InboundMessage>,
    #[serde(rename = "errorCode")]
    error_code: Option<i64>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    id: String,
    time: Option<String>,
    from: Option<String>,
    text: Option<String>,
    #[serde(default)]
    media: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SendPayload<'a> {
    #[serde(rename = "applicationId")]
    application_id: &'a str,
    to: [&'a str; 1],
    from: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    media: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: Option<String>,
}

pub struct BandwidthHandler;

impl BandwidthHandler {
    fn parse_events(request: &WebhookRequest) -> Result<Vec<InboundEvent>, RequestError> {
        serde_json::from_slice(&request.body)
            .map_err(|_| RequestError::bad_request("unable to parse request JSON"))
    }
}

#[async_trait]
impl Handler for BandwidthHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::new("BW").unwrap()
    }

    fn name(&self) -> &'static str {
        "Bandwidth"
    }

    fn routes(&self) -> Vec<WebhookRoute> {
        vec![
            WebhookRoute::post("receive", LogType::MsgReceive),
            WebhookRoute::post("status", LogType::MsgStatus),
        ]
    }

    async fn receive(
        &self,
        ctx: &HandlerContext,
        channel: &Channel,
        action: &str,
        request: &WebhookRequest,
        _log: &mut ChannelLog,
    ) -> Result<ReceiveOutcome, RequestError> {
        let events = Self::parse_events(request)?;
        if events.is_empty() {
            return Ok(ReceiveOutcome::new(responses::request_ignored(
                "no events in request",
            )));
        }

        let mut received = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for event in events {
            match (action, event.event_type.as_str()) {
                ("receive", "message-received") => {
                    let Some(message) = event.message else {
                        return Err(RequestError::bad_request("missing message in event"));
                    };
                    // repeated ids within one batch are processed once
                    if !seen_ids.insert(message.id.clone()) {
                        received.push(ReceivedEvent::Ignored(format!(
                            "duplicate message id: {}",
                            message.id
                        )));
                        continue;
                    }

                    let from = message.from.as_deref().unwrap_or_default();
                    let urn = Urn::from_phone(from, &channel.country)
                        .map_err(|e| RequestError::bad_request(e.to_string()))?;
                    normalize::require_scheme(channel, &urn)?;

                    let mut msg = ctx.backend.new_incoming_msg(
                        channel,
                        urn,
                        message.text.as_deref().unwrap_or_default(),
                    );
                    msg = msg.with_external_id(&message.id);
                    if let Some(time) = &message.time {
                        let received_on = DateTime::parse_from_rfc3339(time)
                            .map_err(|_| RequestError::bad_request("invalid message time"))?;
                        msg = msg.with_received_on(received_on.with_timezone(&Utc));
                    }
                    for media_url in &message.media {
                        msg = msg.with_attachment(media_url);
                    }

                    ctx.backend
                        .write_msg(msg.clone())
                        .await
                        .map_err(|e| RequestError::internal(e.to_string()))?;
                    received.push(ReceivedEvent::Msg(msg));
                }
                ("status", event_type @ ("message-delivered" | "message-failed")) => {
                    let Some(message) = event.message else {
                        return Err(RequestError::bad_request("missing message in event"));
                    };
                    let status = if event_type == "message-delivered" {
                        MsgStatus::Delivered
                    } else {
                        MsgStatus::Failed
                    };
                    let mut update =
                        ctx.backend
                            .new_status_update_by_external_id(channel, &message.id, status);
                    if status == MsgStatus::Failed {
                        if let Some(code) = event.error_code {
                            update = update.with_error(
                                &code.to_string(),
                                event.description.as_deref().unwrap_or_default(),
                            );
                        }
                    }
                    ctx.backend
                        .write_status_update(update.clone())
                        .await
                        .map_err(|e| RequestError::internal(e.to_string()))?;
                    received.push(ReceivedEvent::Status(update));
                }
                (_, other) => {
                    received.push(ReceivedEvent::Ignored(format!(
                        "unknown event type: {other}"
                    )));
                }
            }
        }

        Ok(ReceiveOutcome::with_events(
            responses::events_handled(&received),
            received,
        ))
    }

    async fn send(
        &self,
        ctx: &HandlerContext,
        channel: &Channel,
        msg: &MsgOut,
        result: &mut SendResult,
        log: &mut ChannelLog,
    ) -> Result<(), SendError> {
        let username = channel
            .config_str(config_keys::USERNAME)
            .ok_or_else(|| SendError::ChannelConfig("missing username".into()))?;
        let password = channel
            .config_str(config_keys::PASSWORD)
            .ok_or_else(|| SendError::ChannelConfig("missing password".into()))?;
        let account_id = channel
            .config_str(CONFIG_ACCOUNT_ID)
            .ok_or_else(|| SendError::ChannelConfig("missing account_id".into()))?;
        let application_id = channel
            .config_str(CONFIG_APPLICATION_ID)
            .ok_or_else(|| SendError::ChannelConfig("missing application_id".into()))?;

        let base = channel
            .config_str(config_keys::BASE_URL)
            .unwrap_or(DEFAULT_SEND_URL);
        let url = format!("{base}/api/v2/users/{account_id}/messages");

        let media: Vec<&str> = msg
            .attachments
            .iter()
            .map(|a| normalize::split_attachment(a).1)
            .collect();

        for part in normalize::split_msg_by_channel(channel, &msg.text, DEFAULT_MAX_LENGTH) {
            let payload = SendPayload {
                application_id,
                to: [msg.urn.path()],
                from: &channel.address,
                text: &part,
                media: media.clone(),
            };

            let response = httpx::send_traced(
                &ctx.http,
                ctx.http
                    .post(&url)
                    .basic_auth(username, Some(password))
                    .json(&payload),
                log,
            )
            .await?;
            response.require_success()?;

            let parsed: SendResponse = response.json()?;
            let id = parsed.id.ok_or(SendError::ValueMissing("id"))?;
            result.add_external_id(&id);
        }

        Ok(())
    }

    fn redact_values(&self, channel: &Channel) -> Vec<String> {
        channel
            .config_str(config_keys::PASSWORD)
            .map(|p| vec![p.to_string()])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use std::sync::Arc;
    use uuid::Uuid;
    use wiremock::matchers::{basic_auth, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CHANNEL_UUID: &str = "8eb23e93-5ecb-45ba-b726-3b064e0c56ab";

    fn bw_channel(base_url: Option<&str>) -> Channel {
        let mut channel = Channel::new(
            Uuid::parse_str(CHANNEL_UUID).unwrap(),
            ChannelType::new("BW").unwrap(),
            "2020",
            &["tel"],
        )
        .with_country("US")
        .with_config("username", serde_json::json!("user1"))
        .with_config("password", serde_json::json!("pass1"))
        .with_config("account_id", serde_json::json!("1234"))
        .with_config("application_id", serde_json::json!("app-1"));
        if let Some(base) = base_url {
            channel = channel.with_config("base_url", serde_json::json!(base));
        }
        channel
    }

    const RECEIVE_BODY: &str = r#"[{"type":"message-received","message":{"id":"14762","time":"2019-04-01T22:20:33Z","from":"+12065551234","text":"Hello","media":[]}}]"#;

    #[tokio::test]
    async fn receive_persists_msg() {
        let server = testkit::server(Arc::new(BandwidthHandler), bw_channel(None));

        let (status, body) = server
            .post_json(&format!("/c/bw/{CHANNEL_UUID}/receive"), RECEIVE_BODY)
            .await;

        assert_eq!(status, 200);
        assert!(body.contains("events handled"));

        let msgs = server.backend.msgs();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].urn.to_string(), "tel:+12065551234");
        assert_eq!(msgs[0].text, "Hello");
        assert_eq!(msgs[0].external_id.as_deref(), Some("14762"));
        assert_eq!(
            msgs[0].received_on,
            DateTime::parse_from_rfc3339("2019-04-01T22:20:33Z").unwrap()
        );
    }

    #[tokio::test]
    async fn duplicate_ids_in_batch_write_once() {
        let server = testkit::server(Arc::new(BandwidthHandler), bw_channel(None));

        let body = r#"[
            {"type":"message-received","message":{"id":"14762","from":"+12065551234","text":"Hello","media":[]}},
            {"type":"message-received","message":{"id":"14762","from":"+12065551234","text":"Hello","media":[]}}
        ]"#;
        let (status, response) = server
            .post_json(&format!("/c/bw/{CHANNEL_UUID}/receive"), body)
            .await;

        assert_eq!(status, 200);
        assert!(response.contains("duplicate message id"));
        assert_eq!(server.backend.msgs().len(), 1);
    }

    #[tokio::test]
    async fn invalid_json_is_rejected() {
        let server = testkit::server(Arc::new(BandwidthHandler), bw_channel(None));

        let (status, body) = server
            .post_json(&format!("/c/bw/{CHANNEL_UUID}/receive"), "not json")
            .await;

        assert_eq!(status, 400);
        assert!(body.contains("unable to parse request JSON"));
        assert!(server.backend.msgs().is_empty());
    }

    #[tokio::test]
    async fn invalid_phone_is_rejected() {
        let server = testkit::server(Arc::new(BandwidthHandler), bw_channel(None));

        let body = r#"[{"type":"message-received","message":{"id":"1","from":"owl","text":"hi","media":[]}}]"#;
        let (status, response) = server
            .post_json(&format!("/c/bw/{CHANNEL_UUID}/receive"), body)
            .await;

        assert_eq!(status, 400);
        assert!(response.contains("invalid phone number"));
    }

    #[tokio::test]
    async fn unknown_event_type_is_ignored() {
        let server = testkit::server(Arc::new(BandwidthHandler), bw_channel(None));

        let body = r#"[{"type":"message-wiggled","message":{"id":"1","media":[]}}]"#;
        let (status, response) = server
            .post_json(&format!("/c/bw/{CHANNEL_UUID}/receive"), body)
            .await;

        assert_eq!(status, 200);
        assert!(response.contains("unknown event type"));
        assert!(server.backend.msgs().is_empty());
    }

    #[tokio::test]
    async fn delivery_report_writes_status() {
        let server = testkit::server(Arc::new(BandwidthHandler), bw_channel(None));

        let body = r#"[{"type":"message-delivered","message":{"id":"14762","media":[]}}]"#;
        let (status, _) = server
            .post_json(&format!("/c/bw/{CHANNEL_UUID}/status"), body)
            .await;

        assert_eq!(status, 200);
        let statuses = server.backend.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, MsgStatus::Delivered);
        assert_eq!(statuses[0].external_id.as_deref(), Some("14762"));
    }

    #[tokio::test]
    async fn failed_report_carries_error_code() {
        let server = testkit::server(Arc::new(BandwidthHandler), bw_channel(None));

        let body = r#"[{"type":"message-failed","message":{"id":"14763","media":[]},"errorCode":4432,"description":"forbidden destination"}]"#;
        server
            .post_json(&format!("/c/bw/{CHANNEL_UUID}/status"), body)
            .await;

        let statuses = server.backend.statuses();
        assert_eq!(statuses[0].status, MsgStatus::Failed);
        assert_eq!(statuses[0].error_code.as_deref(), Some("4432"));
    }

    #[tokio::test]
    async fn send_records_external_id() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/users/1234/messages"))
            .and(basic_auth("user1", "pass1"))
            .and(body_partial_json(serde_json::json!({
                "applicationId": "app-1",
                "to": ["+12065551234"],
                "from": "2020",
                "text": "hello out there",
            })))
            .respond_with(
                ResponseTemplate::new(202).set_body_string(r#"{"id":"1db0c14d-5ec5"}"#),
            )
            .expect(1)
            .mount(&mock)
            .await;

        let server = testkit::server(
            Arc::new(BandwidthHandler),
            bw_channel(Some(&mock.uri())),
        );
        let channel = bw_channel(Some(&mock.uri()));
        let msg = MsgOut::new(
            10,
            &channel,
            Urn::parse("tel:+12065551234").unwrap(),
            "hello out there",
        );

        let mut result = SendResult::new();
        let mut log = ChannelLog::new(LogType::MsgSend, vec![]);
        BandwidthHandler
            .send(&server.ctx, &channel, &msg, &mut result, &mut log)
            .await
            .unwrap();

        assert_eq!(result.external_ids(), ["1db0c14d-5ec5"]);
        assert!(!log.http_traces().is_empty());
    }

    #[tokio::test]
    async fn send_5xx_is_connection_failed() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock)
            .await;

        let server = testkit::server(
            Arc::new(BandwidthHandler),
            bw_channel(Some(&mock.uri())),
        );
        let channel = bw_channel(Some(&mock.uri()));
        let msg = MsgOut::new(11, &channel, Urn::parse("tel:+12065551234").unwrap(), "hi");

        let mut result = SendResult::new();
        let mut log = ChannelLog::new(LogType::MsgSend, vec![]);
        let err = BandwidthHandler
            .send(&server.ctx, &channel, &msg, &mut result, &mut log)
            .await
            .unwrap_err();

        assert_eq!(err, SendError::ConnectionFailed);
        assert!(result.external_ids().is_empty());
    }

    #[tokio::test]
    async fn send_response_without_id_fails() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202).set_body_string("{}"))
            .mount(&mock)
            .await;

        let server = testkit::server(
            Arc::new(BandwidthHandler),
            bw_channel(Some(&mock.uri())),
        );
        let channel = bw_channel(Some(&mock.uri()));
        let msg = MsgOut::new(12, &channel, Urn::parse("tel:+12065551234").unwrap(), "hi");

        let mut result = SendResult::new();
        let mut log = ChannelLog::new(LogType::MsgSend, vec![]);
        let err = BandwidthHandler
            .send(&server.ctx, &channel, &msg, &mut result, &mut log)
            .await
            .unwrap_err();

        assert_eq!(err, SendError::ValueMissing("id"));
    }

    #[tokio::test]
    async fn send_without_config_fails_permanently() {
        let channel = Channel::new(
            Uuid::parse_str(CHANNEL_UUID).unwrap(),
            ChannelType::new("BW").unwrap(),
            "2020",
            &["tel"],
        );
        let server = testkit::server(Arc::new(BandwidthHandler), channel.clone());
        let msg = MsgOut::new(13, &channel, Urn::parse("tel:+12065551234").unwrap(), "hi");

        let mut result = SendResult::new();
        let mut log = ChannelLog::new(LogType::MsgSend, vec![]);
        let err = BandwidthHandler
            .send(&server.ctx, &channel, &msg, &mut result, &mut log)
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::ChannelConfig(_)));
        assert_eq!(err.status(), MsgStatus::Failed);
    }

    #[tokio::test]
    async fn long_text_sends_one_part_per_segment() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202).set_body_string(r#"{"id":"part-id"}"#))
            .expect(2)
            .mount(&mock)
            .await;

        let channel = bw_channel(Some(&mock.uri()))
            .with_config("max_length", serde_json::json!(10));
        let server = testkit::server(Arc::new(BandwidthHandler), channel.clone());
        let msg = MsgOut::new(
            14,
            &channel,
            Urn::parse("tel:+12065551234").unwrap(),
            "first bit second bit",
        );

        let mut result = SendResult::new();
        let mut log = ChannelLog::new(LogType::MsgSend, vec![]);
        BandwidthHandler
            .send(&server.ctx, &channel, &msg, &mut result, &mut log)
            .await
            .unwrap();

        assert_eq!(result.external_ids().len(), 2);
    }
}
