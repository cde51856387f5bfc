//! WhatsApp on-premise API adapter.
//!
//! The gateway logs into the install with basic auth and holds the returned
//! bearer token in the shared single-flight cache, so concurrent sends on
//! one channel perform a single login. Media URLs require the same token,
//! which is why the handler supplies `build_attachment_request`.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use carrier_common::types::config_keys;
use carrier_common::urns;
use carrier_common::{
    Channel, ChannelLog, ChannelType, LogType, MsgOut, MsgStatus, RequestError, SendError, Urn,
};
use carrier_gateway::handler::{
    AttachmentRequest, Handler, HandlerContext, ReceiveOutcome, ReceivedEvent, SendResult,
    WebhookRequest, WebhookRoute,
};
use carrier_gateway::{httpx, normalize, responses};

const MAX_TEXT_LENGTH: usize = 4_096;

/// Install tokens are valid for a week; refresh slightly early.
const TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 3_600 - 600);

#[derive(Debug, Deserialize)]
struct MoPayload {
    #[serde(default)]
    contacts: Vec<Contact>,
    #[serde(default)]
    messages: Vec<WaMessage>,
    #[serde(default)]
    statuses: Vec<WaStatus>,
}

#[derive(Debug, Deserialize)]
struct Contact {
    wa_id: Option<String>,
    profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaMessage {
    id: String,
    from: String,
    timestamp: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    text: Option<WaText>,
    image: Option<WaMedia>,
    audio: Option<WaMedia>,
    video: Option<WaMedia>,
    document: Option<WaMedia>,
    voice: Option<WaMedia>,
}

#[derive(Debug, Deserialize)]
struct WaText {
    body: String,
}

#[derive(Debug, Deserialize)]
struct WaMedia {
    id: Option<String>,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaStatus {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    users: Vec<LoginUser>,
}

#[derive(Debug, Deserialize)]
struct LoginUser {
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct TextPayload<'a> {
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    text: TextBody<'a>,
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct MediaPayload<'a> {
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<MediaLink<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<MediaLink<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video: Option<MediaLink<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    document: Option<MediaLink<'a>>,
}

#[derive(Debug, Serialize)]
struct MediaLink<'a> {
    link: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct TemplatePayload<'a> {
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    template: Template<'a>,
}

#[derive(Debug, Serialize)]
struct Template<'a> {
    name: &'a str,
    language: TemplateLanguage<'a>,
    components: Vec<TemplateComponent<'a>>,
}

#[derive(Debug, Serialize)]
struct TemplateLanguage<'a> {
    policy: &'a str,
    code: &'a str,
}

#[derive(Debug, Serialize)]
struct TemplateComponent<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    parameters: Vec<TemplateParameter<'a>>,
}

#[derive(Debug, Serialize)]
struct TemplateParameter<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<i64>,
    title: Option<String>,
}

pub struct WhatsAppHandler;

impl WhatsAppHandler {
    fn base_url(channel: &Channel) -> Result<String, SendError> {
        channel
            .config_str(config_keys::BASE_URL)
            .map(|s| s.trim_end_matches('/').to_string())
            .ok_or_else(|| SendError::ChannelConfig("missing base_url".into()))
    }

    /// The install's bearer token, via the shared single-flight cache.
    async fn access_token(
        ctx: &HandlerContext,
        channel: &Channel,
        log: &mut ChannelLog,
    ) -> Result<String, SendError> {
        let base = Self::base_url(channel)?;
        let username = channel
            .config_str(config_keys::USERNAME)
            .ok_or_else(|| SendError::ChannelConfig("missing username".into()))?
            .to_string();
        let password = channel
            .config_str(config_keys::PASSWORD)
            .ok_or_else(|| SendError::ChannelConfig("missing password".into()))?
            .to_string();

        let http = ctx.http.clone();
        let log = &mut *log;
        ctx.tokens
            .get_or_fetch(channel.uuid, move || async move {
                let response = httpx::send_traced(
                    &http,
                    http.post(format!("{base}/v1/users/login"))
                        .basic_auth(&username, Some(&password)),
                    log,
                )
                .await?;
                response.require_success()?;

                let parsed: LoginResponse = response.json()?;
                let token = parsed
                    .users
                    .into_iter()
                    .next()
                    .and_then(|u| u.token)
                    .ok_or(SendError::ValueMissing("token"))?;
                Ok((token, TOKEN_TTL))
            })
            .await
    }

    fn status_for(provider_status: &str) -> Option<MsgStatus> {
        Some(match provider_status {
            "sending" | "sent" => MsgStatus::Sent,
            "delivered" => MsgStatus::Delivered,
            "read" => MsgStatus::Read,
            "failed" => MsgStatus::Failed,
            _ => return None,
        })
    }

    async fn post_message(
        ctx: &HandlerContext,
        url: &str,
        token: &str,
        payload: &impl Serialize,
        channel: &Channel,
        result: &mut SendResult,
        log: &mut ChannelLog,
    ) -> Result<(), SendError> {
        let response = httpx::send_traced(
            &ctx.http,
            ctx.http.post(url).bearer_auth(token).json(payload),
            log,
        )
        .await?;

        if response.status == 401 {
            // the install revoked our token early; next attempt re-logs-in
            ctx.tokens.invalidate(channel.uuid).await;
            return Err(SendError::ResponseStatus(401));
        }
        if response.status >= 500 {
            return Err(SendError::ConnectionFailed);
        }

        let parsed: SendResponse = response.json()?;
        if let Some(error) = parsed.errors.first() {
            return Err(SendError::failed_with_reason(
                &error.code.unwrap_or_default().to_string(),
                error.title.as_deref().unwrap_or("request rejected"),
            ));
        }
        if !(200..300).contains(&response.status) {
            return Err(SendError::ResponseStatus(response.status));
        }

        let id = parsed
            .messages
            .into_iter()
            .next()
            .and_then(|m| m.id)
            .ok_or(SendError::ValueMissing("id"))?;
        result.add_external_id(&id);
        Ok(())
    }
}

#[async_trait]
impl Handler for WhatsAppHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::new("WA").unwrap()
    }

    fn name(&self) -> &'static str {
        "WhatsApp"
    }

    fn routes(&self) -> Vec<WebhookRoute> {
        vec![WebhookRoute::post("receive", LogType::MsgReceive)]
    }

    async fn receive(
        &self,
        ctx: &HandlerContext,
        channel: &Channel,
        _action: &str,
        request: &WebhookRequest,
        _log: &mut ChannelLog,
    ) -> Result<ReceiveOutcome, RequestError> {
        let payload: MoPayload = serde_json::from_slice(&request.body)
            .map_err(|_| RequestError::bad_request("unable to parse request JSON"))?;

        let contact_name = |wa_id: &str| -> Option<String> {
            payload
                .contacts
                .iter()
                .find(|c| c.wa_id.as_deref() == Some(wa_id))
                .and_then(|c| c.profile.as_ref())
                .and_then(|p| p.name.clone())
        };

        let base = channel.config_str(config_keys::BASE_URL).unwrap_or_default();
        let mut received = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for message in &payload.messages {
            if !seen_ids.insert(message.id.clone()) {
                received.push(ReceivedEvent::Ignored(format!(
                    "duplicate message id: {}",
                    message.id
                )));
                continue;
            }

            let urn = Urn::new(urns::WHATSAPP, &message.from)
                .map_err(|e| RequestError::bad_request(e.to_string()))?;
            normalize::require_scheme(channel, &urn)?;

            let media = message
                .image
                .as_ref()
                .or(message.audio.as_ref())
                .or(message.video.as_ref())
                .or(message.document.as_ref())
                .or(message.voice.as_ref());

            let text = match (&message.text, media) {
                (Some(text), _) => text.body.clone(),
                (None, Some(media)) => media.caption.clone().unwrap_or_default(),
                (None, None) => String::new(),
            };

            if text.is_empty() && media.is_none() {
                received.push(ReceivedEvent::Ignored(format!(
                    "unsupported message type: {}",
                    message.kind
                )));
                continue;
            }

            let mut msg = ctx
                .backend
                .new_incoming_msg(channel, urn, &text)
                .with_external_id(&message.id);
            if let Some(name) = contact_name(&message.from) {
                msg = msg.with_contact_name(&name);
            }
            if let Some(received_on) = message
                .timestamp
                .as_deref()
                .and_then(|t| t.parse::<i64>().ok())
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            {
                msg = msg.with_received_on(received_on);
            }
            if let Some(media_id) = media.and_then(|m| m.id.as_deref()) {
                msg = msg.with_attachment(&format!("{base}/v1/media/{media_id}"));
            }

            ctx.backend
                .write_msg(msg.clone())
                .await
                .map_err(|e| RequestError::internal(e.to_string()))?;
            received.push(ReceivedEvent::Msg(msg));
        }

        for status in &payload.statuses {
            let Some(mapped) = Self::status_for(&status.status) else {
                received.push(ReceivedEvent::Ignored(format!(
                    "unknown status: {}",
                    status.status
                )));
                continue;
            };
            let update = ctx
                .backend
                .new_status_update_by_external_id(channel, &status.id, mapped);
            ctx.backend
                .write_status_update(update.clone())
                .await
                .map_err(|e| RequestError::internal(e.to_string()))?;
            received.push(ReceivedEvent::Status(update));
        }

        if received.is_empty() {
            return Ok(ReceiveOutcome::new(responses::request_ignored(
                "no messages or statuses in payload",
            )));
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
        let base = Self::base_url(channel)?;
        let token = Self::access_token(ctx, channel, log).await?;
        let url = format!("{base}/v1/messages");

        // templates take precedence; they are the only way to open a session
        if let Some(templating) = &msg.templating {
            let locale = msg.locale.as_deref().unwrap_or(&templating.language);
            let payload = TemplatePayload {
                to: msg.urn.path(),
                kind: "template",
                template: Template {
                    name: &templating.name,
                    language: TemplateLanguage {
                        policy: "deterministic",
                        code: locale,
                    },
                    components: vec![TemplateComponent {
                        kind: "body",
                        parameters: templating
                            .variables
                            .iter()
                            .map(|v| TemplateParameter {
                                kind: "text",
                                text: v,
                            })
                            .collect(),
                    }],
                },
            };
            return Self::post_message(ctx, &url, &token, &payload, channel, result, log).await;
        }

        for attachment in &msg.attachments {
            let (mime, media_url) = normalize::split_attachment(attachment);
            let caption = (!msg.text.is_empty()).then_some(msg.text.as_str());
            let link = MediaLink {
                link: media_url,
                caption,
            };
            let (kind, image, audio, video, document) = match mime.split('/').next() {
                Some("image") => ("image", Some(link), None, None, None),
                Some("audio") => ("audio", None, Some(link), None, None),
                Some("video") => ("video", None, None, Some(link), None),
                _ => ("document", None, None, None, Some(link)),
            };
            let payload = MediaPayload {
                to: msg.urn.path(),
                kind,
                image,
                audio,
                video,
                document,
            };
            Self::post_message(ctx, &url, &token, &payload, channel, result, log).await?;
        }

        // with a media caption the text already went out
        if !msg.attachments.is_empty() {
            return Ok(());
        }

        for part in normalize::split_msg_by_channel(channel, &msg.text, MAX_TEXT_LENGTH) {
            let payload = TextPayload {
                to: msg.urn.path(),
                kind: "text",
                text: TextBody { body: &part },
            };
            Self::post_message(ctx, &url, &token, &payload, channel, result, log).await?;
        }

        Ok(())
    }

    fn redact_values(&self, channel: &Channel) -> Vec<String> {
        [config_keys::PASSWORD, config_keys::AUTH_TOKEN]
            .iter()
            .filter_map(|key| channel.config_str(key).map(str::to_string))
            .collect()
    }

    fn build_attachment_request(&self, channel: &Channel, url: &str) -> Option<AttachmentRequest> {
        let token = channel.config_str(config_keys::AUTH_TOKEN)?;
        Some(AttachmentRequest {
            url: url.to_string(),
            headers: vec![("Authorization".to_string(), format!("Bearer {token}"))],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use carrier_common::Templating;
    use std::sync::Arc;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CHANNEL_UUID: &str = "8eb23e93-5ecb-45ba-b726-3b064e0c56ab";

    fn wa_channel(base_url: &str) -> Channel {
        Channel::new(
            Uuid::parse_str(CHANNEL_UUID).unwrap(),
            ChannelType::new("WA").unwrap(),
            "250788383383",
            &["whatsapp"],
        )
        .with_config("base_url", serde_json::json!(base_url))
        .with_config("username", serde_json::json!("waadmin"))
        .with_config("password", serde_json::json!("wapasswd"))
    }

    fn mount_login(mock: &MockServer, expect: u64) -> impl std::future::Future<Output = ()> + '_ {
        Mock::given(method("POST"))
            .and(path("/v1/users/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"users": [{"token": "wa-token-1", "expires_after": "2029-01-01 00:00:00+00:00"}]}"#,
            ))
            .expect(expect)
            .mount(mock)
    }

    const RECEIVE_BODY: &str = r#"{
        "contacts": [{"profile": {"name": "Jerry Cooney"}, "wa_id": "250788123123"}],
        "messages": [{
            "from": "250788123123",
            "id": "ABGGFlA5Fpa",
            "timestamp": "1547577720",
            "type": "text",
            "text": {"body": "Hello World"}
        }]
    }"#;

    #[tokio::test]
    async fn text_message_is_received() {
        let server = testkit::server(Arc::new(WhatsAppHandler), wa_channel("http://wa.local"));

        let (status, _) = server
            .post_json(&format!("/c/wa/{CHANNEL_UUID}/receive"), RECEIVE_BODY)
            .await;

        assert_eq!(status, 200);
        let msgs = server.backend.msgs();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].urn.to_string(), "whatsapp:250788123123");
        assert_eq!(msgs[0].text, "Hello World");
        assert_eq!(msgs[0].external_id.as_deref(), Some("ABGGFlA5Fpa"));
        assert_eq!(msgs[0].contact_name.as_deref(), Some("Jerry Cooney"));
    }

    #[tokio::test]
    async fn media_message_builds_install_url() {
        let server = testkit::server(Arc::new(WhatsAppHandler), wa_channel("http://wa.local"));

        let body = r#"{
            "messages": [{
                "from": "250788123123",
                "id": "ABGGFlA5Fpb",
                "timestamp": "1547577720",
                "type": "image",
                "image": {"id": "media-41", "mime_type": "image/jpeg", "caption": "check this"}
            }]
        }"#;
        server
            .post_json(&format!("/c/wa/{CHANNEL_UUID}/receive"), body)
            .await;

        let msgs = server.backend.msgs();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].text, "check this");
        assert_eq!(msgs[0].attachments, vec!["http://wa.local/v1/media/media-41"]);
    }

    #[tokio::test]
    async fn statuses_are_mapped() {
        let server = testkit::server(Arc::new(WhatsAppHandler), wa_channel("http://wa.local"));

        let body = r#"{"statuses": [{"id": "ABGGFlA5Fpa", "status": "read", "recipient_id": "250788123123"}]}"#;
        let (status, _) = server
            .post_json(&format!("/c/wa/{CHANNEL_UUID}/receive"), body)
            .await;

        assert_eq!(status, 200);
        let statuses = server.backend.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, MsgStatus::Read);
        assert_eq!(statuses[0].external_id.as_deref(), Some("ABGGFlA5Fpa"));
    }

    #[tokio::test]
    async fn duplicate_ids_write_once() {
        let server = testkit::server(Arc::new(WhatsAppHandler), wa_channel("http://wa.local"));

        let body = r#"{
            "messages": [
                {"from": "250788123123", "id": "dup-1", "type": "text", "text": {"body": "Hi"}},
                {"from": "250788123123", "id": "dup-1", "type": "text", "text": {"body": "Hi"}}
            ]
        }"#;
        server
            .post_json(&format!("/c/wa/{CHANNEL_UUID}/receive"), body)
            .await;

        assert_eq!(server.backend.msgs().len(), 1);
    }

    #[tokio::test]
    async fn send_logs_in_once_and_reuses_token() {
        let mock = MockServer::start().await;
        mount_login(&mock, 1).await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("Authorization", "Bearer wa-token-1"))
            .and(body_partial_json(serde_json::json!({
                "to": "250788123123",
                "type": "text",
                "text": {"body": "hello"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_string(
                r#"{"messages": [{"id": "gBEGkYiEB1VXAglK1"}]}"#,
            ))
            .expect(2)
            .mount(&mock)
            .await;

        let channel = wa_channel(&mock.uri());
        let server = testkit::server(Arc::new(WhatsAppHandler), channel.clone());
        let msg = MsgOut::new(
            1,
            &channel,
            Urn::parse("whatsapp:250788123123").unwrap(),
            "hello",
        );

        // two sends share one login through the single-flight cache
        for _ in 0..2 {
            let mut result = SendResult::new();
            let mut log = ChannelLog::new(LogType::MsgSend, vec![]);
            WhatsAppHandler
                .send(&server.ctx, &channel, &msg, &mut result, &mut log)
                .await
                .unwrap();
            assert_eq!(result.external_ids(), ["gBEGkYiEB1VXAglK1"]);
        }
    }

    #[tokio::test]
    async fn send_template_uses_deterministic_language() {
        let mock = MockServer::start().await;
        mount_login(&mock, 1).await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(serde_json::json!({
                "type": "template",
                "template": {
                    "name": "welcome",
                    "language": {"policy": "deterministic", "code": "en_US"},
                    "components": [{
                        "type": "body",
                        "parameters": [{"type": "text", "text": "Jerry"}]
                    }]
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_string(
                r#"{"messages": [{"id": "gBEGtemplate1"}]}"#,
            ))
            .expect(1)
            .mount(&mock)
            .await;

        let channel = wa_channel(&mock.uri());
        let server = testkit::server(Arc::new(WhatsAppHandler), channel.clone());
        let mut msg = MsgOut::new(
            2,
            &channel,
            Urn::parse("whatsapp:250788123123").unwrap(),
            "fallback body",
        );
        msg.templating = Some(Templating {
            name: "welcome".to_string(),
            language: "en".to_string(),
            variables: vec!["Jerry".to_string()],
        });
        msg.locale = Some("en_US".to_string());

        let mut result = SendResult::new();
        let mut log = ChannelLog::new(LogType::MsgSend, vec![]);
        WhatsAppHandler
            .send(&server.ctx, &channel, &msg, &mut result, &mut log)
            .await
            .unwrap();

        assert_eq!(result.external_ids(), ["gBEGtemplate1"]);
    }

    #[tokio::test]
    async fn send_401_invalidates_token() {
        let mock = MockServer::start().await;
        // two sends, two logins: the 401 drops the cached token
        mount_login(&mock, 2).await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock)
            .await;

        let channel = wa_channel(&mock.uri());
        let server = testkit::server(Arc::new(WhatsAppHandler), channel.clone());
        let msg = MsgOut::new(
            3,
            &channel,
            Urn::parse("whatsapp:250788123123").unwrap(),
            "hi",
        );

        for _ in 0..2 {
            let mut result = SendResult::new();
            let mut log = ChannelLog::new(LogType::MsgSend, vec![]);
            let err = WhatsAppHandler
                .send(&server.ctx, &channel, &msg, &mut result, &mut log)
                .await
                .unwrap_err();
            assert_eq!(err, SendError::ResponseStatus(401));
            assert_eq!(err.status(), MsgStatus::Errored);
        }
    }

    #[tokio::test]
    async fn send_api_error_fails_with_reason() {
        let mock = MockServer::start().await;
        mount_login(&mock, 1).await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                r#"{"errors": [{"code": 1006, "title": "Resource not found"}]}"#,
            ))
            .mount(&mock)
            .await;

        let channel = wa_channel(&mock.uri());
        let server = testkit::server(Arc::new(WhatsAppHandler), channel.clone());
        let msg = MsgOut::new(
            4,
            &channel,
            Urn::parse("whatsapp:250788123123").unwrap(),
            "hi",
        );

        let mut result = SendResult::new();
        let mut log = ChannelLog::new(LogType::MsgSend, vec![]);
        let err = WhatsAppHandler
            .send(&server.ctx, &channel, &msg, &mut result, &mut log)
            .await
            .unwrap_err();

        assert_eq!(err, SendError::failed_with_reason("1006", "Resource not found"));
    }

    #[tokio::test]
    async fn attachment_requests_carry_bearer_token() {
        let channel = wa_channel("http://wa.local")
            .with_config("auth_token", serde_json::json!("static-token"));

        let request = WhatsAppHandler
            .build_attachment_request(&channel, "http://wa.local/v1/media/media-41")
            .unwrap();

        assert_eq!(request.url, "http://wa.local/v1/media/media-41");
        assert_eq!(
            request.headers,
            vec![("Authorization".to_string(), "Bearer static-token".to_string())]
        );
    }

    #[tokio::test]
    async fn missing_config_is_permanent() {
        let channel = Channel::new(
            Uuid::parse_str(CHANNEL_UUID).unwrap(),
            ChannelType::new("WA").unwrap(),
            "250788383383",
            &["whatsapp"],
        );
        let server = testkit::server(Arc::new(WhatsAppHandler), channel.clone());
        let msg = MsgOut::new(
            5,
            &channel,
            Urn::parse("whatsapp:250788123123").unwrap(),
            "hi",
        );

        let mut result = SendResult::new();
        let mut log = ChannelLog::new(LogType::MsgSend, vec![]);
        let err = WhatsAppHandler
            .send(&server.ctx, &channel, &msg, &mut result, &mut log)
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::ChannelConfig(_)));
    }
}
