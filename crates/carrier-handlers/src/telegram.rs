//! Telegram Bot API adapter.
//!
//! Updates arrive as JSON; incoming media is resolved in-band through
//! `getFile`, which hands back a path under the bot token. The token rides
//! in every URL, so it is always in the redaction set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use carrier_common::types::config_keys;
use carrier_common::urns;
use carrier_common::{
    Channel, ChannelError, ChannelLog, ChannelType, LogType, MsgOut, RequestError, SendError, Urn,
};
use carrier_gateway::handler::{
    Handler, HandlerContext, ReceiveOutcome, ReceivedEvent, SendResult, WebhookRequest,
    WebhookRoute,
};
use carrier_gateway::{httpx, normalize, responses};

const DEFAULT_API_URL: &str = "https://api.telegram.org";
const MAX_TEXT_LENGTH: usize = 4_096;

#[derive(Debug, Deserialize)]
struct Update {
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    date: i64,
    from: Option<TgUser>,
    chat: TgChat,
    text: Option<String>,
    caption: Option<String>,
    #[serde(default)]
    photo: Vec<TgPhotoSize>,
    voice: Option<TgFile>,
    document: Option<TgFile>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    first_name: Option<String>,
    last_name: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgPhotoSize {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct FileResult {
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Serialize)]
struct SendPayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<ReplyMarkup<'a>>,
}

#[derive(Debug, Serialize)]
struct ReplyMarkup<'a> {
    keyboard: Vec<Vec<KeyboardButton<'a>>>,
    resize_keyboard: bool,
    one_time_keyboard: bool,
}

#[derive(Debug, Serialize)]
struct KeyboardButton<'a> {
    text: &'a str,
}

pub struct TelegramHandler;

impl TelegramHandler {
    fn api_url(channel: &Channel, token: &str, method: &str) -> String {
        let base = channel
            .config_str(config_keys::BASE_URL)
            .unwrap_or(DEFAULT_API_URL);
        format!("{base}/bot{token}/{method}")
    }

    /// Resolve a file id to a download URL. Failures are observational: the
    /// message still stands without the attachment.
    async fn resolve_file(
        ctx: &HandlerContext,
        channel: &Channel,
        token: &str,
        file_id: &str,
        log: &mut ChannelLog,
    ) -> Option<String> {
        let url = Self::api_url(channel, token, "getFile");
        let response = httpx::send_traced(
            &ctx.http,
            ctx.http.post(&url).json(&serde_json::json!({"file_id": file_id})),
            log,
        )
        .await
        .ok()?;

        let parsed: ApiResponse<FileResult> = match response.json() {
            Ok(parsed) => parsed,
            Err(_) => {
                log.error(ChannelError::external("file", "unable to resolve media file"));
                return None;
            }
        };
        if !parsed.ok {
            log.error(ChannelError::external(
                "file",
                parsed.description.as_deref().unwrap_or("getFile failed"),
            ));
            return None;
        }

        let base = channel
            .config_str(config_keys::BASE_URL)
            .unwrap_or(DEFAULT_API_URL);
        parsed
            .result
            .and_then(|r| r.file_path)
            .map(|path| format!("{base}/file/bot{token}/{path}"))
    }
}

#[async_trait]
impl Handler for TelegramHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::new("TG").unwrap()
    }

    fn name(&self) -> &'static str {
        "Telegram"
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
        log: &mut ChannelLog,
    ) -> Result<ReceiveOutcome, RequestError> {
        let update: Update = serde_json::from_slice(&request.body)
            .map_err(|_| RequestError::bad_request("unable to parse request JSON"))?;

        let Some(message) = update.message else {
            return Ok(ReceiveOutcome::new(responses::request_ignored(
                "no message in update",
            )));
        };

        let token = channel
            .config_str(config_keys::AUTH_TOKEN)
            .ok_or_else(|| RequestError::bad_request("missing auth token in config"))?;

        let mut urn = Urn::new(urns::TELEGRAM, &message.chat.id.to_string())
            .map_err(|e| RequestError::bad_request(e.to_string()))?;
        normalize::require_scheme(channel, &urn)?;

        let mut contact_name = String::new();
        if let Some(user) = &message.from {
            if let Some(username) = &user.username {
                urn = urn.with_display(username);
            }
            contact_name = [user.first_name.as_deref(), user.last_name.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
        }

        let text = message
            .text
            .as_deref()
            .or(message.caption.as_deref())
            .unwrap_or_default();

        let mut msg = ctx
            .backend
            .new_incoming_msg(channel, urn, text)
            .with_external_id(&message.message_id.to_string())
            .with_contact_name(&contact_name);
        if let Some(received_on) = DateTime::<Utc>::from_timestamp(message.date, 0) {
            msg = msg.with_received_on(received_on);
        }

        // largest photo size rides last in the list
        let file_id = message
            .photo
            .last()
            .map(|p| p.file_id.as_str())
            .or(message.voice.as_ref().map(|f| f.file_id.as_str()))
            .or(message.document.as_ref().map(|f| f.file_id.as_str()));
        if let Some(file_id) = file_id {
            if let Some(url) = Self::resolve_file(ctx, channel, token, file_id, log).await {
                msg = msg.with_attachment(&url);
            }
        }

        if msg.text.is_empty() && msg.attachments.is_empty() {
            return Ok(ReceiveOutcome::new(responses::request_ignored(
                "no text or media in message",
            )));
        }

        ctx.backend
            .write_msg(msg.clone())
            .await
            .map_err(|e| RequestError::internal(e.to_string()))?;

        let events = vec![ReceivedEvent::Msg(msg)];
        Ok(ReceiveOutcome::with_events(
            responses::events_handled(&events),
            events,
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
        let token = channel
            .config_str(config_keys::AUTH_TOKEN)
            .ok_or_else(|| SendError::ChannelConfig("missing auth_token".into()))?;

        let url = Self::api_url(channel, token, "sendMessage");

        let keyboard: Vec<Vec<KeyboardButton<'_>>> = msg
            .quick_replies
            .iter()
            .map(|label| vec![KeyboardButton { text: label }])
            .collect();

        let text = normalize::text_and_attachments(msg);
        let parts = normalize::split_msg_by_channel(channel, &text, MAX_TEXT_LENGTH);
        let last = parts.len().saturating_sub(1);

        for (i, part) in parts.iter().enumerate() {
            let payload = SendPayload {
                chat_id: msg.urn.path(),
                text: part,
                reply_markup: (i == last && !keyboard.is_empty()).then(|| ReplyMarkup {
                    keyboard: keyboard
                        .iter()
                        .map(|row| {
                            row.iter()
                                .map(|b| KeyboardButton { text: b.text })
                                .collect()
                        })
                        .collect(),
                    resize_keyboard: true,
                    one_time_keyboard: true,
                }),
            };

            let response =
                httpx::send_traced(&ctx.http, ctx.http.post(&url).json(&payload), log).await?;
            if response.status >= 500 {
                return Err(SendError::ConnectionFailed);
            }

            let parsed: ApiResponse<SentMessage> = response.json()?;
            if !parsed.ok {
                // the API names the rejection; treat it as permanent
                return Err(SendError::ResponseContent(
                    parsed
                        .description
                        .unwrap_or_else(|| "request rejected".to_string()),
                ));
            }

            let sent = parsed.result.ok_or(SendError::ValueMissing("id"))?;
            result.add_external_id(&sent.message_id.to_string());
        }

        Ok(())
    }

    fn redact_values(&self, channel: &Channel) -> Vec<String> {
        channel
            .config_str(config_keys::AUTH_TOKEN)
            .map(|t| vec![t.to_string()])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CHANNEL_UUID: &str = "8eb23e93-5ecb-45ba-b726-3b064e0c56ab";
    const BOT_TOKEN: &str = "256bot:a1b2c3";

    fn tg_channel(base_url: Option<&str>) -> Channel {
        let mut channel = Channel::new(
            Uuid::parse_str(CHANNEL_UUID).unwrap(),
            ChannelType::new("TG").unwrap(),
            "carrierbot",
            &["telegram"],
        )
        .with_config("auth_token", serde_json::json!(BOT_TOKEN));
        if let Some(base) = base_url {
            channel = channel.with_config("base_url", serde_json::json!(base));
        }
        channel
    }

    fn update_body(text: &str) -> String {
        serde_json::json!({
            "update_id": 174114370,
            "message": {
                "message_id": 41,
                "from": {"id": 3527065, "first_name": "Nic", "last_name": "Pottier", "username": "nicpottier"},
                "chat": {"id": 3527065, "type": "private"},
                "date": 1454119029,
                "text": text
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn text_message_is_received() {
        let server = testkit::server(Arc::new(TelegramHandler), tg_channel(None));

        let (status, _) = server
            .post_json(&format!("/c/tg/{CHANNEL_UUID}/receive"), &update_body("Hello World"))
            .await;

        assert_eq!(status, 200);
        let msgs = server.backend.msgs();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].text, "Hello World");
        assert_eq!(msgs[0].urn.to_string(), "telegram:3527065#nicpottier");
        assert_eq!(msgs[0].external_id.as_deref(), Some("41"));
        assert_eq!(msgs[0].contact_name.as_deref(), Some("Nic Pottier"));
    }

    #[tokio::test]
    async fn update_without_message_is_ignored() {
        let server = testkit::server(Arc::new(TelegramHandler), tg_channel(None));

        let (status, body) = server
            .post_json(
                &format!("/c/tg/{CHANNEL_UUID}/receive"),
                r#"{"update_id": 174114370}"#,
            )
            .await;

        assert_eq!(status, 200);
        assert!(body.contains("ignoring request, no message in update"));
        assert!(server.backend.msgs().is_empty());
    }

    #[tokio::test]
    async fn photo_resolves_download_url() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{BOT_TOKEN}/getFile")))
            .and(body_partial_json(serde_json::json!({"file_id": "photo-large"})))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"ok": true, "result": {"file_path": "photos/file_0.jpg"}}"#,
            ))
            .expect(1)
            .mount(&mock)
            .await;

        let server = testkit::server(Arc::new(TelegramHandler), tg_channel(Some(&mock.uri())));

        let body = serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 42,
                "from": {"id": 3527065, "first_name": "Nic"},
                "chat": {"id": 3527065},
                "date": 1454119029,
                "caption": "look",
                "photo": [
                    {"file_id": "photo-small", "width": 90},
                    {"file_id": "photo-large", "width": 1280}
                ]
            }
        })
        .to_string();

        let (status, _) = server
            .post_json(&format!("/c/tg/{CHANNEL_UUID}/receive"), &body)
            .await;

        assert_eq!(status, 200);
        let msgs = server.backend.msgs();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].text, "look");
        assert_eq!(
            msgs[0].attachments,
            vec![format!("{}/file/bot{BOT_TOKEN}/photos/file_0.jpg", mock.uri())]
        );
    }

    #[tokio::test]
    async fn failed_media_resolution_keeps_message() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"ok": false, "description": "file is too big"}"#,
            ))
            .mount(&mock)
            .await;

        let server = testkit::server(Arc::new(TelegramHandler), tg_channel(Some(&mock.uri())));

        let body = serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 43,
                "from": {"id": 3527065, "first_name": "Nic"},
                "chat": {"id": 3527065},
                "date": 1454119029,
                "caption": "look",
                "photo": [{"file_id": "photo-huge"}]
            }
        })
        .to_string();

        let (status, _) = server
            .post_json(&format!("/c/tg/{CHANNEL_UUID}/receive"), &body)
            .await;

        assert_eq!(status, 200);
        let msgs = server.backend.msgs();
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].attachments.is_empty());

        // the failed resolution is on the log
        tokio::time::sleep(Duration::from_millis(50)).await;
        let logs = server.backend.logs();
        assert_eq!(logs.len(), 1);
        let body_json = logs[0].body_json().unwrap();
        assert!(body_json.contains("file is too big"));
        assert!(!body_json.contains(BOT_TOKEN));
    }

    #[tokio::test]
    async fn send_records_message_id() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{BOT_TOKEN}/sendMessage")))
            .and(body_partial_json(serde_json::json!({
                "chat_id": "3527065",
                "text": "hello there"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"ok": true, "result": {"message_id": 133}}"#,
            ))
            .expect(1)
            .mount(&mock)
            .await;

        let channel = tg_channel(Some(&mock.uri()));
        let server = testkit::server(Arc::new(TelegramHandler), channel.clone());
        let msg = MsgOut::new(
            1,
            &channel,
            Urn::parse("telegram:3527065").unwrap(),
            "hello there",
        );

        let mut result = SendResult::new();
        let mut log = ChannelLog::new(LogType::MsgSend, vec![BOT_TOKEN.to_string()]);
        TelegramHandler
            .send(&server.ctx, &channel, &msg, &mut result, &mut log)
            .await
            .unwrap();

        assert_eq!(result.external_ids(), ["133"]);
        assert!(!log.http_traces()[0].url.contains(BOT_TOKEN));
    }

    #[tokio::test]
    async fn send_quick_replies_build_keyboard() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "reply_markup": {"keyboard": [[{"text": "Yes"}], [{"text": "No"}]]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"ok": true, "result": {"message_id": 134}}"#,
            ))
            .expect(1)
            .mount(&mock)
            .await;

        let channel = tg_channel(Some(&mock.uri()));
        let server = testkit::server(Arc::new(TelegramHandler), channel.clone());
        let mut msg = MsgOut::new(
            2,
            &channel,
            Urn::parse("telegram:3527065").unwrap(),
            "continue?",
        );
        msg.quick_replies = vec!["Yes".to_string(), "No".to_string()];

        let mut result = SendResult::new();
        let mut log = ChannelLog::new(LogType::MsgSend, vec![]);
        TelegramHandler
            .send(&server.ctx, &channel, &msg, &mut result, &mut log)
            .await
            .unwrap();

        assert_eq!(result.external_ids(), ["134"]);
    }

    #[tokio::test]
    async fn send_api_rejection_is_permanent() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                r#"{"ok": false, "description": "Forbidden: bot was blocked by the user"}"#,
            ))
            .mount(&mock)
            .await;

        let channel = tg_channel(Some(&mock.uri()));
        let server = testkit::server(Arc::new(TelegramHandler), channel.clone());
        let msg = MsgOut::new(3, &channel, Urn::parse("telegram:3527065").unwrap(), "hi");

        let mut result = SendResult::new();
        let mut log = ChannelLog::new(LogType::MsgSend, vec![]);
        let err = TelegramHandler
            .send(&server.ctx, &channel, &msg, &mut result, &mut log)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SendError::ResponseContent("Forbidden: bot was blocked by the user".to_string())
        );
    }
}
