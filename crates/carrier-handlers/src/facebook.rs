//! Facebook Messenger adapter.
//!
//! Subscription is a GET handshake echoing `hub.challenge`; afterwards the
//! page is subscribed asynchronously through the Graph API. Event callbacks
//! are signed with `X-Hub-Signature-256` over the raw body.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use carrier_common::types::config_keys;
use carrier_common::urns;
use carrier_common::{
    Channel, ChannelError, ChannelEventType, ChannelLog, ChannelType, LogType, MsgOut, MsgStatus,
    RequestError, SendError, Urn,
};
use carrier_gateway::handler::{
    Handler, HandlerContext, ReceiveOutcome, ReceivedEvent, SendResult, WebhookRequest,
    WebhookRoute,
};
use carrier_gateway::{httpx, normalize, responses, signing};

const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com";
const GRAPH_VERSION: &str = "v12.0";
const MAX_TEXT_LENGTH: usize = 2_000;

const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

#[derive(Debug, Deserialize)]
struct MoPayload {
    object: String,
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    messaging: Vec<Messaging>,
}

#[derive(Debug, Deserialize)]
struct Messaging {
    sender: Actor,
    timestamp: i64,
    message: Option<FbMessage>,
    postback: Option<Postback>,
    referral: Option<Referral>,
    optin: Option<Optin>,
    delivery: Option<Delivery>,
}

#[derive(Debug, Deserialize)]
struct Actor {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FbMessage {
    mid: String,
    text: Option<String>,
    #[serde(default)]
    attachments: Vec<FbAttachment>,
    #[serde(default)]
    is_echo: bool,
}

#[derive(Debug, Deserialize)]
struct FbAttachment {
    payload: Option<AttachmentPayload>,
}

#[derive(Debug, Deserialize)]
struct AttachmentPayload {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Postback {
    title: Option<String>,
    payload: Option<String>,
    referral: Option<Referral>,
}

#[derive(Debug, Deserialize)]
struct Referral {
    #[serde(rename = "ref")]
    reference: Option<String>,
    source: Option<String>,
    #[serde(rename = "type")]
    referral_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Optin {
    #[serde(rename = "ref")]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delivery {
    #[serde(default)]
    mids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SendPayload<'a> {
    messaging_type: &'a str,
    recipient: RecipientRef<'a>,
    message: OutboundMessage<'a>,
}

#[derive(Debug, Serialize)]
struct RecipientRef<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct OutboundMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachment: Option<OutboundAttachment<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    quick_replies: Vec<OutboundQuickReply<'a>>,
}

#[derive(Debug, Serialize)]
struct OutboundAttachment<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: OutboundAttachmentPayload<'a>,
}

#[derive(Debug, Serialize)]
struct OutboundAttachmentPayload<'a> {
    url: &'a str,
    is_reusable: bool,
}

#[derive(Debug, Clone, Serialize)]
struct OutboundQuickReply<'a> {
    content_type: &'a str,
    title: &'a str,
    payload: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_id: Option<String>,
    error: Option<GraphError>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: Option<String>,
    code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UserProfile {
    first_name: Option<String>,
    last_name: Option<String>,
}

pub struct FacebookHandler;

impl FacebookHandler {
    fn graph_url(channel: &Channel, path: &str) -> String {
        let base = channel
            .config_str(config_keys::BASE_URL)
            .unwrap_or(DEFAULT_GRAPH_URL);
        format!("{base}/{GRAPH_VERSION}/{path}")
    }

    fn verify(
        &self,
        channel: &Channel,
        request: &WebhookRequest,
    ) -> Result<ReceiveOutcome, RequestError> {
        if request.query_param("hub.mode").as_deref() != Some("subscribe") {
            return Ok(ReceiveOutcome::new(responses::request_ignored(
                "unknown hub mode",
            )));
        }

        let secret = channel
            .config_str(config_keys::SECRET)
            .ok_or_else(|| RequestError::bad_request("missing secret in config"))?;
        if request.query_param("hub.verify_token").as_deref() != Some(secret) {
            return Err(RequestError::bad_request("token does not match"));
        }

        let challenge = request.query_param("hub.challenge").unwrap_or_default();
        Ok(ReceiveOutcome::new(responses::raw(
            200,
            responses::CONTENT_TYPE_TEXT,
            challenge,
        )))
    }

    /// Subscribe the page to webhook delivery; runs off the request path so
    /// the verification response is not delayed.
    fn subscribe_async(&self, ctx: &HandlerContext, channel: &Channel) {
        let Some(token) = channel
            .config_str(config_keys::PAGE_ACCESS_TOKEN)
            .map(str::to_string)
        else {
            warn!(channel_uuid = %channel.uuid, "No page access token, skipping subscribe");
            return;
        };

        let url = format!(
            "{}?access_token={token}",
            Self::graph_url(channel, "me/subscribed_apps")
        );
        let client = ctx.http.clone();
        let channel_uuid = channel.uuid;
        tokio::spawn(async move {
            match client.post(&url).send().await {
                Ok(response) => debug!(
                    channel_uuid = %channel_uuid,
                    status = response.status().as_u16(),
                    "Page subscribe completed"
                ),
                Err(e) => warn!(channel_uuid = %channel_uuid, error = %e, "Page subscribe failed"),
            }
        });
    }

    fn event_time(timestamp_ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(timestamp_ms).unwrap_or_else(Utc::now)
    }
}

#[async_trait]
impl Handler for FacebookHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::new("FB").unwrap()
    }

    fn name(&self) -> &'static str {
        "Facebook"
    }

    fn routes(&self) -> Vec<WebhookRoute> {
        vec![
            WebhookRoute::get("receive", LogType::WebhookVerify),
            WebhookRoute::post("receive", LogType::MsgReceive),
        ]
    }

    async fn receive(
        &self,
        ctx: &HandlerContext,
        channel: &Channel,
        _action: &str,
        request: &WebhookRequest,
        log: &mut ChannelLog,
    ) -> Result<ReceiveOutcome, RequestError> {
        if request.method == "GET" {
            let outcome = self.verify(channel, request)?;
            if outcome.response.status == 200 && outcome.response.content_type == responses::CONTENT_TYPE_TEXT {
                self.subscribe_async(ctx, channel);
            }
            return Ok(outcome);
        }

        // callbacks are signed over the raw body with the channel secret
        if let Some(secret) = channel.config_str(config_keys::SECRET) {
            let header = request
                .header(SIGNATURE_HEADER)
                .ok_or_else(|| RequestError::bad_request("missing request signature"))?;
            signing::validate_hub_signature(secret, &request.body, header)?;
        }

        let payload: MoPayload = serde_json::from_slice(&request.body)
            .map_err(|_| RequestError::bad_request("unable to parse request JSON"))?;
        if payload.object != "page" {
            return Ok(ReceiveOutcome::new(responses::request_ignored(&format!(
                "unknown object type: {}",
                payload.object
            ))));
        }

        let mut received = Vec::new();
        let mut seen_mids: HashSet<String> = HashSet::new();

        for entry in payload.entry {
            for event in entry.messaging {
                let occurred_on = Self::event_time(event.timestamp);
                let urn = Urn::new(urns::FACEBOOK, &event.sender.id)
                    .map_err(|e| RequestError::bad_request(e.to_string()))?;
                normalize::require_scheme(channel, &urn)?;

                if let Some(message) = event.message {
                    if message.is_echo {
                        received.push(ReceivedEvent::Ignored("echo message".to_string()));
                        continue;
                    }
                    if !seen_mids.insert(message.mid.clone()) {
                        received.push(ReceivedEvent::Ignored(format!(
                            "duplicate message id: {}",
                            message.mid
                        )));
                        continue;
                    }

                    let mut msg = ctx
                        .backend
                        .new_incoming_msg(channel, urn, message.text.as_deref().unwrap_or_default())
                        .with_external_id(&message.mid)
                        .with_received_on(occurred_on);
                    for attachment in &message.attachments {
                        if let Some(url) = attachment.payload.as_ref().and_then(|p| p.url.as_deref())
                        {
                            msg = msg.with_attachment(url);
                        }
                    }

                    ctx.backend
                        .write_msg(msg.clone())
                        .await
                        .map_err(|e| RequestError::internal(e.to_string()))?;
                    received.push(ReceivedEvent::Msg(msg));
                } else if let Some(postback) = event.postback {
                    let (event_type, referral) = match postback.payload.as_deref() {
                        Some("get_started") => (ChannelEventType::NewConversation, None),
                        _ => (ChannelEventType::Referral, postback.referral),
                    };
                    let mut channel_event = ctx
                        .backend
                        .new_channel_event(channel, event_type, urn)
                        .with_occurred_on(occurred_on);
                    if let Some(title) = &postback.title {
                        channel_event = channel_event.with_extra("title", title);
                    }
                    if let Some(payload) = &postback.payload {
                        channel_event = channel_event.with_extra("payload", payload);
                    }
                    if let Some(referral) = referral {
                        if let Some(reference) = &referral.reference {
                            channel_event = channel_event.with_extra("referrer_id", reference);
                        }
                    }

                    ctx.backend
                        .write_channel_event(channel_event.clone())
                        .await
                        .map_err(|e| RequestError::internal(e.to_string()))?;
                    received.push(ReceivedEvent::Event(channel_event));
                } else if let Some(referral) = event.referral {
                    let mut channel_event = ctx
                        .backend
                        .new_channel_event(channel, ChannelEventType::Referral, urn)
                        .with_occurred_on(occurred_on);
                    if let Some(reference) = &referral.reference {
                        channel_event = channel_event.with_extra("referrer_id", reference);
                    }
                    if let Some(source) = &referral.source {
                        channel_event = channel_event.with_extra("source", source);
                    }
                    if let Some(referral_type) = &referral.referral_type {
                        channel_event = channel_event.with_extra("type", referral_type);
                    }

                    ctx.backend
                        .write_channel_event(channel_event.clone())
                        .await
                        .map_err(|e| RequestError::internal(e.to_string()))?;
                    received.push(ReceivedEvent::Event(channel_event));
                } else if let Some(optin) = event.optin {
                    let mut channel_event = ctx
                        .backend
                        .new_channel_event(channel, ChannelEventType::OptIn, urn)
                        .with_occurred_on(occurred_on);
                    if let Some(reference) = &optin.reference {
                        channel_event = channel_event.with_extra("ref", reference);
                    }

                    ctx.backend
                        .write_channel_event(channel_event.clone())
                        .await
                        .map_err(|e| RequestError::internal(e.to_string()))?;
                    received.push(ReceivedEvent::Event(channel_event));
                } else if let Some(delivery) = event.delivery {
                    for mid in &delivery.mids {
                        let update = ctx.backend.new_status_update_by_external_id(
                            channel,
                            mid,
                            MsgStatus::Delivered,
                        );
                        ctx.backend
                            .write_status_update(update.clone())
                            .await
                            .map_err(|e| RequestError::internal(e.to_string()))?;
                        received.push(ReceivedEvent::Status(update));
                    }
                } else {
                    received.push(ReceivedEvent::Ignored(
                        "unknown messaging event".to_string(),
                    ));
                }
            }
        }

        if received.is_empty() {
            log.error(ChannelError::new("request", "no events in payload"));
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
        let token = channel
            .config_str(config_keys::PAGE_ACCESS_TOKEN)
            .ok_or_else(|| SendError::ChannelConfig("missing page_access_token".into()))?;

        let url = format!(
            "{}?access_token={token}",
            Self::graph_url(channel, "me/messages")
        );
        let messaging_type = if msg.response_to_external_id.is_some() {
            "RESPONSE"
        } else {
            "UPDATE"
        };

        let quick_replies: Vec<OutboundQuickReply<'_>> = msg
            .quick_replies
            .iter()
            .map(|label| OutboundQuickReply {
                content_type: "text",
                title: label,
                payload: label,
            })
            .collect();

        // text parts first, attachments as their own messages
        let parts = normalize::split_msg_by_channel(channel, &msg.text, MAX_TEXT_LENGTH);
        let last_part = parts.len().saturating_sub(1);

        for (i, part) in parts.iter().enumerate() {
            let payload = SendPayload {
                messaging_type,
                recipient: RecipientRef {
                    id: msg.urn.path(),
                },
                message: OutboundMessage {
                    text: Some(part),
                    attachment: None,
                    // quick replies only make sense on the final part
                    quick_replies: if i == last_part {
                        quick_replies.clone()
                    } else {
                        Vec::new()
                    },
                },
            };
            self.send_one(ctx, &url, &payload, result, log).await?;
        }

        for attachment in &msg.attachments {
            let (mime, media_url) = normalize::split_attachment(attachment);
            let kind = match mime.split('/').next() {
                Some("image") => "image",
                Some("audio") => "audio",
                Some("video") => "video",
                _ => "file",
            };
            let payload = SendPayload {
                messaging_type,
                recipient: RecipientRef {
                    id: msg.urn.path(),
                },
                message: OutboundMessage {
                    text: None,
                    attachment: Some(OutboundAttachment {
                        kind,
                        payload: OutboundAttachmentPayload {
                            url: media_url,
                            is_reusable: true,
                        },
                    }),
                    quick_replies: Vec::new(),
                },
            };
            self.send_one(ctx, &url, &payload, result, log).await?;
        }

        Ok(())
    }

    fn redact_values(&self, channel: &Channel) -> Vec<String> {
        [config_keys::PAGE_ACCESS_TOKEN, config_keys::SECRET]
            .iter()
            .filter_map(|key| channel.config_str(key).map(str::to_string))
            .collect()
    }

    async fn describe_urn(
        &self,
        ctx: &HandlerContext,
        channel: &Channel,
        urn: &Urn,
        log: &mut ChannelLog,
    ) -> Result<HashMap<String, String>, SendError> {
        let token = channel
            .config_str(config_keys::PAGE_ACCESS_TOKEN)
            .ok_or_else(|| SendError::ChannelConfig("missing page_access_token".into()))?;

        let url = format!(
            "{}?fields=first_name,last_name&access_token={token}",
            Self::graph_url(channel, urn.path())
        );

        let response = httpx::send_traced(&ctx.http, ctx.http.get(&url), log).await?;
        response.require_success()?;
        let profile: UserProfile = response.json()?;

        let name = [profile.first_name, profile.last_name]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");

        let mut attributes = HashMap::new();
        if !name.is_empty() {
            attributes.insert("name".to_string(), name);
        }
        Ok(attributes)
    }
}

impl FacebookHandler {
    async fn send_one(
        &self,
        ctx: &HandlerContext,
        url: &str,
        payload: &SendPayload<'_>,
        result: &mut SendResult,
        log: &mut ChannelLog,
    ) -> Result<(), SendError> {
        let response =
            httpx::send_traced(&ctx.http, ctx.http.post(url).json(payload), log).await?;

        if response.status >= 500 {
            return Err(SendError::ConnectionFailed);
        }

        let parsed: SendResponse = response.json()?;
        if let Some(error) = parsed.error {
            let code = error.code.unwrap_or_default().to_string();
            let message = error.message.unwrap_or_else(|| "graph API error".to_string());
            return Err(SendError::failed_with_reason(&code, &message));
        }
        if !(200..300).contains(&response.status) {
            return Err(SendError::ResponseStatus(response.status));
        }

        let message_id = parsed.message_id.ok_or(SendError::ValueMissing("id"))?;
        result.add_external_id(&message_id);
        Ok(())
    }
}
