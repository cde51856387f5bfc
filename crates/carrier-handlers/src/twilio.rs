//! Twilio SMS/MMS adapter.
//!
//! Twilio signs every callback with HMAC-SHA1 over the request URL plus the
//! sorted form fields, under the account's auth token. Responses are TwiML;
//! an empty `<Response/>` acknowledges without further action.

use async_trait::async_trait;
use serde::Deserialize;
use validator::Validate;

use carrier_common::types::config_keys;
use carrier_common::{
    Channel, ChannelLog, ChannelType, LogType, MsgOut, MsgStatus, RequestError, SendError, Urn,
};
use carrier_gateway::handler::{
    Handler, HandlerContext, ReceiveOutcome, ReceivedEvent, SendResult, WebhookRequest,
    WebhookRoute,
};
use carrier_gateway::{httpx, normalize, responses, signing};

const DEFAULT_MAX_LENGTH: usize = 1_600;
const DEFAULT_API_URL: &str = "https://api.twilio.com";

const CONFIG_ACCOUNT_SID: &str = "account_sid";

const SIGNATURE_HEADER: &str = "X-Twilio-Signature";

pub const EMPTY_TWIML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response/>"#;

/// Error codes Twilio returns for permanently unreachable destinations.
const STOPPED_CONTACT_CODE: i64 = 21610;

#[derive(Debug, Deserialize, Validate)]
struct ReceiveForm {
    #[validate(required)]
    #[serde(rename = "MessageSid")]
    message_sid: Option<String>,
    #[validate(required)]
    #[serde(rename = "From")]
    from: Option<String>,
    #[serde(rename = "FromCountry")]
    from_country: Option<String>,
    #[serde(rename = "Body")]
    body: Option<String>,
    #[serde(rename = "NumMedia")]
    num_media: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
struct StatusForm {
    #[validate(required)]
    #[serde(rename = "MessageSid")]
    message_sid: Option<String>,
    #[validate(required)]
    #[serde(rename = "MessageStatus")]
    message_status: Option<String>,
    #[serde(rename = "ErrorCode")]
    error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    sid: Option<String>,
    code: Option<i64>,
    message: Option<String>,
}

pub struct TwilioHandler;

impl TwilioHandler {
    fn validate_signature(
        channel: &Channel,
        request: &WebhookRequest,
    ) -> Result<(), RequestError> {
        let auth_token = channel
            .config_str(config_keys::AUTH_TOKEN)
            .ok_or_else(|| RequestError::bad_request("missing auth token in config"))?;

        let signature = request
            .header(SIGNATURE_HEADER)
            .ok_or_else(|| RequestError::bad_request("missing request signature"))?;

        let form = request.form_params()?;
        signing::validate_url_form_signature(auth_token, &request.url, &form, signature)
    }

    fn status_for(provider_status: &str) -> Option<MsgStatus> {
        Some(match provider_status {
            "queued" | "accepted" => MsgStatus::Wired,
            "sending" | "sent" => MsgStatus::Sent,
            "delivered" => MsgStatus::Delivered,
            "read" => MsgStatus::Read,
            "failed" | "undelivered" => MsgStatus::Failed,
            _ => return None,
        })
    }
}

#[async_trait]
impl Handler for TwilioHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::new("T").unwrap()
    }

    fn name(&self) -> &'static str {
        "Twilio"
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
        Self::validate_signature(channel, request)?;

        if action == "status" {
            let form: StatusForm = normalize::from_form(&request.body)?;
            let sid = form.message_sid.unwrap();
            let provider_status = form.message_status.unwrap();

            let Some(status) = Self::status_for(&provider_status) else {
                return Ok(ReceiveOutcome::new(responses::request_ignored(&format!(
                    "unknown message status: {provider_status}"
                ))));
            };

            let mut update = ctx
                .backend
                .new_status_update_by_external_id(channel, &sid, status);
            if status == MsgStatus::Failed {
                if let Some(code) = &form.error_code {
                    update = update.with_error(code, "provider reported failure");
                }
            }
            ctx.backend
                .write_status_update(update.clone())
                .await
                .map_err(|e| RequestError::internal(e.to_string()))?;

            return Ok(ReceiveOutcome::with_events(
                responses::raw(200, responses::CONTENT_TYPE_XML, EMPTY_TWIML),
                vec![ReceivedEvent::Status(update)],
            ));
        }

        let form: ReceiveForm = normalize::from_form(&request.body)?;
        let sid = form.message_sid.unwrap();
        let from = form.from.unwrap();

        let country = form
            .from_country
            .unwrap_or_else(|| channel.country.clone());
        let urn = Urn::from_phone(&from, &country)
            .map_err(|e| RequestError::bad_request(e.to_string()))?;
        normalize::require_scheme(channel, &urn)?;

        let text = normalize::decode_possible_base64(form.body.as_deref().unwrap_or_default());
        let mut msg = ctx
            .backend
            .new_incoming_msg(channel, urn, &text)
            .with_external_id(&sid);

        let num_media: usize = form
            .num_media
            .as_deref()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let params = request.form_params()?;
        for i in 0..num_media {
            let key = format!("MediaUrl{i}");
            if let Some((_, url)) = params.iter().find(|(k, _)| *k == key) {
                msg = msg.with_attachment(url);
            }
        }

        ctx.backend
            .write_msg(msg.clone())
            .await
            .map_err(|e| RequestError::internal(e.to_string()))?;

        Ok(ReceiveOutcome::with_events(
            responses::raw(200, responses::CONTENT_TYPE_XML, EMPTY_TWIML),
            vec![ReceivedEvent::Msg(msg)],
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
        let account_sid = channel
            .config_str(CONFIG_ACCOUNT_SID)
            .ok_or_else(|| SendError::ChannelConfig("missing account_sid".into()))?;
        let auth_token = channel
            .config_str(config_keys::AUTH_TOKEN)
            .ok_or_else(|| SendError::ChannelConfig("missing auth_token".into()))?;

        let base = channel
            .config_str(config_keys::BASE_URL)
            .unwrap_or(DEFAULT_API_URL);
        let url = format!("{base}/2010-04-01/Accounts/{account_sid}/Messages.json");

        let status_callback = format!(
            "{}/c/t/{}/status",
            ctx.config.domain.trim_end_matches('/'),
            channel.uuid
        );

        let parts = normalize::split_msg_by_channel(channel, &msg.text, DEFAULT_MAX_LENGTH);
        let last = parts.len().saturating_sub(1);
        for (i, part) in parts.iter().enumerate() {
            let mut form: Vec<(&str, &str)> = vec![
                ("To", msg.urn.path()),
                ("From", &channel.address),
                ("Body", part),
                ("StatusCallback", &status_callback),
            ];

            // attachments ride on the final part
            let media: Vec<&str> = if i == last {
                msg.attachments
                    .iter()
                    .map(|a| normalize::split_attachment(a).1)
                    .collect()
            } else {
                Vec::new()
            };
            for url in &media {
                form.push(("MediaUrl", url));
            }

            let response = httpx::send_traced(
                &ctx.http,
                ctx.http
                    .post(&url)
                    .basic_auth(account_sid, Some(auth_token))
                    .form(&form),
                log,
            )
            .await?;

            if response.status >= 500 {
                return Err(SendError::ConnectionFailed);
            }
            if !(200..300).contains(&response.status) {
                // structured rejections are permanent, e.g. stopped contacts
                if let Ok(parsed) = response.json::<SendResponse>() {
                    if let Some(code) = parsed.code {
                        let description = parsed.message.unwrap_or_else(|| {
                            if code == STOPPED_CONTACT_CODE {
                                "contact has opted out".to_string()
                            } else {
                                "provider rejected message".to_string()
                            }
                        });
                        return Err(SendError::failed_with_reason(
                            &code.to_string(),
                            &description,
                        ));
                    }
                }
                return Err(SendError::ResponseStatus(response.status));
            }

            let parsed: SendResponse = response.json()?;
            let sid = parsed.sid.ok_or(SendError::ValueMissing("id"))?;
            result.add_external_id(&sid);
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
