//! Shared normalization helpers used by every handler.
//!
//! These are pure functions with contracts the test suite exercises
//! directly; handlers must not reimplement them.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use validator::Validate;

use carrier_common::types::config_keys;
use carrier_common::{Channel, MsgOut, RequestError};

/// Minimum length before a body is even considered base64-encoded.
const MIN_BASE64_LEN: usize = 16;

/// Split `text` into parts of at most `max_bytes` bytes, preferring to break
/// at whitespace. Never severs a multi-byte code point. Empty input yields
/// an empty list; joining the parts restores the text up to whitespace
/// trimmed at part boundaries.
pub fn split_msg(text: &str, max_bytes: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.len() <= max_bytes {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        if rest.len() <= max_bytes {
            parts.push(rest.to_string());
            break;
        }

        // widest prefix that ends on a char boundary
        let mut hard = max_bytes;
        while hard > 0 && !rest.is_char_boundary(hard) {
            hard -= 1;
        }

        // prefer the whitespace boundary nearest the limit
        let cut = if rest[hard..].starts_with(char::is_whitespace) {
            hard
        } else {
            match rest[..hard].rfind(char::is_whitespace) {
                Some(0) | None => hard,
                Some(ws) => ws,
            }
        };

        let part = rest[..cut].trim_end();
        if !part.is_empty() {
            parts.push(part.to_string());
        }
        rest = rest[cut..].trim_start();
    }
    parts
}

/// `split_msg` with the channel's `max_length` config taking precedence over
/// the handler's default.
pub fn split_msg_by_channel(channel: &Channel, text: &str, default_max: usize) -> Vec<String> {
    let max = channel
        .config_int(config_keys::MAX_LENGTH)
        .and_then(|v| usize::try_from(v).ok())
        .filter(|v| *v > 0)
        .unwrap_or(default_max);
    split_msg(text, max)
}

/// Message text plus any attachments the provider cannot carry natively, as
/// URLs on their own lines.
pub fn text_and_attachments(msg: &MsgOut) -> String {
    let mut out = msg.text.clone();
    for attachment in &msg.attachments {
        let (_, url) = split_attachment(attachment);
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(url);
    }
    out
}

/// Reject a sender URN whose scheme the channel does not accept.
pub fn require_scheme(channel: &Channel, urn: &carrier_common::Urn) -> Result<(), RequestError> {
    if channel.supports_scheme(urn.scheme()) {
        Ok(())
    } else {
        Err(RequestError::bad_request(format!(
            "URN scheme '{}' not supported by channel",
            urn.scheme()
        )))
    }
}

/// Split a typed attachment `"mime/subtype:url"` into `(mime, url)`. With no
/// colon the whole value is the URL.
pub fn split_attachment(attachment: &str) -> (&str, &str) {
    match attachment.split_once(':') {
        Some((mime, url)) => (mime, url),
        None => ("", attachment),
    }
}

/// Decode a body that a provider double-encoded as base64, when plausible.
///
/// The decoded form is used only when it decodes cleanly to UTF-8 that is
/// more textlike than arbitrary bytes: no control characters beyond
/// newline/carriage-return/tab. Anything else returns the original.
pub fn decode_possible_base64(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() < MIN_BASE64_LEN || trimmed.len() % 4 != 0 {
        return text.to_string();
    }
    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
    {
        return text.to_string();
    }

    let Ok(bytes) = BASE64.decode(trimmed) else {
        return text.to_string();
    };
    match String::from_utf8(bytes) {
        Ok(decoded) if is_textlike(&decoded) => decoded,
        _ => text.to_string(),
    }
}

fn is_textlike(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
}

/// Decode a JSON request body into a payload struct and run its `required`
/// validations.
pub fn from_json<T>(body: &[u8]) -> Result<T, RequestError>
where
    T: DeserializeOwned + Validate,
{
    let value: T = serde_json::from_slice(body)
        .map_err(|_| RequestError::bad_request("unable to parse request JSON"))?;
    check_required(value)
}

/// Decode a urlencoded form body into a payload struct and run its
/// `required` validations.
pub fn from_form<T>(body: &[u8]) -> Result<T, RequestError>
where
    T: DeserializeOwned + Validate,
{
    let value: T = serde_urlencoded::from_bytes(body)
        .map_err(|_| RequestError::bad_request("unable to parse request form"))?;
    check_required(value)
}

fn check_required<T: Validate>(value: T) -> Result<T, RequestError> {
    match value.validate() {
        Ok(()) => Ok(value),
        Err(errors) => {
            let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            let (field, field_errors) = fields.remove(0);
            let tag = field_errors
                .first()
                .map(|e| e.code.as_ref())
                .unwrap_or("required");
            Err(RequestError::bad_request(format!(
                "validation for '{field}' failed on the '{tag}' tag"
            )))
        }
    }
}
