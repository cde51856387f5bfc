//! Webhook signature validation.
//!
//! Providers that sign their callbacks derive a canonical string from the
//! request URL and sorted form fields, HMAC it with the channel's auth
//! token, and send the result in a header. Verification here uses the
//! RustCrypto constant-time comparison; a truncated or altered signature is
//! never accepted early.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use carrier_common::RequestError;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

const INVALID_SIGNATURE: &str = "invalid request signature";

/// Canonical string for URL-plus-form signing: the full request URL followed
/// by every form field as `key` + `value`, sorted by key.
pub fn form_canonical_string(url: &str, form: &[(String, String)]) -> String {
    let mut fields: Vec<_> = form.iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    let mut canonical = String::from(url);
    for (key, value) in fields {
        canonical.push_str(key);
        canonical.push_str(value);
    }
    canonical
}

/// Validate a base64 HMAC-SHA1 signature over the URL-plus-form canonical
/// string (the Twilio callback scheme).
pub fn validate_url_form_signature(
    auth_token: &str,
    url: &str,
    form: &[(String, String)],
    signature_b64: &str,
) -> Result<(), RequestError> {
    let provided = BASE64
        .decode(signature_b64)
        .map_err(|_| RequestError::bad_request(INVALID_SIGNATURE))?;

    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes())
        .map_err(|_| RequestError::bad_request(INVALID_SIGNATURE))?;
    mac.update(form_canonical_string(url, form).as_bytes());

    // verify_slice is constant-time and rejects wrong-length input outright
    mac.verify_slice(&provided)
        .map_err(|_| RequestError::bad_request(INVALID_SIGNATURE))
}

/// Compute the base64 HMAC-SHA1 signature for the URL-plus-form scheme.
/// Used by tests building signed requests.
pub fn sign_url_form(auth_token: &str, url: &str, form: &[(String, String)]) -> String {
    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(form_canonical_string(url, form).as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Validate an `X-Hub-Signature-256` style header: `sha256=` followed by the
/// hex HMAC-SHA256 of the raw body under the app secret.
pub fn validate_hub_signature(
    app_secret: &str,
    body: &[u8],
    header: &str,
) -> Result<(), RequestError> {
    let hex_sig = header
        .strip_prefix("sha256=")
        .ok_or_else(|| RequestError::bad_request(INVALID_SIGNATURE))?;
    let provided =
        hex::decode(hex_sig).map_err(|_| RequestError::bad_request(INVALID_SIGNATURE))?;

    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
        .map_err(|_| RequestError::bad_request(INVALID_SIGNATURE))?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| RequestError::bad_request(INVALID_SIGNATURE))
}

/// Compute an `sha256=<hex>` hub signature header value.
pub fn sign_hub_body(app_secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
