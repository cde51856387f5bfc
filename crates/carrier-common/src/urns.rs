//! Contact URNs: `scheme:path[#display]`.
//!
//! The normalization layer understands the schemes used by the provider
//! fleet; `tel` paths are normalized to E.164 using the channel country as
//! the default region.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TEL: &str = "tel";
pub const WHATSAPP: &str = "whatsapp";
pub const FACEBOOK: &str = "facebook";
pub const FACEBOOK_REF: &str = "facebook:ref";
pub const DISCORD: &str = "discord";
pub const SLACK: &str = "slack";
pub const EXTERNAL: &str = "ext";
pub const VIBER: &str = "viber";
pub const LINE: &str = "line";
pub const TELEGRAM: &str = "telegram";
pub const INSTAGRAM: &str = "instagram";
pub const WEBCHAT: &str = "webchat";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrnError {
    #[error("invalid URN: {0}")]
    Invalid(String),

    #[error("invalid phone number: {0}")]
    InvalidPhone(String),
}

/// A uniform contact identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Urn {
    scheme: String,
    path: String,
    display: Option<String>,
}

impl Urn {
    pub fn new(scheme: &str, path: &str) -> Result<Self, UrnError> {
        if scheme.is_empty() || path.is_empty() {
            return Err(UrnError::Invalid(format!("{scheme}:{path}")));
        }
        Ok(Self {
            scheme: scheme.to_string(),
            path: path.to_string(),
            display: None,
        })
    }

    pub fn with_display(mut self, display: &str) -> Self {
        if !display.is_empty() {
            self.display = Some(display.to_string());
        }
        self
    }

    /// Parse `scheme:path[#display]`.
    pub fn parse(s: &str) -> Result<Self, UrnError> {
        let (rest, display) = match s.split_once('#') {
            Some((r, d)) => (r, Some(d)),
            None => (s, None),
        };
        // facebook:ref URNs carry a colon inside the scheme, so split on the
        // last colon of a known composite prefix first.
        let (scheme, path) = if let Some(path) = rest.strip_prefix("facebook:ref:") {
            (FACEBOOK_REF, path)
        } else {
            rest.split_once(':')
                .ok_or_else(|| UrnError::Invalid(s.to_string()))?
        };
        let mut urn = Urn::new(scheme, path)?;
        if let Some(d) = display {
            urn = urn.with_display(d);
        }
        Ok(urn)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn display(&self) -> Option<&str> {
        self.display.as_deref()
    }

    /// `scheme:path` without the display fragment, for equality checks and
    /// backend keys.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.scheme, self.path)
    }

    /// Build a `tel:` URN from a raw phone string, normalizing to E.164 with
    /// `country` (ISO-3166 alpha-2) as the default region.
    pub fn from_phone(raw: &str, country: &str) -> Result<Self, UrnError> {
        let path = normalize_phone(raw, country)?;
        Urn::new(TEL, &path)
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display {
            Some(d) => write!(f, "{}:{}#{}", self.scheme, self.path, d),
            None => write!(f, "{}:{}", self.scheme, self.path),
        }
    }
}

impl TryFrom<String> for Urn {
    type Error = UrnError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Urn::parse(&s)
    }
}

impl From<Urn> for String {
    fn from(u: Urn) -> String {
        u.to_string()
    }
}

/// Country calling codes for the regions the provider fleet operates in.
fn calling_code(country: &str) -> Option<&'static str> {
    Some(match country {
        "US" | "CA" => "1",
        "GB" => "44",
        "DE" => "49",
        "FR" => "33",
        "ES" => "34",
        "IT" => "39",
        "BR" => "55",
        "MX" => "52",
        "CO" => "57",
        "AR" => "54",
        "EC" => "593",
        "NG" => "234",
        "ZA" => "27",
        "KE" => "254",
        "UG" => "256",
        "RW" => "250",
        "IN" => "91",
        "PK" => "92",
        "BD" => "880",
        "ID" => "62",
        "PH" => "63",
        "AU" => "61",
        "NZ" => "64",
        _ => return None,
    })
}

/// Normalize a raw phone string to E.164 (`+` followed by 5-15 digits).
///
/// Accepts punctuation and whitespace, `00` and `+` international prefixes,
/// and national significant numbers when a country is given. Fails when the
/// result is not a possible number.
fn normalize_phone(raw: &str, country: &str) -> Result<String, UrnError> {
    let trimmed = raw.trim();
    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(UrnError::InvalidPhone(raw.to_string()));
    }

    let normalized = if has_plus {
        digits
    } else if let Some(rest) = digits.strip_prefix("00") {
        rest.to_string()
    } else {
        match calling_code(country) {
            // Already in international form for this region.
            Some(code) if digits.starts_with(code) && digits.len() > 9 => digits,
            Some(code) => {
                // Strip a national trunk zero before prefixing.
                let national = digits.strip_prefix('0').unwrap_or(&digits);
                format!("{code}{national}")
            }
            None => return Err(UrnError::InvalidPhone(raw.to_string())),
        }
    };

    if normalized.len() < 5 || normalized.len() > 15 {
        return Err(UrnError::InvalidPhone(raw.to_string()));
    }
    Ok(format!("+{normalized}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let urn = Urn::parse("tel:+12065551234").unwrap();
        assert_eq!(urn.scheme(), "tel");
        assert_eq!(urn.path(), "+12065551234");
        assert_eq!(urn.to_string(), "tel:+12065551234");

        let urn = Urn::parse("facebook:12345#Bob").unwrap();
        assert_eq!(urn.scheme(), "facebook");
        assert_eq!(urn.display(), Some("Bob"));
        assert_eq!(urn.identity(), "facebook:12345");

        let urn = Urn::parse("facebook:ref:signup").unwrap();
        assert_eq!(urn.scheme(), "facebook:ref");
        assert_eq!(urn.path(), "signup");

        assert!(Urn::parse("no-colon").is_err());
        assert!(Urn::parse("tel:").is_err());
    }

    #[test]
    fn phone_already_e164() {
        let urn = Urn::from_phone("+12065551234", "US").unwrap();
        assert_eq!(urn.to_string(), "tel:+12065551234");

        // country not needed when the number carries its own prefix
        let urn = Urn::from_phone("+12065551234", "").unwrap();
        assert_eq!(urn.to_string(), "tel:+12065551234");
    }

    #[test]
    fn phone_with_punctuation() {
        let urn = Urn::from_phone("(206) 555-1234", "US").unwrap();
        assert_eq!(urn.to_string(), "tel:+12065551234");
    }

    #[test]
    fn phone_national_with_trunk_zero() {
        let urn = Urn::from_phone("07362 887551", "GB").unwrap();
        assert_eq!(urn.to_string(), "tel:+447362887551");
    }

    #[test]
    fn phone_double_zero_prefix() {
        let urn = Urn::from_phone("0012065551234", "GB").unwrap();
        assert_eq!(urn.to_string(), "tel:+12065551234");
    }

    #[test]
    fn phone_invalid() {
        assert!(matches!(
            Urn::from_phone("not a phone", "US"),
            Err(UrnError::InvalidPhone(_))
        ));
        // no country and no international prefix
        assert!(Urn::from_phone("2065551234", "").is_err());
        // too short / too long to be possible
        assert!(Urn::from_phone("+123", "").is_err());
        assert!(Urn::from_phone("+1234567890123456", "").is_err());
    }
}
