//! Channel logs: the structured record of one provider interaction.
//!
//! A log is created at the start of each webhook or send call and finalized
//! at return. Redaction of configured secrets happens when a trace or error
//! is inserted, so the in-memory log never holds secrets. Persistence is
//! asynchronous and batched (see `carrier-backend`).

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChannelError;

const REDACTION_MASK: &str = "**********";

/// Request bodies are captured up to this many bytes.
pub const MAX_REQUEST_BODY_BYTES: usize = 2_048;
/// Response bodies are captured up to this many bytes.
pub const MAX_RESPONSE_BODY_BYTES: usize = 50_000;

/// What kind of interaction a log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Unknown,
    MsgReceive,
    MsgStatus,
    MsgSend,
    WebhookVerify,
    TokenRefresh,
    AttachmentFetch,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::Unknown => "unknown",
            LogType::MsgReceive => "msg_receive",
            LogType::MsgStatus => "msg_status",
            LogType::MsgSend => "msg_send",
            LogType::WebhookVerify => "webhook_verify",
            LogType::TokenRefresh => "token_refresh",
            LogType::AttachmentFetch => "attachment_fetch",
        }
    }
}

/// Masks configured secrets in logged strings.
///
/// Matching is plain substring, longest value first so that overlapping
/// secrets redact fully.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    values: Vec<String>,
}

impl Redactor {
    pub fn new(mut values: Vec<String>) -> Self {
        values.retain(|v| !v.is_empty());
        values.sort_by_key(|v| std::cmp::Reverse(v.len()));
        values.dedup();
        Self { values }
    }

    pub fn mask(&self, s: &str) -> String {
        let mut out = s.to_string();
        for value in &self.values {
            out = out.replace(value.as_str(), REDACTION_MASK);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One HTTP exchange captured on a channel log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTrace {
    pub method: String,
    pub url: String,
    pub request_headers: Vec<(String, String)>,
    pub request_body: String,
    /// 0 when no response was received (connection failure).
    pub response_status: u16,
    pub response_headers: Vec<(String, String)>,
    pub response_body: String,
    pub elapsed_ms: u64,
}

impl HttpTrace {
    fn redact(mut self, redactor: &Redactor) -> Self {
        self.url = redactor.mask(&self.url);
        self.request_body = redactor.mask(&truncate(&self.request_body, MAX_REQUEST_BODY_BYTES));
        self.response_body =
            redactor.mask(&truncate(&self.response_body, MAX_RESPONSE_BODY_BYTES));
        for (_, v) in self
            .request_headers
            .iter_mut()
            .chain(self.response_headers.iter_mut())
        {
            *v = redactor.mask(v);
        }
        self
    }
}

/// Truncate to a byte budget without severing a code point.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// The structured record of one webhook or send interaction.
#[derive(Debug)]
pub struct ChannelLog {
    uuid: Uuid,
    log_type: LogType,
    channel_uuid: Option<Uuid>,
    redactor: Redactor,
    http_traces: Vec<HttpTrace>,
    errors: Vec<ChannelError>,
    created_on: DateTime<Utc>,
    started: Instant,
    elapsed: Option<Duration>,
    recorded_request: Option<HttpTrace>,
}

impl ChannelLog {
    pub fn new(log_type: LogType, redact_values: Vec<String>) -> Self {
        Self {
            // v7 so the log store's keys are time-ordered
            uuid: Uuid::now_v7(),
            log_type,
            channel_uuid: None,
            redactor: Redactor::new(redact_values),
            http_traces: Vec::new(),
            errors: Vec::new(),
            created_on: Utc::now(),
            started: Instant::now(),
            elapsed: None,
            recorded_request: None,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn log_type(&self) -> LogType {
        self.log_type
    }

    pub fn channel_uuid(&self) -> Option<Uuid> {
        self.channel_uuid
    }

    pub fn set_channel(&mut self, channel_uuid: Uuid) {
        self.channel_uuid = Some(channel_uuid);
    }

    /// Upgrade the log type. Only `unknown` may be replaced; a concrete type
    /// is never downgraded or switched.
    pub fn set_type(&mut self, log_type: LogType) {
        if self.log_type == LogType::Unknown {
            self.log_type = log_type;
        }
    }

    /// Attach the raw incoming request; it becomes the first trace at
    /// `end()`.
    pub fn attach_recorder(&mut self, request: HttpTrace) {
        self.recorded_request = Some(request.redact(&self.redactor));
    }

    /// Record an HTTP exchange, applying redaction and body truncation.
    pub fn http(&mut self, trace: HttpTrace) {
        self.http_traces.push(trace.redact(&self.redactor));
    }

    /// Record a typed error; the message is redacted.
    pub fn error(&mut self, mut err: ChannelError) {
        err.message = self.redactor.mask(&err.message);
        self.errors.push(err);
    }

    pub fn http_traces(&self) -> &[HttpTrace] {
        &self.http_traces
    }

    pub fn errors(&self) -> &[ChannelError] {
        &self.errors
    }

    pub fn created_on(&self) -> DateTime<Utc> {
        self.created_on
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.started.elapsed())
    }

    /// Whether any error was recorded or any trace has a non-2xx/3xx status.
    pub fn is_error(&self) -> bool {
        !self.errors.is_empty()
            || self
                .http_traces
                .iter()
                .any(|t| t.response_status < 200 || t.response_status > 399)
    }

    /// Finalize the log: fixes elapsed time and prepends the recorded
    /// incoming request, if one was attached.
    pub fn end(&mut self) {
        if self.elapsed.is_none() {
            self.elapsed = Some(self.started.elapsed());
        }
        if let Some(req) = self.recorded_request.take() {
            self.http_traces.insert(0, req);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(url: &str, status: u16, req_body: &str, resp_body: &str) -> HttpTrace {
        HttpTrace {
            method: "POST".to_string(),
            url: url.to_string(),
            request_headers: vec![("Authorization".to_string(), "Bearer sesame".to_string())],
            request_body: req_body.to_string(),
            response_status: status,
            response_headers: vec![],
            response_body: resp_body.to_string(),
            elapsed_ms: 12,
        }
    }

    #[test]
    fn redactor_masks_longest_first() {
        let r = Redactor::new(vec!["sesame".to_string(), "sesame-street".to_string()]);
        assert_eq!(r.mask("token=sesame-street"), "token=**********");
        assert_eq!(r.mask("token=sesame"), "token=**********");
        assert_eq!(r.mask("nothing here"), "nothing here");
    }

    #[test]
    fn traces_are_redacted_at_insertion() {
        let mut log = ChannelLog::new(LogType::MsgSend, vec!["sesame".to_string()]);
        log.http(trace(
            "https://api.example.com/send?token=sesame",
            200,
            r#"{"auth":"sesame"}"#,
            "sesame ok",
        ));

        let t = &log.http_traces()[0];
        assert!(!t.url.contains("sesame"));
        assert!(!t.request_body.contains("sesame"));
        assert!(!t.response_body.contains("sesame"));
        assert!(!t.request_headers[0].1.contains("sesame"));
    }

    #[test]
    fn errors_are_redacted() {
        let mut log = ChannelLog::new(LogType::MsgSend, vec!["hunter2".to_string()]);
        log.error(ChannelError::new("response_content", "bad token hunter2"));
        assert_eq!(log.errors()[0].message, "bad token **********");
    }

    #[test]
    fn type_upgrade_only_from_unknown() {
        let mut log = ChannelLog::new(LogType::Unknown, vec![]);
        log.set_type(LogType::MsgReceive);
        assert_eq!(log.log_type(), LogType::MsgReceive);
        log.set_type(LogType::MsgStatus);
        assert_eq!(log.log_type(), LogType::MsgReceive);
    }

    #[test]
    fn end_prepends_recorded_request() {
        let mut log = ChannelLog::new(LogType::MsgReceive, vec![]);
        log.attach_recorder(trace("https://courier.example.com/c/bw/x/receive", 200, "in", ""));
        log.http(trace("https://provider.example.com/media", 200, "", "bytes"));
        log.end();

        assert_eq!(log.http_traces().len(), 2);
        assert!(log.http_traces()[0].url.contains("courier.example.com"));
    }

    #[test]
    fn error_status_detection() {
        let mut log = ChannelLog::new(LogType::MsgSend, vec![]);
        log.http(trace("https://api.example.com", 302, "", ""));
        assert!(!log.is_error());
        log.http(trace("https://api.example.com", 500, "", ""));
        assert!(log.is_error());
    }

    #[test]
    fn body_truncation_respects_char_boundaries() {
        let body = "é".repeat(2_000); // 4000 bytes
        let mut log = ChannelLog::new(LogType::MsgReceive, vec![]);
        log.http(trace("https://api.example.com", 200, &body, ""));
        let captured = &log.http_traces()[0].request_body;
        assert!(captured.len() <= MAX_REQUEST_BODY_BYTES + 3);
        assert!(captured.ends_with("..."));
    }

    #[test]
    fn log_uuids_are_time_ordered() {
        let a = ChannelLog::new(LogType::MsgReceive, vec![]);
        let b = ChannelLog::new(LogType::MsgReceive, vec![]);
        assert!(a.uuid() < b.uuid());
    }
}
