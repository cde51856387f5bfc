//! Outbound HTTP with channel-log tracing.
//!
//! Every provider request goes through `send_traced` so the exact request
//! and response (bounded, redacted) land on the channel log. Connection
//! failures, DNS errors and timeouts surface as `SendError::ConnectionFailed`
//! with a partial trace recorded.

use std::time::Instant;

use reqwest::{Client, RequestBuilder};
use tracing::debug;

use carrier_common::clog::HttpTrace;
use carrier_common::{ChannelLog, SendError};

use crate::USER_AGENT;

/// A completed provider response, body already read.
#[derive(Debug)]
pub struct TracedResponse {
    pub status: u16,
    pub body: String,
}

impl TracedResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, SendError> {
        serde_json::from_str(&self.body)
            .map_err(|e| SendError::ResponseUnparseable(e.to_string()))
    }

    /// Map 5xx to a connection failure and other non-2xx to a status error,
    /// the default interpretation for providers without structured error
    /// bodies.
    pub fn require_success(&self) -> Result<&Self, SendError> {
        if self.status >= 500 {
            return Err(SendError::ConnectionFailed);
        }
        if !(200..300).contains(&self.status) {
            return Err(SendError::ResponseStatus(self.status));
        }
        Ok(self)
    }
}

/// Execute a provider request on the shared client, recording a redacted
/// trace on the log.
pub async fn send_traced(
    client: &Client,
    builder: RequestBuilder,
    log: &mut ChannelLog,
) -> Result<TracedResponse, SendError> {
    let request = builder
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .build()
        .map_err(|e| SendError::ResponseUnparseable(format!("invalid request: {e}")))?;

    let method = request.method().to_string();
    let url = request.url().to_string();
    let request_headers: Vec<(String, String)> = request
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.to_string(),
                v.to_str().unwrap_or("<binary>").to_string(),
            )
        })
        .collect();
    let request_body = request
        .body()
        .and_then(|b| b.as_bytes())
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default();

    let started = Instant::now();
    let result = client.execute(request).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(response) => {
            let status = response.status().as_u16();
            let response_headers: Vec<(String, String)> = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.to_string(),
                        v.to_str().unwrap_or("<binary>").to_string(),
                    )
                })
                .collect();
            let body = response.text().await.unwrap_or_default();

            log.http(HttpTrace {
                method,
                url,
                request_headers,
                request_body,
                response_status: status,
                response_headers,
                response_body: body.clone(),
                elapsed_ms,
            });

            debug!(status, elapsed_ms, "Provider request completed");
            Ok(TracedResponse { status, body })
        }
        Err(e) => {
            log.http(HttpTrace {
                method,
                url,
                request_headers,
                request_body,
                response_status: 0,
                response_headers: Vec::new(),
                response_body: String::new(),
                elapsed_ms,
            });

            debug!(error = %e, elapsed_ms, "Provider request failed");
            Err(SendError::ConnectionFailed)
        }
    }
}
