//! The HTTP front end.
//!
//! Routes `GET|POST /c/<type>/<uuid>/<action>` to the matching handler,
//! resolving the channel from the backend and wrapping every call in a
//! channel log that is finalized and persisted asynchronously. Handler
//! responses are opaque: whatever bytes the adapter produced go back to the
//! provider verbatim.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Json;
use axum::Router;
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use carrier_backend::BackendError;
use carrier_common::clog::HttpTrace;
use carrier_common::{ChannelError, ChannelLog, LogType};

use crate::handler::{HandlerContext, WebhookRequest, WebhookResponse};
use crate::registry::HandlerRegistry;
use crate::responses;

/// State shared across front-end requests: the read-only registry and the
/// handler context. Nothing here is mutable after startup.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<HandlerRegistry>,
    pub ctx: Arc<HandlerContext>,
}

pub fn create_router(state: AppState) -> Router {
    let request_timeout =
        std::time::Duration::from_secs(state.ctx.config.http.request_timeout_secs);
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/c/{channel_type}/{channel_uuid}/{action}", any(webhook_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

async fn index_handler() -> impl IntoResponse {
    Json(json!({
        "service": "carrier",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "UP"}))
}

async fn webhook_handler(
    State(state): State<AppState>,
    Path((type_code, uuid_str, action)): Path<(String, String, String)>,
    req: Request,
) -> Response {
    let Some(handler) = state.registry.get_by_url_code(&type_code) else {
        return error_response(400, &format!("no such channel type: {type_code}"));
    };

    let Ok(channel_uuid) = Uuid::parse_str(&uuid_str) else {
        return error_response(400, "channel not found");
    };

    let channel = match state
        .ctx
        .backend
        .channel(&handler.channel_type(), channel_uuid)
        .await
    {
        Ok(channel) => channel,
        Err(BackendError::ChannelNotFound) | Err(BackendError::ChannelTypeMismatch) => {
            return error_response(400, "channel not found");
        }
        Err(e) => {
            warn!(channel_uuid = %channel_uuid, error = %e, "Channel lookup failed");
            return error_response(500, "unable to resolve channel");
        }
    };

    let method = req.method().clone();
    let Some(route) = handler
        .routes()
        .into_iter()
        .find(|r| r.method == method && r.action == action)
    else {
        return error_response(404, &format!("no route for action: {action}"));
    };

    let (parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, state.ctx.config.http.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => return error_response(400, "unable to read request body"),
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!(
        "{}{}",
        state.ctx.config.domain.trim_end_matches('/'),
        path_and_query
    );

    let request = WebhookRequest {
        method: method.clone(),
        url: url.clone(),
        headers: parts.headers.clone(),
        body: body_bytes.clone(),
    };

    let mut redact_values = handler.redact_values(&channel);
    redact_values.extend(state.ctx.config.secrets.iter().cloned());

    let mut log = ChannelLog::new(LogType::Unknown, redact_values);
    log.set_channel(channel.uuid);
    log.set_type(route.log_type);

    let started = std::time::Instant::now();
    let outcome = handler
        .receive(&state.ctx, &channel, &action, &request, &mut log)
        .await;

    let response = match outcome {
        Ok(outcome) => {
            info!(
                channel_uuid = %channel.uuid,
                channel_type = %channel.channel_type,
                action = %action,
                events = outcome.events.len(),
                log_uuid = %log.uuid(),
                "Webhook handled"
            );
            outcome.response
        }
        Err(err) => {
            log.error(ChannelError::new("request", &err.message));
            info!(
                channel_uuid = %channel.uuid,
                channel_type = %channel.channel_type,
                action = %action,
                status = err.status,
                error = %err.message,
                log_uuid = %log.uuid(),
                "Webhook rejected"
            );
            responses::request_error(err.status, &err.message)
        }
    };

    // the raw exchange becomes the first trace when the log is finalized
    log.attach_recorder(HttpTrace {
        method: method.to_string(),
        url,
        request_headers: parts
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("<binary>").to_string()))
            .collect(),
        request_body: String::from_utf8_lossy(&body_bytes).into_owned(),
        response_status: response.status,
        response_headers: vec![(
            header::CONTENT_TYPE.to_string(),
            response.content_type.to_string(),
        )],
        response_body: response.body.clone(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    });
    log.end();

    // persistence never blocks the response
    let backend = state.ctx.backend.clone();
    tokio::spawn(async move {
        if let Err(e) = backend.write_channel_log(log).await {
            warn!(error = %e, "Channel log write failed");
        }
    });

    build_response(response)
}

fn error_response(status: u16, message: &str) -> Response {
    build_response(responses::request_error(status, message))
}

fn build_response(resp: WebhookResponse) -> Response {
    Response::builder()
        .status(StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header(header::CONTENT_TYPE, resp.content_type)
        .body(Body::from(resp.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
