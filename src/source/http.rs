//! HTTP ingress source.
//!
//! # Endpoints
//!
//! - `POST /hooks/{channel}` - dispatch the raw request body as a message on
//!   `channel`; answers `202 Accepted` with a short report, or `502 Bad
//!   Gateway` when the downstream action failed
//! - `GET /health` - liveness probe, never authenticated
//!
//! When an API key is configured, `/hooks` requires
//! `Authorization: Bearer <api_key>`.

use super::SourceError;
use crate::dispatcher::Dispatcher;
use crate::event::InboundMessage;
use crate::shutdown::ShutdownSignal;
use axum::{
    body::Bytes,
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Ingress counters
struct Metrics {
    received: AtomicU64,
    start_time: Instant,
}

/// Shared state of the ingress handlers.
#[derive(Clone)]
pub struct IngressState {
    dispatcher: Arc<Dispatcher>,
    api_key: Option<String>,
    metrics: Arc<Metrics>,
}

impl IngressState {
    pub fn new(dispatcher: Arc<Dispatcher>, api_key: Option<String>) -> Self {
        Self {
            dispatcher,
            api_key: api_key.filter(|key| !key.is_empty()),
            metrics: Arc::new(Metrics {
                received: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    /// Whether `/hooks` requires a bearer token. An empty key counts as none.
    pub fn requires_auth(&self) -> bool {
        self.api_key.is_some()
    }

    /// Messages received since startup
    pub fn received(&self) -> u64 {
        self.metrics.received.load(Ordering::Relaxed)
    }
}

/// Build the ingress router.
pub fn ingress_router(state: IngressState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/hooks/:channel", post(receive_hook))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

/// Serve the ingress router until shutdown.
pub async fn serve(
    state: IngressState,
    port: u16,
    shutdown: ShutdownSignal,
) -> Result<(), SourceError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| SourceError::Bind {
            addr: addr.to_string(),
            source,
        })?;

    info!(addr = %addr, "HTTP ingress listening");

    axum::serve(listener, ingress_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP ingress stopped");
    Ok(())
}

async fn auth_middleware(
    State(state): State<IngressState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let Some(api_key) = state.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match token {
        Some(token) if token == api_key => Ok(next.run(req).await),
        Some(_) => {
            warn!("Invalid API key attempt");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!("Missing or malformed Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn health_check(State(state): State<IngressState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "action": state.dispatcher.action_name(),
        "uptime_seconds": state.metrics.start_time.elapsed().as_secs(),
        "received": state.received(),
    }))
}

async fn receive_hook(
    State(state): State<IngressState>,
    Path(channel): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    state.metrics.received.fetch_add(1, Ordering::Relaxed);
    debug!(channel = %channel, bytes = body.len(), "Received hook");

    let message = InboundMessage::new(channel, body.to_vec());

    match state.dispatcher.dispatch(&message).await {
        Ok(report) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "accepted",
                "channel": report.channel,
                "eventType": report.event_type,
                "outcome": report.outcome.label(),
            })),
        ),
        Err(e) => {
            error!(channel = %message.channel, error = %e, "Hook dispatch failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "status": "failed",
                    "channel": message.channel,
                    "error": e.to_string(),
                })),
            )
        }
    }
}
