//! HTTP entry point for all tenant webhook URLs.
//!
//! Every request is read fully, matched to a tenant by host and path,
//! signature-checked, and dispatched by opcode. Event dispatches are
//! acknowledged immediately and handed to the scheduler; the admission
//! decision itself never waits on I/O.

pub mod payload;
pub mod protocol;

use std::sync::{Arc, RwLock};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::qos::QoSManager;
use crate::scheduler::{message_priority, Scheduler};
use crate::tenant::TenantTable;

use protocol::{
    dispatch_ack, heartbeat_ack, sign_challenge, verify_signature, ChallengeData,
    WebhookPacket, OP_CALLBACK_VALIDATION, OP_EVENT_DISPATCH, OP_HEARTBEAT,
    OP_LEGACY_CHALLENGE,
};

/// Upper bound on accepted request bodies.
const MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

/// Shared state behind the webhook handler.
pub struct AppState {
    /// Tenant table snapshot, swapped atomically on reload
    pub tenants: RwLock<Arc<TenantTable>>,
    /// Config snapshot, swapped atomically on reload
    pub config: RwLock<Arc<Config>>,
    pub scheduler: Arc<Scheduler>,
    pub qos: Arc<QoSManager>,
}

impl AppState {
    /// Swap in a new configuration and tenant table.
    pub fn apply_config(&self, config: Arc<Config>) {
        let table = Arc::new(TenantTable::from_config(&config.tenants));
        *self.tenants.write().unwrap() = table;
        *self.config.write().unwrap() = config;
    }
}

/// Build the webhook router. Every path belongs to the webhook handler;
/// tenancy is decided by host + path lookup, not by the route tree.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new().fallback(handle_webhook).with_state(state)
}

async fn handle_webhook(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let start = Instant::now();
    metrics::counter!("botrouterd.handler.requests").increment(1);

    let (parts, body) = request.into_parts();

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
        .unwrap_or_default();
    let path = parts.uri.path().to_string();

    let body = match axum::body::to_bytes(body, MAX_BODY_SIZE).await {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read body").into_response();
        }
    };

    let tenants = state.tenants.read().unwrap().clone();
    let Some(tenant) = tenants.lookup(&host, &path) else {
        warn!(host = %host, path = %path, "no tenant configured");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    };

    if !verify_signature(&parts.headers, &body, &tenant.secret) {
        debug!(host = %host, path = %path, "signature verification failed");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let packet: WebhookPacket = match serde_json::from_slice(&body) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(host = %host, path = %path, error = %e, "malformed webhook packet");
            return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
        }
    };

    match packet.op {
        OP_LEGACY_CHALLENGE | OP_CALLBACK_VALIDATION => {
            info!(host = %host, path = %path, op = packet.op, "handling challenge");
            handle_challenge(packet.d, &tenant.secret)
        }
        OP_EVENT_DISPATCH => {
            handle_dispatch(state, start, tenant, body, parts.headers).await
        }
        OP_HEARTBEAT => {
            debug!(host = %host, path = %path, "heartbeat");
            let seq = serde_json::from_value::<u32>(packet.d).unwrap_or(0);
            json_response(StatusCode::OK, heartbeat_ack(seq))
        }
        op => {
            warn!(host = %host, path = %path, op, "unknown opcode");
            StatusCode::OK.into_response()
        }
    }
}

/// Handle an event dispatch: admission, immediate ACK, async handoff.
async fn handle_dispatch(
    state: Arc<AppState>,
    start: Instant,
    tenant: Arc<crate::tenant::TenantRoute>,
    body: bytes::Bytes,
    headers: HeaderMap,
) -> Response {
    let config = state.config.read().unwrap().clone();
    let (user_id, message) = payload::extract(&body);

    debug!(
        route = %tenant.route,
        user_id = %user_id,
        bytes = body.len(),
        "event dispatch"
    );

    // Pre-admission priority: message factors only, no load or interval
    let priority = message_priority(&user_id, &message, &config.scheduler);

    if state.qos.should_throttle(&user_id, priority) {
        metrics::counter!("botrouterd.handler.throttled").increment(1);
        state.qos.update_metrics(start.elapsed(), false);
        return json_response(StatusCode::TOO_MANY_REQUESTS, dispatch_ack());
    }

    // ACK goes out now; the forward outcome is reported asynchronously by
    // the scheduler workers
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        if !scheduler.submit(body, headers, tenant) {
            warn!(user_id = %user_id, "submission rejected, queue full");
        }
    });

    json_response(StatusCode::OK, dispatch_ack())
}

/// Handle ops 1 and 13: sign the challenge with the tenant key.
fn handle_challenge(data: serde_json::Value, secret: &str) -> Response {
    let challenge: ChallengeData = match serde_json::from_value(data) {
        Ok(challenge) => challenge,
        Err(e) => {
            warn!(error = %e, "malformed challenge data");
            return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
        }
    };

    match sign_challenge(&challenge, secret) {
        Some(response) => match serde_json::to_vec(&response) {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(e) => {
                error!(error = %e, "failed to encode challenge response");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        },
        None => {
            // Lookup succeeded but the tenant cannot sign: invariant violation
            error!("challenge signing failed, tenant has no usable secret");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        Body::from(body),
    )
        .into_response()
}
