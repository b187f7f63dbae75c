use crate::core::SchedulerEvent;
use crate::error::StoreError;
use crate::store::RequestStore;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use playout_proto::protocol::{Command, PlayoutState};
use playout_proto::request::{MediaRequest, NewRequest};
use playout_proto::state::StateManager;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    store: Arc<dyn RequestStore>,
    event_tx: mpsc::Sender<SchedulerEvent>,
}

#[derive(Serialize)]
struct ApiError {
    error: String,
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiError {
            error: message.into(),
        }),
    )
        .into_response()
}

pub fn router(
    state_manager: Arc<StateManager>,
    store: Arc<dyn RequestStore>,
    event_tx: mpsc::Sender<SchedulerEvent>,
) -> Router {
    let app_state = HttpState {
        state_manager,
        store,
        event_tx,
    };

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/queue", get(get_queue))
        .route("/api/requests", get(list_requests).post(submit_request))
        .route("/api/autoplay/:enabled", post(set_auto_play))
        .route("/api/skip", post(skip))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

pub fn start_server(listener: TcpListener, app: Router) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match listener.local_addr() {
            Ok(addr) => info!("HTTP API server listening on http://{}", addr),
            Err(e) => warn!("HTTP API server address unknown: {}", e),
        }

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_state(State(state): State<HttpState>) -> Json<PlayoutState> {
    Json(state.state_manager.get_state().await)
}

/// Pending requests in playback order, as last projected.
async fn get_queue(State(state): State<HttpState>) -> Json<Vec<MediaRequest>> {
    Json(state.state_manager.get_state().await.queue)
}

async fn list_requests(State(state): State<HttpState>) -> Response {
    match state.store.list_all().await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            error!("HTTP API: history read failed: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn submit_request(
    State(state): State<HttpState>,
    Json(request): Json<NewRequest>,
) -> Response {
    info!(
        "HTTP API: {} request from {}",
        request.kind.label(),
        request.requester_id
    );
    match state.store.insert(request).await {
        Ok(row) => (StatusCode::CREATED, Json(row)).into_response(),
        Err(StoreError::Invalid(reason)) => api_error(StatusCode::BAD_REQUEST, reason),
        Err(e) => {
            error!("HTTP API: insert failed: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn set_auto_play(
    State(state): State<HttpState>,
    Path(enabled): Path<bool>,
) -> StatusCode {
    info!("HTTP API: Set auto-play {}", enabled);
    send(&state, Command::SetAutoPlay { enabled }).await
}

async fn skip(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Skip");
    send(&state, Command::Skip).await
}

async fn send(state: &HttpState, cmd: Command) -> StatusCode {
    if state
        .event_tx
        .send(SchedulerEvent::Command(cmd))
        .await
        .is_err()
    {
        error!("Failed to send command to scheduler");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::ACCEPTED
}
