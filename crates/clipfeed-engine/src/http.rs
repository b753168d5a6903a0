use crate::feed::FeedEvent;
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use clipfeed_proto::protocol::{Command, FeedState};
use clipfeed_proto::state::StateManager;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<FeedEvent>,
}

#[derive(Debug, Serialize)]
pub struct ApiState {
    pub rev: u64,
    pub tracks: Vec<TrackInfo>,
    /// Position in play order.
    pub position: usize,
    pub current: Option<TrackInfo>,
    pub phase: String,
    pub playing: bool,
    pub autoplay: bool,
    pub loading: bool,
    pub load_error: Option<String>,
    pub recording: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackInfo {
    pub name: String,
    pub url: String,
    pub liked: bool,
}

impl From<&FeedState> for ApiState {
    fn from(state: &FeedState) -> Self {
        let info = |t: &clipfeed_proto::protocol::Track| TrackInfo {
            name: t.display_name.clone(),
            url: t.url.clone(),
            liked: t.liked,
        };
        let seq = &state.sequencer;
        Self {
            rev: state.rev,
            tracks: seq.play_order().iter().filter_map(|&i| seq.tracks().get(i)).map(info).collect(),
            position: seq.current_index(),
            current: state.current_track().map(info),
            phase: state.phase.label().to_string(),
            playing: seq.is_playing(),
            autoplay: seq.autoplay(),
            loading: state.loading,
            load_error: state.load_error.clone(),
            recording: state.recording,
        }
    }
}

pub fn router(state_manager: Arc<StateManager>, event_tx: mpsc::Sender<FeedEvent>) -> Router {
    let app_state = HttpState { state_manager, event_tx };

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/next", get(next).post(next))
        .route("/api/prev", get(prev).post(prev))
        .route("/api/toggle", get(toggle).post(toggle))
        .route("/api/like", get(like).post(like))
        .route("/api/autoplay", get(autoplay).post(autoplay))
        .route("/api/refresh", get(refresh).post(refresh))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<FeedEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_state(State(state): State<HttpState>) -> Json<ApiState> {
    let feed_state = state.state_manager.get_state().await;
    Json(ApiState::from(&feed_state))
}

async fn dispatch(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.event_tx.send(FeedEvent::Command(cmd)).await.is_err() {
        error!("Failed to send {:?} command", cmd);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn next(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Next).await
}

async fn prev(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Previous).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::PlayPause).await
}

async fn like(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Like).await
}

async fn autoplay(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::ToggleAutoplay).await
}

async fn refresh(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Refresh).await
}
