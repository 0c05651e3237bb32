use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use frame_relay_common::config::StreamConfig;
use frame_relay_common::signal::StopSignal;
use frame_relay_common::slot::LatestFrame;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::stream::{StreamSession, MULTIPART_CONTENT_TYPE};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub slot: Arc<LatestFrame>,
    pub stop: StopSignal,
    pub stream: StreamConfig,
    pub viewers: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(slot: Arc<LatestFrame>, stop: StopSignal, stream: StreamConfig) -> Self {
        Self {
            slot,
            stop,
            stream,
            viewers: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

const VIDEO_PAGE: &str = r#"<html>
    <head>
        <title>Webcam Stream</title>
    </head>
    <body>
        <h1>Live Webcam</h1>
        <img src="/video" width="640" height="480"/>
    </body>
</html>
"#;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET / — liveness
async fn home() -> impl IntoResponse {
    Json(Health { status: "ok" })
}

/// GET /video — endless multipart JPEG stream, one session per request
async fn video_feed(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = StreamSession::new(
        Arc::clone(&state.slot),
        state.stop.clone(),
        Arc::clone(&state.viewers),
        &state.stream,
    );
    (
        [
            (header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(session.into_stream()),
    )
}

/// GET /video_page — HTML wrapper around /video
async fn video_page() -> impl IntoResponse {
    Html(VIDEO_PAGE)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/video", get(video_feed))
        .route("/video_page", get(video_page))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
