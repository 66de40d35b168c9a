//! HTTP surface: route table, endpoint adapters and the index page

pub mod response;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

use crate::capture::SharedSensor;
use crate::preset::{Endpoint, PresetTable};
use crate::serve::{CapturePolicy, MultipartStreamer, SingleFrameResponder};
use crate::Config;

pub use response::{chunked, BufferedResponse, ChunkedResponse, PendingResponse};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    single: SingleFrameResponder,
    streamer: MultipartStreamer,
    presets: PresetTable,
    channel_capacity: usize,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(sensor: SharedSensor, config: &Config) -> Self {
        let single = SingleFrameResponder::new(sensor.clone(), config.timing);
        let shutdown = CancellationToken::new();

        let mut streamer = MultipartStreamer::new(sensor, config.timing)
            .with_shutdown(shutdown.clone())
            .with_chunk_size(config.stream.chunk_size)
            .restore_on_exit(config.stream.restore_on_exit);
        if !config.stream.retry_on_capture_failure {
            streamer = streamer.with_policy(CapturePolicy::FailFast);
        }

        Self {
            single,
            streamer,
            presets: config.presets,
            channel_capacity: config.stream.channel_capacity,
            shutdown,
        }
    }

    /// Cancelling this token ends every open stream so the server can drain.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Build the router: index page plus the six frame endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route(Endpoint::LowQuality.path(), get(low_quality))
        .route(Endpoint::HighQuality.path(), get(high_quality))
        .route(Endpoint::UltraQuality.path(), get(ultra_quality))
        .route(Endpoint::LowQualityStream.path(), get(low_quality_stream))
        .route(Endpoint::HighQualityStream.path(), get(high_quality_stream))
        .route(Endpoint::UltraQualityStream.path(), get(ultra_quality_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Plain-text listing of the frame endpoints.
pub fn index_text() -> String {
    let mut text = String::from("Camera API Endpoints:\n");
    for endpoint in Endpoint::ALL {
        text.push_str(&format!("  {:<22} -> {}\n", endpoint.path(), endpoint.description()));
    }
    text
}

async fn index() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], index_text())
}

async fn low_quality(State(state): State<AppState>) -> Response {
    info!("Low-quality frame requested");
    single_frame(state, Endpoint::LowQuality).await
}

async fn high_quality(State(state): State<AppState>) -> Response {
    info!("High-quality frame requested");
    single_frame(state, Endpoint::HighQuality).await
}

async fn ultra_quality(State(state): State<AppState>) -> Response {
    info!("Ultra-quality frame requested");
    single_frame(state, Endpoint::UltraQuality).await
}

async fn low_quality_stream(State(state): State<AppState>) -> Response {
    info!("Low-quality stream started");
    stream(state, Endpoint::LowQualityStream).await
}

async fn high_quality_stream(State(state): State<AppState>) -> Response {
    info!("High-quality stream started");
    stream(state, Endpoint::HighQualityStream).await
}

async fn ultra_quality_stream(State(state): State<AppState>) -> Response {
    info!("Ultra-quality stream started");
    stream(state, Endpoint::UltraQualityStream).await
}

async fn single_frame(state: AppState, endpoint: Endpoint) -> Response {
    let preset = state.presets.resolve(endpoint);
    let mut channel = BufferedResponse::new();
    // Capture failures are already written as a 500.
    if let Err(e) = state.single.respond(preset, &mut channel).await {
        debug!(endpoint = %endpoint, error = %e, "Single-frame request failed");
    }
    channel.into_response()
}

/// Run the streamer on its own task; this handler only waits for headers.
async fn stream(state: AppState, endpoint: Endpoint) -> Response {
    let preset = state.presets.resolve(endpoint);
    let (mut writer, pending) = chunked(state.channel_capacity);
    let streamer = state.streamer.clone();

    tokio::spawn(
        async move {
            if let Err(e) = streamer.stream(preset, &mut writer).await {
                debug!(endpoint = %endpoint, error = %e, "Stream failed");
            }
        }
        .in_current_span(),
    );

    pending.into_response().await
}
