//! Iris camera server: JPEG snapshots and MJPEG streams over HTTP

use std::path::PathBuf;

use color_eyre::Result;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use iris::capture::{self, SharedSensor};
use iris::http::{self, AppState};
use iris::preset::Endpoint;
use iris::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("Iris launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    // Open the camera
    let sensor = SharedSensor::from_boxed(capture::open(&config.sensor)?);
    info!(config = %sensor.configuration().await, "Sensor ready");

    let state = AppState::new(sensor, &config);
    let shutdown = state.shutdown_token();
    let app = http::router(state);

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    info!("Camera API server started on http://{}", addr);
    for endpoint in Endpoint::ALL {
        info!("   • {}", endpoint.path());
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Open streams never end on their own.
            shutdown.cancel();
        })
        .await?;

    info!("Iris shutting down");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("iris=info,tower_http=info"));
    let fmt = tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime());

    let registry = tracing_subscriber::registry().with(filter).with(fmt);

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
