use std::future::Future;
use std::sync::Arc;

use frame_relay_common::config::{Config, ConfigError};
use frame_relay_common::signal::StopSignal;
use frame_relay_common::slot::LatestFrame;
use frame_relay_producer::encoder::JpegEncoder;
use frame_relay_producer::lifecycle::{CaptureService, LifecycleError};
use frame_relay_producer::source::{self, CaptureError};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::routes::{router, AppState};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("capture setup failed: {0}")]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Start capture, serve HTTP until Ctrl-C/SIGTERM, then stop capture.
///
/// Any error on the way up is returned after the stop signal has been set, so
/// the capture thread never outlives a failed startup.
pub async fn run(config: Config) -> Result<(), ApiError> {
    let slot = Arc::new(LatestFrame::new());
    let stop = StopSignal::new();
    let _stop_on_exit = stop.guard();

    let capture_source = source::from_config(&config.capture)?;
    let capture = CaptureService::start(
        capture_source,
        Box::new(JpegEncoder::new(config.encoder.quality)),
        Arc::clone(&slot),
        config.capture.frame_interval(),
        stop.clone(),
    )?;

    let addr = config.server.bind.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ApiError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(addr, source = config.capture.source, "frame-relay server starting");

    let state = Arc::new(AppState::new(slot, stop.clone(), config.stream.clone()));
    serve(listener, state, shutdown_signal(stop)).await?;

    capture.shutdown();
    info!("frame-relay server stopped");
    Ok(())
}

/// Serve the router on `listener` until `shutdown` resolves.
///
/// Open `/video` sessions only end once the stop signal is set, so `shutdown`
/// must set it for the graceful drain to finish.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ApiError> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ApiError::Serve)
}

/// Resolves on Ctrl-C or SIGTERM, after raising the stop signal.
pub async fn shutdown_signal(stop: StopSignal) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
    stop.set();
}
