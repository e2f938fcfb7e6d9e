//! Startup wiring: load the library, build the estimator and serve.

use std::sync::Arc;

use anyhow::{Context, Result};
use ml_core::{PoseEstimator, ReferenceLibrary};
use tracing::{info, warn};

use crate::coach::{
    CoachConfig,
    broadcast::FeedbackBroadcaster,
    camera::{CameraManager, CaptureFactory},
    pipeline::FrameProcessor,
    server::{ServerState, serve},
    telemetry,
};

/// Run the coaching service until the HTTP server exits.
pub fn run(config: CoachConfig) -> Result<()> {
    telemetry::init_tracing(config.verbose);
    let _ = telemetry::init_metrics_recorder();

    let library = ReferenceLibrary::load(&config.references_path).with_context(|| {
        format!(
            "failed to load reference poses from {}",
            config.references_path.display()
        )
    })?;
    if library.is_empty() {
        warn!("reference library is empty; every detected pose reports `Unknown` with no feedback");
    }
    info!(
        poses = library.pose_count(),
        samples = library.sample_count(),
        "reference library loaded"
    );

    let estimator = build_estimator(&config)?;
    info!(estimator = estimator.name(), "pose estimator ready");

    let cameras = Arc::new(CameraManager::new(Arc::new(CaptureFactory::new(
        config.capture,
    ))));
    let processor = Arc::new(FrameProcessor::new(
        Arc::new(library),
        estimator,
        config.policy.clone(),
        config.jpeg_quality,
    ));
    let state = ServerState::new(
        cameras,
        FeedbackBroadcaster::new(config.broadcast_capacity),
        processor,
        config.source_uri.clone(),
        config.frontend_url.clone(),
    );

    info!(
        source = %config.source_uri,
        backend = config.capture.backend.label(),
        width = config.capture.target_size.0,
        height = config.capture.target_size.1,
        "video feed at http://{}:{}/video_feed",
        config.host,
        config.port
    );
    serve(state, &config.host, config.port)
}

#[cfg(feature = "with-ort")]
fn build_estimator(config: &CoachConfig) -> Result<Arc<dyn PoseEstimator>> {
    use ml_core::blazepose::BlazePoseEstimator;

    let Some(model_path) = config.model_path.as_ref() else {
        anyhow::bail!("--model is required when built with the `with-ort` feature");
    };
    let estimator = BlazePoseEstimator::new(model_path, config.presence_threshold)?;
    Ok(Arc::new(estimator))
}

#[cfg(not(feature = "with-ort"))]
fn build_estimator(_config: &CoachConfig) -> Result<Arc<dyn PoseEstimator>> {
    warn!("no pose estimator compiled in; frames will stream without scoring");
    Ok(Arc::new(ml_core::DisabledEstimator))
}
