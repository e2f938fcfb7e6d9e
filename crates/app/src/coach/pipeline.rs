//! Pull-driven frame pipeline behind `/video_feed`.
//!
//! Each stream owns a camera lease. Every iteration re-checks the lease,
//! reads one frame, scores it and yields one multipart chunk. The blocking part
//! of an iteration runs on the actix blocking pool; the manager's lock is only
//! taken to look the device up. The lease is released when the stream ends or
//! is dropped by a disconnecting client.

use std::{
    sync::{Arc, PoisonError},
    time::Instant,
};

use actix_web::web::{self, Bytes};
use anyhow::Result;
use async_stream::stream;
use futures_util::Stream;
use ml_core::{PoseEstimator, ReferenceLibrary, ScoreResult, ScoringPolicy, evaluate};
use tracing::{debug, error, warn};
use video_ingest::Frame;

use crate::coach::{
    annotation::{draw_feedback, encode_jpeg, frame_to_rgb},
    broadcast::FeedbackBroadcaster,
    camera::{CameraLease, CameraManager, SharedDevice},
};

pub(crate) const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Per-frame estimate, score, overlay and encode.
pub(crate) struct FrameProcessor {
    library: Arc<ReferenceLibrary>,
    estimator: Arc<dyn PoseEstimator>,
    policy: ScoringPolicy,
    jpeg_quality: u8,
}

pub(crate) struct ProcessedFrame {
    pub(crate) jpeg: Vec<u8>,
    /// Present only when a body was detected and scored.
    pub(crate) feedback: Option<ScoreResult>,
}

impl FrameProcessor {
    pub(crate) fn new(
        library: Arc<ReferenceLibrary>,
        estimator: Arc<dyn PoseEstimator>,
        policy: ScoringPolicy,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            library,
            estimator,
            policy,
            jpeg_quality,
        }
    }

    pub(crate) fn library(&self) -> &ReferenceLibrary {
        &self.library
    }

    pub(crate) fn process(&self, frame: &Frame) -> Result<ProcessedFrame> {
        let mut image = frame_to_rgb(frame)?;

        let landmarks = match self.estimator.estimate(&image) {
            Ok(landmarks) => landmarks,
            Err(err) => {
                debug!(estimator = self.estimator.name(), "pose estimation failed: {err:#}");
                metrics::counter!("pose_coach_estimator_errors_total").increment(1);
                None
            }
        };

        let feedback = match landmarks {
            None => {
                metrics::counter!("pose_coach_frames_without_body_total").increment(1);
                None
            }
            Some(landmarks) => match evaluate(&landmarks, &self.library, &self.policy) {
                Ok(result) => {
                    draw_feedback(&mut image, &result, &landmarks);
                    metrics::counter!("pose_coach_frames_scored_total").increment(1);
                    Some(result)
                }
                Err(err) => {
                    debug!(
                        shoulder_distance = err.shoulder_distance,
                        "skipping degenerate landmarks"
                    );
                    metrics::counter!("pose_coach_degenerate_frames_total").increment(1);
                    None
                }
            },
        };

        let jpeg = encode_jpeg(&image, self.jpeg_quality)?;
        Ok(ProcessedFrame { jpeg, feedback })
    }
}

enum FrameStep {
    Frame(ProcessedFrame),
    Skipped,
    Ended,
}

/// Releases the camera when the owning stream goes away, unless a newer
/// acquire has taken over the device in the meantime.
struct LeaseGuard {
    cameras: Arc<CameraManager>,
    lease: CameraLease,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.cameras.release_lease(self.lease) {
            debug!(generation = self.lease.generation(), "stream ended; camera released");
        }
    }
}

/// Multipart MJPEG body for one acquired camera.
pub(crate) fn frame_stream(
    cameras: Arc<CameraManager>,
    lease: CameraLease,
    processor: Arc<FrameProcessor>,
    broadcaster: FeedbackBroadcaster,
) -> impl Stream<Item = Result<Bytes, actix_web::Error>> {
    let guard = LeaseGuard { cameras, lease };
    stream! {
        let guard = guard;
        loop {
            let Some(device) = guard.cameras.device(guard.lease) else {
                debug!(generation = guard.lease.generation(), "camera released; ending stream");
                break;
            };

            let worker = Arc::clone(&processor);
            let step = web::block(move || next_frame(&device, &worker)).await;
            let processed = match step {
                Ok(FrameStep::Frame(processed)) => processed,
                Ok(FrameStep::Skipped) => continue,
                Ok(FrameStep::Ended) => break,
                Err(err) => {
                    error!("frame worker failed: {err}");
                    break;
                }
            };

            if let Some(result) = processed.feedback {
                broadcaster.publish(result);
            }
            metrics::counter!("pose_coach_frames_streamed_total").increment(1);
            yield Ok::<Bytes, actix_web::Error>(multipart_chunk(&processed.jpeg));
        }
    }
}

/// Read and process one frame. Read failures and end of input end the
/// stream; a frame that fails to process is dropped.
fn next_frame(device: &SharedDevice, processor: &FrameProcessor) -> FrameStep {
    let read = {
        let mut source = device.lock().unwrap_or_else(PoisonError::into_inner);
        source.read_frame()
    };
    let frame = match read {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            debug!("capture source ended");
            return FrameStep::Ended;
        }
        Err(err) => {
            warn!("frame read failed: {err}");
            return FrameStep::Ended;
        }
    };

    let start = Instant::now();
    match processor.process(&frame) {
        Ok(processed) => {
            metrics::histogram!("pose_coach_frame_processing_seconds")
                .record(start.elapsed().as_secs_f64());
            FrameStep::Frame(processed)
        }
        Err(err) => {
            warn!(timestamp = frame.timestamp_ms, "dropping frame: {err:#}");
            FrameStep::Skipped
        }
    }
}

pub(crate) fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let mut payload = Vec::with_capacity(jpeg.len() + 64);
    payload.extend_from_slice(b"--frame\r\n");
    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}
