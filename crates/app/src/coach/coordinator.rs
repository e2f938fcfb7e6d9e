//! Subscriber bookkeeping that ties camera lifetime to WebSocket viewers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::coach::camera::CameraControl;

pub struct ConnectionCoordinator {
    /// Signed so an unbalanced unsubscribe is visible rather than wrapping.
    count: Mutex<i64>,
    camera: Arc<dyn CameraControl>,
}

impl ConnectionCoordinator {
    pub fn new(camera: Arc<dyn CameraControl>) -> Self {
        Self {
            count: Mutex::new(0),
            camera,
        }
    }

    /// Register a subscriber and return the new count.
    pub fn subscribe(&self) -> usize {
        let mut count = self.lock_count();
        *count += 1;
        let reported = clamp(*count);
        metrics::gauge!("pose_coach_subscribers").set(reported as f64);
        debug!(subscribers = reported, "subscriber joined");
        reported
    }

    /// Drop a subscriber. When none remain the camera is released while the
    /// count lock is still held, so a racing subscribe lands strictly before
    /// or after the release. Returns whether the camera was released.
    pub fn unsubscribe(&self) -> bool {
        let mut count = self.lock_count();
        *count -= 1;
        let reported = clamp(*count);
        metrics::gauge!("pose_coach_subscribers").set(reported as f64);
        debug!(subscribers = reported, "subscriber left");
        if *count <= 0 {
            info!("last subscriber left; releasing camera");
            self.camera.release();
            true
        } else {
            false
        }
    }

    /// Release the camera regardless of how many subscribers remain.
    pub fn stop(&self) {
        info!("camera stop requested");
        self.camera.release();
    }

    pub fn subscriber_count(&self) -> usize {
        clamp(*self.lock_count())
    }

    fn lock_count(&self) -> MutexGuard<'_, i64> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn clamp(count: i64) -> usize {
    usize::try_from(count).unwrap_or(0)
}
