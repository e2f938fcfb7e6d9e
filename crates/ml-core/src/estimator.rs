//! Pose-estimation seam. Implementations turn an RGB image into a landmark
//! set, or `None` when no body is visible.

use anyhow::Result;
use image::RgbImage;

use crate::landmarks::LandmarkSet;

/// Landmark coordinates follow the image-normalised convention: `x` and `y`
/// in `[0, 1]` relative to the frame, `z` on roughly the same scale as `x`.
pub trait PoseEstimator: Send + Sync {
    fn estimate(&self, image: &RgbImage) -> Result<Option<LandmarkSet>>;

    fn name(&self) -> &str;
}

/// Estimator used when no backend is compiled in or configured. Never detects
/// a body, so frames stream through without scoring.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledEstimator;

impl PoseEstimator for DisabledEstimator {
    fn estimate(&self, _image: &RgbImage) -> Result<Option<LandmarkSet>> {
        Ok(None)
    }

    fn name(&self) -> &str {
        "disabled"
    }
}
