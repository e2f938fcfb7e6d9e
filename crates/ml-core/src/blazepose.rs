//! ONNX Runtime wrapper around a BlazePose-style full-body landmark model.
//!
//! The model takes a `[1, 256, 256, 3]` RGB tensor in `[0, 1]` and returns a
//! flat landmark tensor (five values per landmark: x, y, z, visibility,
//! presence, in input pixels) plus a pose-presence score.

use std::{path::Path, sync::Mutex};

use anyhow::{Context, Result, anyhow};
use image::{Rgb, RgbImage, imageops::FilterType};
use ndarray::Array4;
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::Tensor,
};

use crate::{
    estimator::PoseEstimator,
    landmarks::{LANDMARK_COUNT, LandmarkSet, Point3},
};

pub const INPUT_SIZE: u32 = 256;
const VALUES_PER_LANDMARK: usize = 5;

#[derive(Clone, Copy, Debug)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    orig_w: u32,
    orig_h: u32,
}

pub struct BlazePoseEstimator {
    session: Mutex<Session>,
    presence_threshold: f32,
}

impl BlazePoseEstimator {
    pub fn new<P: AsRef<Path>>(model_path: P, presence_threshold: f32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load ORT session from {}", model_path.display())
            })?;

        Ok(Self {
            session: Mutex::new(session),
            presence_threshold,
        })
    }
}

impl PoseEstimator for BlazePoseEstimator {
    fn estimate(&self, image: &RgbImage) -> Result<Option<LandmarkSet>> {
        let (input, letterbox) = prepare_image(image);
        let tensor = Tensor::from_array(input)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("pose session poisoned"))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .context("failed to run ORT session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "pose model returned {} output(s), expected landmarks and presence",
                outputs.len()
            ));
        }

        let presence = outputs[1]
            .try_extract_array::<f32>()?
            .iter()
            .next()
            .copied()
            .unwrap_or(0.0);
        if presence < self.presence_threshold {
            return Ok(None);
        }

        let raw = outputs[0].try_extract_array::<f32>()?;
        let flat: Vec<f32> = raw.iter().copied().collect();
        decode_landmarks(&flat, &letterbox).map(Some)
    }

    fn name(&self) -> &str {
        "blazepose-onnx"
    }
}

fn prepare_image(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (orig_w, orig_h) = image.dimensions();
    let scale = INPUT_SIZE as f32 / orig_w.max(orig_h).max(1) as f32;
    let new_w = (orig_w as f32 * scale).round().max(1.0) as u32;
    let new_h = (orig_h as f32 * scale).round().max(1.0) as u32;
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad_x = ((INPUT_SIZE as i64 - new_w as i64) / 2).max(0) as u32;
    let pad_y = ((INPUT_SIZE as i64 - new_h as i64) / 2).max(0) as u32;
    let mut canvas = RgbImage::from_pixel(INPUT_SIZE, INPUT_SIZE, Rgb([0, 0, 0]));
    image::imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    let size = INPUT_SIZE as usize;
    let mut input = Array4::<f32>::zeros((1, size, size, 3));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        for channel in 0..3 {
            input[[0, y as usize, x as usize, channel]] = pixel.0[channel] as f32 / 255.0;
        }
    }

    (
        input,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            orig_w,
            orig_h,
        },
    )
}

/// Map model-space landmarks back to image-normalised coordinates.
fn decode_landmarks(flat: &[f32], letterbox: &Letterbox) -> Result<LandmarkSet> {
    let needed = LANDMARK_COUNT * VALUES_PER_LANDMARK;
    if flat.len() < needed {
        return Err(anyhow!(
            "unexpected landmark tensor length: got {}, need {needed}",
            flat.len()
        ));
    }

    let width = letterbox.orig_w.max(1) as f64;
    let height = letterbox.orig_h.max(1) as f64;
    let scale = letterbox.scale as f64;
    let points = flat
        .chunks_exact(VALUES_PER_LANDMARK)
        .take(LANDMARK_COUNT)
        .map(|chunk| {
            let px = (chunk[0] - letterbox.pad_x) as f64 / scale;
            let py = (chunk[1] - letterbox.pad_y) as f64 / scale;
            let pz = chunk[2] as f64 / scale;
            Point3::new(px / width, py / height, pz / width)
        })
        .collect();

    Ok(LandmarkSet::new(points)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_centres_wide_frames() {
        let image = RgbImage::from_pixel(640, 480, Rgb([255, 255, 255]));
        let (input, letterbox) = prepare_image(&image);
        assert_eq!(input.shape(), &[1, 256, 256, 3]);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 32.0);
        assert_eq!(input[[0, 0, 0, 0]], 0.0);
        assert_eq!(input[[0, 128, 128, 0]], 1.0);
    }

    #[test]
    fn decoded_landmarks_are_image_normalised() {
        let letterbox = Letterbox {
            scale: 0.4,
            pad_x: 0.0,
            pad_y: 32.0,
            orig_w: 640,
            orig_h: 480,
        };
        let mut flat = vec![0.0f32; LANDMARK_COUNT * VALUES_PER_LANDMARK];
        // Centre of the padded input maps to the centre of the frame.
        flat[0] = 128.0;
        flat[1] = 128.0;
        let set = decode_landmarks(&flat, &letterbox).unwrap();
        let nose = set.points()[0];
        assert!((nose.x - 0.5).abs() < 1e-6);
        assert!((nose.y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn short_tensor_is_rejected() {
        let letterbox = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_w: 256,
            orig_h: 256,
        };
        assert!(decode_landmarks(&[0.0; 10], &letterbox).is_err());
    }
}
