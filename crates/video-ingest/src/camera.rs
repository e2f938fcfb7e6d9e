//! OpenCV-backed capture.

use chrono::Utc;
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::{debug, warn};

use crate::{
    FrameSource, parse_device_index,
    types::{CaptureError, Frame, FrameFormat},
};

const CAPTURE_FPS: f64 = 30.0;

pub struct OpenCvSource {
    uri: String,
    cap: VideoCapture,
    target_size: (u32, u32),
    pending: Option<Frame>,
    frame: Mat,
    scratch: Mat,
}

impl OpenCvSource {
    /// Open `uri` and read one frame to confirm the device actually delivers.
    pub fn open(uri: &str, target_size: (u32, u32)) -> Result<Self, CaptureError> {
        let mut cap = open_video_capture(uri)?;
        configure_camera(&mut cap, target_size, CAPTURE_FPS);

        let mut source = Self {
            uri: uri.to_string(),
            cap,
            target_size,
            pending: None,
            frame: Mat::default(),
            scratch: Mat::default(),
        };
        match source.grab()? {
            Some(first) => {
                source.pending = Some(first);
                Ok(source)
            }
            None => Err(CaptureError::Open {
                uri: uri.to_string(),
            }),
        }
    }

    fn grab(&mut self) -> Result<Option<Frame>, CaptureError> {
        let ok = self
            .cap
            .read(&mut self.frame)
            .map_err(|e| CaptureError::Other(e.into()))?;
        if !ok {
            return Ok(None);
        }
        let size = self
            .frame
            .size()
            .map_err(|e| CaptureError::Other(e.into()))?;
        if size.width <= 0 || size.height <= 0 {
            return Ok(None);
        }

        let (target_w, target_h) = (self.target_size.0 as i32, self.target_size.1 as i32);
        let working = if size.width != target_w || size.height != target_h {
            opencv::imgproc::resize(
                &self.frame,
                &mut self.scratch,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &self.scratch
        } else {
            &self.frame
        };

        let data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();

        Ok(Some(Frame {
            data,
            width: self.target_size.0,
            height: self.target_size.1,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        }))
    }
}

impl FrameSource for OpenCvSource {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.grab()
    }

    fn uri(&self) -> &str {
        &self.uri
    }
}

impl Drop for OpenCvSource {
    fn drop(&mut self) {
        if let Err(err) = self.cap.release() {
            warn!(uri = %self.uri, error = %err, "failed to release capture device");
        }
    }
}

fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? => {
                    return Ok(cap);
                }
                Ok(_) => debug!(index, backend, "device did not open"),
                Err(err) => debug!(index, backend, error = %err, "failed to open device"),
            }
        }
    } else {
        match VideoCapture::from_file(uri, videoio::CAP_ANY) {
            Ok(cap) if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? => {
                return Ok(cap);
            }
            Ok(_) => debug!(uri, "source did not open"),
            Err(err) => debug!(uri, error = %err, "failed to open source"),
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Resolution and frame-rate hints. Devices are free to ignore them, which is
/// why frames are resized after capture.
fn configure_camera(cap: &mut VideoCapture, target_size: (u32, u32), fps: f64) {
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        let _ = cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64);
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}
