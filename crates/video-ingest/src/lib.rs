//! Pull-based video capture.
//!
//! A [`FrameSource`] hands out one decoded BGR frame per call and reports end
//! of stream as `Ok(None)`. Sources are opened through [`open_source`], which
//! blocks until the device has produced its first frame so an unusable
//! source fails at open time rather than on the first read.

mod ffmpeg;
mod types;

#[cfg(feature = "with-opencv")]
mod camera;

#[cfg(feature = "with-opencv")]
pub use camera::OpenCvSource;
pub use ffmpeg::FfmpegSource;
pub use types::{CaptureError, Frame, FrameFormat};

/// A blocking, pull-driven frame producer. Dropping the source closes the
/// underlying device.
pub trait FrameSource: Send {
    /// Block until the next frame is available. `Ok(None)` means the source
    /// has ended.
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    fn uri(&self) -> &str;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CaptureBackend {
    /// `ffmpeg` child process decoding to raw BGR on stdout.
    #[default]
    Ffmpeg,
    /// OpenCV `VideoCapture` (requires the `with-opencv` feature).
    OpenCv,
}

impl CaptureBackend {
    pub fn label(self) -> &'static str {
        match self {
            CaptureBackend::Ffmpeg => "ffmpeg",
            CaptureBackend::OpenCv => "opencv",
        }
    }

    pub fn is_available(self) -> bool {
        match self {
            CaptureBackend::Ffmpeg => true,
            CaptureBackend::OpenCv => cfg!(feature = "with-opencv"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CaptureOptions {
    pub backend: CaptureBackend,
    /// Output size (width, height) every frame is scaled to.
    pub target_size: (u32, u32),
}

/// Open `uri` (file path, URL, `/dev/videoN`, or a bare device index) with the
/// configured backend.
pub fn open_source(
    uri: &str,
    options: &CaptureOptions,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    match options.backend {
        CaptureBackend::Ffmpeg => Ok(Box::new(FfmpegSource::open(uri, options.target_size)?)),
        #[cfg(feature = "with-opencv")]
        CaptureBackend::OpenCv => Ok(Box::new(OpenCvSource::open(uri, options.target_size)?)),
        #[cfg(not(feature = "with-opencv"))]
        CaptureBackend::OpenCv => Err(CaptureError::BackendUnavailable("opencv")),
    }
}

/// Parse a `/dev/videoX` style URI or bare index and return the index.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<i32>().ok();
        }
    }
    None
}
