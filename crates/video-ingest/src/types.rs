use std::io;

use thiserror::Error;

/// Raw frame captured from a video source.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl Frame {
    /// Number of bytes a frame of this size and format occupies.
    pub fn expected_len(width: u32, height: u32, format: FrameFormat) -> usize {
        width as usize * height as usize * format.bytes_per_pixel()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

impl FrameFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            FrameFormat::Bgr8 => 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("failed to launch ffmpeg for {uri:?}")]
    Spawn {
        uri: String,
        #[source]
        source: io::Error,
    },
    #[error("frame read failed")]
    Read(#[from] io::Error),
    #[error("capture backend `{0}` is not compiled into this build")]
    BackendUnavailable(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
