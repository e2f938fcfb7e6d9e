use std::{
    io::{ErrorKind, Read},
    process::{Child, Command, Stdio},
    thread,
};

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::debug;

use crate::{
    FrameSource, parse_device_index,
    types::{CaptureError, Frame, FrameFormat},
};

/// Frames decoded ahead of the consumer. Kept small so the decoder is paced by
/// whoever pulls frames.
const READ_AHEAD: usize = 2;

/// Source backed by an `ffmpeg` child that writes raw `bgr24` frames to
/// stdout. A background thread slices stdout into frames.
pub struct FfmpegSource {
    uri: String,
    child: Child,
    frames: Receiver<Result<Frame, CaptureError>>,
    pending: Option<Frame>,
}

impl FfmpegSource {
    /// Spawn ffmpeg for `uri` and wait for the first decoded frame.
    pub fn open(uri: &str, target_size: (u32, u32)) -> Result<Self, CaptureError> {
        let mut cmd = build_command(uri, target_size);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|source| CaptureError::Spawn {
            uri: uri.to_string(),
            source,
        })?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CaptureError::Other(anyhow::anyhow!(
                "failed to capture ffmpeg stdout"
            )));
        };

        let (tx, rx) = bounded(READ_AHEAD);
        thread::Builder::new()
            .name("ffmpeg-reader".into())
            .spawn(move || ffmpeg_loop(stdout, target_size, tx))
            .map_err(CaptureError::Read)?;

        // ffmpeg starts even when the input is missing; the first frame is the
        // real open check.
        match rx.recv() {
            Ok(Ok(first)) => Ok(Self {
                uri: uri.to_string(),
                child,
                frames: rx,
                pending: Some(first),
            }),
            Ok(Err(err)) => {
                debug!(uri, error = %err, "ffmpeg failed before the first frame");
                let _ = child.kill();
                let _ = child.wait();
                Err(CaptureError::Open {
                    uri: uri.to_string(),
                })
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(CaptureError::Open {
                    uri: uri.to_string(),
                })
            }
        }
    }
}

impl FrameSource for FfmpegSource {
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        match self.frames.recv() {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(err)) => Err(err),
            Err(_) => Ok(None),
        }
    }

    fn uri(&self) -> &str {
        &self.uri
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        debug!(uri = %self.uri, "ffmpeg source closed");
    }
}

pub(crate) fn build_command(uri: &str, target_size: (u32, u32)) -> Command {
    let scale_arg = format!("scale={}:{}", target_size.0, target_size.1);
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner").arg("-loglevel").arg("error");

    if let Some(index) = parse_device_index(uri) {
        cmd.arg("-f")
            .arg("video4linux2")
            .arg("-i")
            .arg(format!("/dev/video{index}"));
    } else {
        cmd.arg("-i").arg(uri);
    }

    cmd.arg("-an")
        .arg("-vf")
        .arg(&scale_arg)
        .arg("-pix_fmt")
        .arg("bgr24")
        .arg("-f")
        .arg("rawvideo")
        .arg("-");
    cmd
}

/// Slice `stdout` into fixed-size BGR frames until EOF or the receiver goes
/// away. A clean EOF ends the stream without an error.
pub(crate) fn ffmpeg_loop(
    mut stdout: impl Read,
    target_size: (u32, u32),
    tx: Sender<Result<Frame, CaptureError>>,
) {
    let frame_bytes = Frame::expected_len(target_size.0, target_size.1, FrameFormat::Bgr8);
    let mut buffer = vec![0u8; frame_bytes];

    loop {
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {
                let frame = Frame {
                    data: buffer.clone(),
                    width: target_size.0,
                    height: target_size.1,
                    timestamp_ms: Utc::now().timestamp_millis(),
                    format: FrameFormat::Bgr8,
                };
                if tx.send(Ok(frame)).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => {
                let _ = tx.send(Err(CaptureError::Read(err)));
                break;
            }
        }
    }
}
